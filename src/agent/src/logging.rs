//! Tracing subscriber setup for the cleanup agent

use cleanup_shared::{CleanupError, CleanupOutcome, LogLevel};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogSettings;

/// Default filter directive for the agent's own crates at `level`
pub fn default_directive(level: LogLevel) -> String {
    format!(
        "db_cleanup={l},cleanup_agent={l},cleanup_database={l},sqlx=warn,mongodb=warn",
        l = level
    )
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_logging(settings: &LogSettings, level: LogLevel) -> CleanupOutcome<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = settings
                .filter
                .clone()
                .unwrap_or_else(|| default_directive(level));
            EnvFilter::try_new(&directive).map_err(|e| {
                CleanupError::configuration(format!("Invalid log filter '{}': {}", directive, e))
            })?
        }
    };

    let result = if settings.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| {
        CleanupError::configuration(format!("Failed to set tracing subscriber: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_uses_level() {
        let directive = default_directive(LogLevel::Debug);
        assert!(directive.contains("cleanup_agent=debug"));
        assert!(EnvFilter::try_new(&directive).is_ok());
    }

    #[test]
    fn test_invalid_filter_is_configuration_error() {
        std::env::remove_var("RUST_LOG");
        let settings = LogSettings {
            json: false,
            filter: Some("cleanup_agent=loud".to_string()),
        };
        assert!(matches!(
            init_logging(&settings, LogLevel::Info),
            Err(CleanupError::Configuration { .. })
        ));
    }
}

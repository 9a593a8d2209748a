//! # Agent Configuration
//!
//! Settings for the cleanup agent: which backends to manage and where they
//! live, the cleanup configuration layer, strategy tuning, verification
//! thresholds and automation behaviour.
//!
//! Sources are layered as defaults → optional config file → `DB_CLEANUP__*`
//! environment variables (`__` separates nested keys, e.g.
//! `DB_CLEANUP__ENDPOINTS__REDIS_URL`). A `.env` file is read first when present.

use cleanup_database::{
    DocumentStrategyConfig, KeyValueStrategyConfig, RelationalStrategyConfig,
    VectorStrategyConfig,
};
use cleanup_shared::{
    BackendKind, CleanupConfig, CleanupConfigOverride, CleanupError, CleanupOutcome, Profile,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::automation::AutomationConfig;
use crate::verification::DeepCheckThresholds;

const ENV_PREFIX: &str = "DB_CLEANUP";

/// Main agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub profile: Profile,
    /// Backends to manage; empty means every backend with an endpoint
    pub databases: Vec<BackendKind>,
    pub endpoints: EndpointsConfig,
    /// Layer applied on top of the profile's configuration
    pub cleanup: CleanupConfigOverride,
    pub strategies: StrategiesConfig,
    pub thresholds: DeepCheckThresholds,
    pub automation: AutomationConfig,
    pub logging: LogSettings,
}

/// Connection endpoints, one per backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub postgres_url: Option<String>,
    pub postgres_schema: String,
    pub mongodb_url: Option<String>,
    pub mongodb_database: String,
    pub redis_url: Option<String>,
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            postgres_schema: "public".to_string(),
            mongodb_url: None,
            mongodb_database: "test".to_string(),
            redis_url: None,
            qdrant_url: None,
            qdrant_api_key: None,
        }
    }
}

impl EndpointsConfig {
    /// Backends that have an endpoint configured
    pub fn configured_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.url(*kind).is_some())
            .collect()
    }

    pub fn url(&self, kind: BackendKind) -> Option<&str> {
        match kind {
            BackendKind::Relational => self.postgres_url.as_deref(),
            BackendKind::Document => self.mongodb_url.as_deref(),
            BackendKind::KeyValue => self.redis_url.as_deref(),
            BackendKind::VectorIndex => self.qdrant_url.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    pub relational: RelationalStrategyConfig,
    pub document: DocumentStrategyConfig,
    pub key_value: KeyValueStrategyConfig,
    pub vector: VectorStrategyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Emit JSON lines instead of human readable output
    pub json: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: Option<String>,
}

impl AgentConfig {
    /// Load from defaults, an optional file and `DB_CLEANUP__*` variables
    pub fn load(path: Option<&Path>) -> CleanupOutcome<Self> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", env_file.display());
        }

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AgentConfig::default()).map_err(config_error)?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("databases"),
        );

        let config: AgentConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file without consulting the environment
    pub fn from_file(path: &Path) -> CleanupOutcome<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = serde_yaml::from_str(&content).map_err(|e| {
            CleanupError::configuration(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables only, on top of defaults
    pub fn from_env() -> CleanupOutcome<Self> {
        Self::load(None)
    }

    /// Profile configuration with the `cleanup` layer on top
    pub fn cleanup_config(&self) -> CleanupConfig {
        self.profile
            .apply(&CleanupConfig::default())
            .merged(&self.cleanup)
    }

    /// Backends this agent manages
    pub fn target_backends(&self) -> Vec<BackendKind> {
        if self.databases.is_empty() {
            self.endpoints.configured_backends()
        } else {
            self.databases.clone()
        }
    }

    pub fn validate(&self) -> CleanupOutcome<()> {
        self.cleanup_config().validate()?;

        for kind in &self.databases {
            if self.endpoints.url(*kind).is_none() {
                return Err(CleanupError::configuration(format!(
                    "No endpoint configured for {} ({})",
                    kind,
                    kind.engine_name()
                )));
            }
        }

        if self.thresholds.max_memory_ratio <= 0.0 || self.thresholds.max_memory_ratio > 1.0 {
            return Err(CleanupError::configuration(
                "thresholds.max_memory_ratio must be in (0, 1]",
            ));
        }

        Ok(())
    }
}

fn config_error(error: config::ConfigError) -> CleanupError {
    CleanupError::configuration(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanup_shared::Parallelization;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.target_backends().is_empty());
        assert_eq!(config.endpoints.mongodb_database, "test");
    }

    #[test]
    fn test_from_file_applies_profile_and_layer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "profile: ci\nendpoints:\n  redis_url: redis://localhost:6379\n  postgres_url: postgres://localhost/test\ncleanup:\n  options:\n    batch_size: 250\n"
        )
        .unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        let cleanup = config.cleanup_config();

        assert_eq!(config.profile, Profile::Ci);
        assert_eq!(cleanup.options.batch_size, 250);
        assert_eq!(cleanup.options.parallelization, Parallelization::Sequential);
        assert_eq!(
            config.target_backends(),
            vec![BackendKind::Relational, BackendKind::KeyValue]
        );
    }

    #[test]
    fn test_database_without_endpoint_is_rejected() {
        let config = AgentConfig {
            databases: vec![BackendKind::VectorIndex],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CleanupError::Configuration { .. })
        ));
    }

    #[test]
    fn test_invalid_cleanup_layer_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cleanup:\n  options:\n    timeout_ms: 0\n").unwrap();

        assert!(AgentConfig::from_file(file.path()).is_err());
    }
}

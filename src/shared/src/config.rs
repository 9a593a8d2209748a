//! Layered cleanup configuration
//!
//! Options resolve through default → per-manager → per-call layers. Each layer
//! is an override struct whose `None` fields fall through to the layer below,
//! so merging is always field-by-field and never replaces a whole group.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CleanupError;

/// Absolute ceiling for a single strategy call
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// Upper bound for configured retry attempts
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// How a batch call fans out across backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parallelization {
    #[default]
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// True when messages at `level` should be emitted under this setting
    pub fn allows(&self, level: LogLevel) -> bool {
        level <= *self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = CleanupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(CleanupError::configuration(format!(
                "Unknown log level '{}'",
                other
            ))),
        }
    }
}

/// Resolved options for one cleanup/verify invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupOptions {
    pub verify_cleanup: bool,
    pub preserve_schema: bool,
    pub reset_sequences: bool,
    pub timeout_ms: u64,
    pub batch_size: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub parallelization: Parallelization,
    pub log_level: LogLevel,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            verify_cleanup: true,
            preserve_schema: true,
            reset_sequences: true,
            timeout_ms: 30_000,
            batch_size: 1_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            parallelization: Parallelization::Parallel,
            log_level: LogLevel::Info,
        }
    }
}

impl CleanupOptions {
    /// Produce a new set of options with `layer` applied on top
    pub fn merged(&self, layer: &CleanupOptionsOverride) -> Self {
        Self {
            verify_cleanup: layer.verify_cleanup.unwrap_or(self.verify_cleanup),
            preserve_schema: layer.preserve_schema.unwrap_or(self.preserve_schema),
            reset_sequences: layer.reset_sequences.unwrap_or(self.reset_sequences),
            timeout_ms: layer.timeout_ms.unwrap_or(self.timeout_ms),
            batch_size: layer.batch_size.unwrap_or(self.batch_size),
            retry_attempts: layer.retry_attempts.unwrap_or(self.retry_attempts),
            retry_delay_ms: layer.retry_delay_ms.unwrap_or(self.retry_delay_ms),
            parallelization: layer.parallelization.unwrap_or(self.parallelization),
            log_level: layer.log_level.unwrap_or(self.log_level),
        }
    }

    pub fn validate(&self) -> Result<(), CleanupError> {
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(CleanupError::configuration(format!(
                "timeout_ms must be between 1 and {} (got {})",
                MAX_TIMEOUT_MS, self.timeout_ms
            )));
        }

        if self.batch_size == 0 {
            return Err(CleanupError::configuration(
                "batch_size must be greater than 0",
            ));
        }

        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(CleanupError::configuration(format!(
                "retry_attempts must not exceed {} (got {})",
                MAX_RETRY_ATTEMPTS, self.retry_attempts
            )));
        }

        Ok(())
    }

    pub fn is_parallel(&self) -> bool {
        self.parallelization == Parallelization::Parallel
    }
}

/// One layer of option overrides; unset fields fall through
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupOptionsOverride {
    pub verify_cleanup: Option<bool>,
    pub preserve_schema: Option<bool>,
    pub reset_sequences: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub batch_size: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub parallelization: Option<Parallelization>,
    pub log_level: Option<LogLevel>,
}

impl CleanupOptionsOverride {
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn preserve_schema(mut self, preserve: bool) -> Self {
        self.preserve_schema = Some(preserve);
        self
    }

    pub fn reset_sequences(mut self, reset: bool) -> Self {
        self.reset_sequences = Some(reset);
        self
    }

    pub fn verify_cleanup(mut self, verify: bool) -> Self {
        self.verify_cleanup = Some(verify);
        self
    }

    pub fn parallelization(mut self, mode: Parallelization) -> Self {
        self.parallelization = Some(mode);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = Some(delay_ms);
        self
    }

    /// Stack `other` on top of this layer; `other` wins where both are set
    pub fn merge(&self, other: &CleanupOptionsOverride) -> Self {
        Self {
            verify_cleanup: other.verify_cleanup.or(self.verify_cleanup),
            preserve_schema: other.preserve_schema.or(self.preserve_schema),
            reset_sequences: other.reset_sequences.or(self.reset_sequences),
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
            batch_size: other.batch_size.or(self.batch_size),
            retry_attempts: other.retry_attempts.or(self.retry_attempts),
            retry_delay_ms: other.retry_delay_ms.or(self.retry_delay_ms),
            parallelization: other.parallelization.or(self.parallelization),
            log_level: other.log_level.or(self.log_level),
        }
    }
}

/// Duration thresholds used when recording performance history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    pub warn_threshold_ms: u64,
    pub error_threshold_ms: u64,
    pub minimum_success_rate: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            warn_threshold_ms: 5_000,
            error_threshold_ms: 15_000,
            minimum_success_rate: 0.9,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceOverride {
    pub warn_threshold_ms: Option<u64>,
    pub error_threshold_ms: Option<u64>,
    pub minimum_success_rate: Option<f64>,
}

/// Logging behaviour of the orchestrator's default listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_events: bool,
    pub log_performance: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_events: true,
            log_performance: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOverride {
    pub log_events: Option<bool>,
    pub log_performance: Option<bool>,
}

/// Configuration held by a cleanup orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub options: CleanupOptions,
    pub performance: PerformanceThresholds,
    pub logging: LoggingConfig,
}

/// Partial configuration; nested groups merge field-by-field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfigOverride {
    pub options: Option<CleanupOptionsOverride>,
    pub performance: Option<PerformanceOverride>,
    pub logging: Option<LoggingOverride>,
}

impl CleanupConfigOverride {
    pub fn with_options(options: CleanupOptionsOverride) -> Self {
        Self {
            options: Some(options),
            ..Default::default()
        }
    }
}

impl CleanupConfig {
    /// Deep-merge `layer` into a new configuration
    pub fn merged(&self, layer: &CleanupConfigOverride) -> Self {
        let options = match &layer.options {
            Some(options) => self.options.merged(options),
            None => self.options.clone(),
        };

        let performance = match &layer.performance {
            Some(p) => PerformanceThresholds {
                warn_threshold_ms: p.warn_threshold_ms.unwrap_or(self.performance.warn_threshold_ms),
                error_threshold_ms: p
                    .error_threshold_ms
                    .unwrap_or(self.performance.error_threshold_ms),
                minimum_success_rate: p
                    .minimum_success_rate
                    .unwrap_or(self.performance.minimum_success_rate),
            },
            None => self.performance.clone(),
        };

        let logging = match &layer.logging {
            Some(l) => LoggingConfig {
                log_events: l.log_events.unwrap_or(self.logging.log_events),
                log_performance: l.log_performance.unwrap_or(self.logging.log_performance),
            },
            None => self.logging.clone(),
        };

        Self {
            options,
            performance,
            logging,
        }
    }

    pub fn validate(&self) -> Result<(), CleanupError> {
        self.options.validate()?;

        if self.performance.warn_threshold_ms > self.performance.error_threshold_ms {
            return Err(CleanupError::configuration(format!(
                "warn_threshold_ms ({}) must not exceed error_threshold_ms ({})",
                self.performance.warn_threshold_ms, self.performance.error_threshold_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.performance.minimum_success_rate) {
            return Err(CleanupError::configuration(
                "minimum_success_rate must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }
}

/// Named environment profiles for test runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Development,
    Test,
    Ci,
    Performance,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Test => "test",
            Profile::Ci => "ci",
            Profile::Performance => "performance",
        }
    }

    /// Connection pool size a driver should be built with under this profile
    pub fn pool_size(&self) -> u32 {
        match self {
            Profile::Development => 5,
            Profile::Test => 2,
            Profile::Ci => 4,
            Profile::Performance => 20,
        }
    }

    /// Profile-specific configuration layer
    pub fn overrides(&self) -> CleanupConfigOverride {
        let (options, performance) = match self {
            Profile::Development => (
                CleanupOptionsOverride {
                    timeout_ms: Some(30_000),
                    log_level: Some(LogLevel::Debug),
                    ..Default::default()
                },
                PerformanceOverride::default(),
            ),
            Profile::Test => (
                CleanupOptionsOverride {
                    timeout_ms: Some(10_000),
                    retry_attempts: Some(2),
                    retry_delay_ms: Some(250),
                    log_level: Some(LogLevel::Warn),
                    ..Default::default()
                },
                PerformanceOverride {
                    warn_threshold_ms: Some(2_000),
                    error_threshold_ms: Some(8_000),
                    ..Default::default()
                },
            ),
            Profile::Ci => (
                CleanupOptionsOverride {
                    timeout_ms: Some(60_000),
                    retry_attempts: Some(5),
                    retry_delay_ms: Some(2_000),
                    parallelization: Some(Parallelization::Sequential),
                    log_level: Some(LogLevel::Info),
                    ..Default::default()
                },
                PerformanceOverride {
                    warn_threshold_ms: Some(10_000),
                    error_threshold_ms: Some(30_000),
                    ..Default::default()
                },
            ),
            Profile::Performance => (
                CleanupOptionsOverride {
                    timeout_ms: Some(120_000),
                    batch_size: Some(10_000),
                    verify_cleanup: Some(false),
                    parallelization: Some(Parallelization::Parallel),
                    log_level: Some(LogLevel::Error),
                    ..Default::default()
                },
                PerformanceOverride {
                    warn_threshold_ms: Some(30_000),
                    error_threshold_ms: Some(90_000),
                    ..Default::default()
                },
            ),
        };

        CleanupConfigOverride {
            options: Some(options),
            performance: Some(performance),
            logging: None,
        }
    }

    pub fn apply(&self, config: &CleanupConfig) -> CleanupConfig {
        config.merged(&self.overrides())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = CleanupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "test" | "automated-test" => Ok(Profile::Test),
            "ci" | "continuous-integration" => Ok(Profile::Ci),
            "performance" | "perf" => Ok(Profile::Performance),
            other => Err(CleanupError::configuration(format!(
                "Unknown profile '{}'",
                other
            ))),
        }
    }
}

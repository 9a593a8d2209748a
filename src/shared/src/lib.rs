//! Shared types for multi-backend test database cleanup
//!
//! Everything that crosses crate boundaries lives here: the backend kind enum,
//! cleanup and verification results, the layered cleanup options, environment
//! profiles and the error taxonomy.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    CleanupConfig, CleanupConfigOverride, CleanupOptions, CleanupOptionsOverride, LogLevel,
    LoggingConfig, LoggingOverride, Parallelization, PerformanceOverride, PerformanceThresholds,
    Profile, MAX_TIMEOUT_MS,
};
pub use error::{CleanupError, CleanupOutcome, FailureKind};
pub use types::*;

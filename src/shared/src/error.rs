//! Error taxonomy for cleanup operations
//!
//! Errors scoped to one named object (a table, a key pattern, a collection) are
//! never raised: strategies convert them into [`CleanupFailure`] records on the
//! result. The variants below are what crosses an API boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BackendKind, CleanupFailure};

/// Result type alias for cleanup operations
pub type CleanupOutcome<T> = Result<T, CleanupError>;

#[derive(Error, Debug)]
pub enum CleanupError {
    /// Backend unreachable or authentication failure
    #[error("Connection error on {backend}: {message}")]
    Connection { backend: BackendKind, message: String },

    /// A delete/scan failed for one named object
    #[error("Operation on {backend} failed for '{target}': {message}")]
    Operation {
        backend: BackendKind,
        target: String,
        message: String,
    },

    #[error("{backend} operation timed out after {timeout_ms}ms")]
    Timeout { backend: BackendKind, timeout_ms: u64 },

    /// A verification check itself failed
    #[error("Verification error on {backend}: {message}")]
    Verification { backend: BackendKind, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No cleanup strategy registered for {backend}")]
    StrategyNotRegistered { backend: BackendKind },

    #[error("Baseline is not clean on {count} backend(s): {summary}")]
    DirtyBaseline { count: usize, summary: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CleanupError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(backend: BackendKind, message: S) -> Self {
        Self::Connection {
            backend,
            message: message.into(),
        }
    }

    pub fn operation<T: Into<String>, S: Into<String>>(
        backend: BackendKind,
        target: T,
        message: S,
    ) -> Self {
        Self::Operation {
            backend,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn verification<S: Into<String>>(backend: BackendKind, message: S) -> Self {
        Self::Verification {
            backend,
            message: message.into(),
        }
    }

    /// Classification used when the error is recorded on a result
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection { .. } => FailureKind::Connection,
            Self::Operation { .. } | Self::Io(_) | Self::Serialization(_) => {
                FailureKind::Operation
            }
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Verification { .. } | Self::DirtyBaseline { .. } => FailureKind::Verification,
            Self::Configuration { .. } => FailureKind::Configuration,
            Self::StrategyNotRegistered { .. } => FailureKind::NotRegistered,
        }
    }

    /// Backend the error is scoped to, if any
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Self::Connection { backend, .. }
            | Self::Operation { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::Verification { backend, .. }
            | Self::StrategyNotRegistered { backend } => Some(*backend),
            _ => None,
        }
    }

    /// Convert into the serializable record attached to a result
    pub fn to_failure(&self) -> CleanupFailure {
        let target = match self {
            Self::Operation { target, .. } => Some(target.clone()),
            _ => None,
        };

        CleanupFailure {
            kind: self.kind(),
            target,
            message: self.to_string(),
        }
    }
}

/// Serializable error classification carried by results and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    Operation,
    Timeout,
    Verification,
    Configuration,
    NotRegistered,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Connection => "connection",
            FailureKind::Operation => "operation",
            FailureKind::Timeout => "timeout",
            FailureKind::Verification => "verification",
            FailureKind::Configuration => "configuration",
            FailureKind::NotRegistered => "not_registered",
        };
        f.write_str(label)
    }
}

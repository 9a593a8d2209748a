//! Per-backend cleanup strategies
//!
//! A strategy owns one backend driver and implements cleanup, verification and
//! reset against it. Two rules hold for every implementation:
//!
//! - `Err` is returned only when the backend as a whole cannot be worked on
//!   (unreachable, transaction could not start). A failure scoped to one named
//!   object is recorded on the returned result and the strategy moves on.
//! - Cleanup is idempotent: running it on a clean backend succeeds with zero
//!   records removed.

use async_trait::async_trait;
use cleanup_shared::{
    BackendKind, CleanupError, CleanupOptions, CleanupOutcome, CleanupPerformanceMetrics,
    CleanupResult, CleanupVerificationResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::drivers::{CollectionStats, DriverError, KeyValueInfo, VectorCollectionInfo};

mod document;
mod key_value;
mod metrics;
mod naming;
mod relational;
mod vector;

pub use document::{DocumentCleanupStrategy, DocumentStrategyConfig};
pub use key_value::{KeyValueCleanupStrategy, KeyValueStrategyConfig};
pub use naming::NamingConvention;
pub use relational::{RelationalCleanupStrategy, RelationalStrategyConfig};
pub use vector::{VectorCleanupStrategy, VectorStrategyConfig};

#[async_trait]
pub trait CleanupStrategy: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Remove test data from the backend
    async fn cleanup(&self, options: &CleanupOptions) -> CleanupOutcome<CleanupResult>;

    /// Inspect the backend for residual data and health problems
    async fn verify(&self, options: &CleanupOptions)
        -> CleanupOutcome<CleanupVerificationResult>;

    /// Return the backend to a known empty state
    async fn reset(&self, options: &CleanupOptions) -> CleanupOutcome<CleanupResult> {
        self.cleanup(options).await
    }

    /// Metrics of the most recent cleanup, if one has run
    fn performance_metrics(&self) -> Option<CleanupPerformanceMetrics>;

    /// Raw engine statistics used by deep verification
    async fn health_snapshot(&self) -> CleanupOutcome<BackendHealth>;
}

/// A sequence that has issued ids, with the row count of its owning table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSnapshot {
    pub sequence: String,
    pub table: String,
    pub last_value: i64,
    pub table_rows: u64,
}

impl SequenceSnapshot {
    /// Sequence still advanced although its table is empty
    pub fn is_orphaned(&self) -> bool {
        self.table_rows == 0 && self.last_value > 0
    }
}

/// Backend-specific health statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendHealth {
    Relational {
        table_count: u64,
        waiting_locks: u64,
        active_transactions: u64,
        sequences: Vec<SequenceSnapshot>,
    },
    Document {
        active_operations: u64,
        collections: BTreeMap<String, CollectionStats>,
    },
    KeyValue {
        db_size: u64,
        info: KeyValueInfo,
    },
    VectorIndex {
        collections: BTreeMap<String, VectorCollectionInfo>,
    },
}

impl BackendHealth {
    pub fn backend(&self) -> BackendKind {
        match self {
            BackendHealth::Relational { .. } => BackendKind::Relational,
            BackendHealth::Document { .. } => BackendKind::Document,
            BackendHealth::KeyValue { .. } => BackendKind::KeyValue,
            BackendHealth::VectorIndex { .. } => BackendKind::VectorIndex,
        }
    }
}

pub(crate) fn connection_error(backend: BackendKind, error: DriverError) -> CleanupError {
    CleanupError::connection(backend, error.to_string())
}

pub(crate) fn verification_error(backend: BackendKind, error: DriverError) -> CleanupError {
    CleanupError::verification(backend, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orphaned_sequence() {
        let mut snapshot = SequenceSnapshot {
            sequence: "users_id_seq".to_string(),
            table: "users".to_string(),
            last_value: 12,
            table_rows: 0,
        };
        assert!(snapshot.is_orphaned());

        snapshot.table_rows = 3;
        assert!(!snapshot.is_orphaned());
    }

    #[test]
    fn test_health_is_tagged_by_backend() {
        let health = BackendHealth::KeyValue {
            db_size: 4,
            info: KeyValueInfo::default(),
        };
        assert_eq!(health.backend(), BackendKind::KeyValue);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["backend"], "key_value");
    }
}

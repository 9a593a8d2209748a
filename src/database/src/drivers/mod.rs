//! Backend capability traits
//!
//! Strategies never talk to a client library directly. Each backend is reached
//! through one of the traits below, which expose only what cleanup and
//! verification need. Production adapters live in the feature-gated submodules;
//! [`crate::memory`] provides in-memory implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "mongodb")]
pub mod mongodb;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "qdrant")]
pub mod qdrant;
#[cfg(feature = "redis")]
pub mod redis;

/// Errors raised by backend drivers
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] ::mongodb::error::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[cfg(feature = "qdrant")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Relational
// ============================================================================

/// Whether identity columns restart when a table is truncated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    Restart,
    Continue,
}

impl IdentityMode {
    pub fn from_reset_flag(reset_sequences: bool) -> Self {
        if reset_sequences {
            IdentityMode::Restart
        } else {
            IdentityMode::Continue
        }
    }
}

/// Current position of a sequence and the table that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    pub name: String,
    pub owner_table: Option<String>,
    /// `None` until the sequence has been advanced at least once
    pub last_value: Option<i64>,
}

/// A foreign key from `table` to `references`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub references: String,
}

impl ForeignKey {
    pub fn new<T: Into<String>, R: Into<String>>(table: T, references: R) -> Self {
        Self {
            table: table.into(),
            references: references.into(),
        }
    }

    pub fn is_self_reference(&self) -> bool {
        self.table == self.references
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelationalDriver: Send + Sync {
    async fn ping(&self) -> DriverResult<()>;

    /// User tables in the managed schema, sorted by name
    async fn list_tables(&self) -> DriverResult<Vec<String>>;

    async fn count_rows(&self, table: &str) -> DriverResult<u64>;

    /// Foreign keys pointing at tables in the managed schema. The referencing
    /// table may live in another schema.
    async fn foreign_keys(&self) -> DriverResult<Vec<ForeignKey>>;

    async fn begin(&self) -> DriverResult<Box<dyn RelationalTransaction>>;

    /// Reclaim storage after a large delete; runs outside any transaction
    async fn vacuum(&self, table: &str) -> DriverResult<()>;

    async fn sequences(&self) -> DriverResult<Vec<SequenceState>>;

    /// Other sessions currently inside a transaction
    async fn active_transactions(&self) -> DriverResult<u64>;

    /// Lock requests that have not been granted
    async fn waiting_locks(&self) -> DriverResult<u64>;
}

/// A single open transaction. Dropping it without commit rolls back.
#[async_trait]
pub trait RelationalTransaction: Send {
    /// Defer checks of DEFERRABLE foreign keys until commit
    async fn defer_constraints(&mut self) -> DriverResult<()>;

    async fn restore_constraints(&mut self) -> DriverResult<()>;

    async fn savepoint(&mut self, name: &str) -> DriverResult<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()>;

    async fn release_savepoint(&mut self, name: &str) -> DriverResult<()>;

    async fn count_rows(&mut self, table: &str) -> DriverResult<u64>;

    /// Truncate `tables` in one statement. Fails if a table outside the list
    /// references one inside it.
    async fn truncate(&mut self, tables: &[String], identity: IdentityMode) -> DriverResult<()>;

    /// Delete at most `limit` rows, returning how many went
    async fn delete_batch(&mut self, table: &str, limit: u64) -> DriverResult<u64>;

    /// Restart every sequence owned by `table`
    async fn restart_sequences(&mut self, table: &str) -> DriverResult<()>;

    async fn commit(self: Box<Self>) -> DriverResult<()>;

    async fn rollback(self: Box<Self>) -> DriverResult<()>;
}

// ============================================================================
// Document
// ============================================================================

/// Which documents in a collection an operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFilter {
    All,
    /// Documents carrying a test marker field
    TestMarked,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub documents: u64,
    pub size_bytes: u64,
    pub index_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentServerStatus {
    pub active_operations: u64,
    pub current_connections: u64,
}

#[async_trait]
pub trait DocumentDriver: Send + Sync {
    async fn ping(&self) -> DriverResult<()>;

    async fn list_collections(&self) -> DriverResult<Vec<String>>;

    async fn count_documents(&self, collection: &str, filter: DocumentFilter) -> DriverResult<u64>;

    /// Delete matching documents, at most `limit` when given
    async fn delete_documents(
        &self,
        collection: &str,
        filter: DocumentFilter,
        limit: Option<u64>,
    ) -> DriverResult<u64>;

    /// Drop a collection; dropping a missing collection succeeds
    async fn drop_collection(&self, collection: &str) -> DriverResult<()>;

    async fn collection_stats(&self, collection: &str) -> DriverResult<CollectionStats>;

    async fn server_status(&self) -> DriverResult<DocumentServerStatus>;
}

// ============================================================================
// Key-value
// ============================================================================

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(u64),
}

impl KeyTtl {
    /// Key is gone or its lifetime has run out
    pub fn is_lapsed(&self) -> bool {
        matches!(self, KeyTtl::Missing | KeyTtl::Expires(0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueInfo {
    pub used_memory: u64,
    pub peak_memory: u64,
    /// Zero when no limit is configured
    pub max_memory: u64,
    pub keys_with_expiry: u64,
    pub connected_clients: u64,
    pub blocked_clients: u64,
}

impl KeyValueInfo {
    pub fn memory_ratio(&self) -> Option<f64> {
        (self.max_memory > 0).then(|| self.used_memory as f64 / self.max_memory as f64)
    }
}

#[async_trait]
pub trait KeyValueDriver: Send + Sync {
    async fn ping(&self) -> DriverResult<()>;

    /// Keys matching a glob pattern, deduplicated
    async fn scan(&self, pattern: &str, count_hint: u64) -> DriverResult<Vec<String>>;

    /// Like [`scan`](Self::scan), but stops walking the keyspace once `limit`
    /// keys have been collected
    async fn scan_at_most(
        &self,
        pattern: &str,
        count_hint: u64,
        limit: u64,
    ) -> DriverResult<Vec<String>>;

    async fn delete(&self, keys: &[String]) -> DriverResult<u64>;

    async fn ttl(&self, key: &str) -> DriverResult<KeyTtl>;

    async fn db_size(&self) -> DriverResult<u64>;

    async fn info(&self) -> DriverResult<KeyValueInfo>;
}

// ============================================================================
// Vector index
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(String),
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointId::Num(id) => write!(f, "{}", id),
            PointId::Uuid(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorCollectionInfo {
    pub points_count: u64,
    pub vector_size: u64,
    /// Optimizer status as reported by the engine (`green`, `yellow`, `red`)
    pub status: String,
}

impl VectorCollectionInfo {
    pub fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("green")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollPage {
    pub ids: Vec<PointId>,
    pub next_offset: Option<PointId>,
}

#[async_trait]
pub trait VectorDriver: Send + Sync {
    async fn ping(&self) -> DriverResult<()>;

    async fn list_collections(&self) -> DriverResult<Vec<String>>;

    async fn collection_info(&self, collection: &str) -> DriverResult<VectorCollectionInfo>;

    async fn scroll(
        &self,
        collection: &str,
        limit: u64,
        offset: Option<PointId>,
    ) -> DriverResult<ScrollPage>;

    async fn delete_points(&self, collection: &str, ids: &[PointId]) -> DriverResult<u64>;

    /// Delete a collection; deleting a missing collection succeeds
    async fn delete_collection(&self, collection: &str) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lapsed_ttl() {
        assert!(KeyTtl::Missing.is_lapsed());
        assert!(KeyTtl::Expires(0).is_lapsed());
        assert!(!KeyTtl::Expires(30).is_lapsed());
        assert!(!KeyTtl::Persistent.is_lapsed());
    }

    #[test]
    fn test_memory_ratio_requires_limit() {
        let mut info = KeyValueInfo {
            used_memory: 800,
            ..Default::default()
        };
        assert_eq!(info.memory_ratio(), None);

        info.max_memory = 1_000;
        assert_eq!(info.memory_ratio(), Some(0.8));
    }

    #[test]
    fn test_point_id_accepts_numbers_and_uuids() {
        let ids: Vec<PointId> =
            serde_json::from_str(r#"[7, "5c56c793-69f3-4fbf-87e6-c4bf54c28c26"]"#).unwrap();
        assert_eq!(ids[0], PointId::Num(7));
        assert_eq!(ids[1].to_string(), "5c56c793-69f3-4fbf-87e6-c4bf54c28c26");
    }
}

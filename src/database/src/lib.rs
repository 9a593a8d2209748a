//! Backend drivers and cleanup strategies for test databases
//!
//! The crate is split in three layers:
//!
//! - [`drivers`]: the capability traits each backend client must provide
//!   (list objects, count, delete, transactions, health statistics) plus
//!   feature-gated adapters for `sqlx` (PostgreSQL), `mongodb`, `redis` and the
//!   Qdrant REST API.
//! - [`memory`]: in-memory drivers with fault injection, used by tests and dry
//!   runs.
//! - [`strategies`]: the four per-backend cleanup strategies behind the
//!   [`CleanupStrategy`] trait.
//!
//! Connection pools are built by the caller and handed to a driver; nothing in
//! here opens connections on its own except the explicit `connect` helpers.

pub mod drivers;
pub mod memory;
pub mod strategies;

pub use drivers::{
    CollectionStats, DocumentDriver, DocumentFilter, DocumentServerStatus, DriverError,
    DriverResult, ForeignKey, IdentityMode, KeyTtl, KeyValueDriver, KeyValueInfo, PointId,
    RelationalDriver, RelationalTransaction, ScrollPage, SequenceState, VectorCollectionInfo,
    VectorDriver,
};
pub use strategies::{
    BackendHealth, CleanupStrategy, DocumentCleanupStrategy, DocumentStrategyConfig,
    KeyValueCleanupStrategy, KeyValueStrategyConfig, NamingConvention, RelationalCleanupStrategy,
    RelationalStrategyConfig, SequenceSnapshot, VectorCleanupStrategy, VectorStrategyConfig,
};

#[cfg(feature = "mongodb")]
pub use drivers::mongodb::MongoDriver;
#[cfg(feature = "postgres")]
pub use drivers::postgres::PostgresDriver;
#[cfg(feature = "qdrant")]
pub use drivers::qdrant::QdrantDriver;
#[cfg(feature = "redis")]
pub use drivers::redis::RedisDriver;

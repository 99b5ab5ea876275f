//! SQLite persistence for Umbra shadow documents and sync records,
//! plus the disk-capacity gate that guards local writes.

pub mod capacity;
pub mod pool;
pub mod repository;

pub use capacity::{CapacityGate, DirUsageSource, DiskUsageWatcher};
pub use pool::DatabasePool;
pub use repository::SqliteShadowStore;

use thiserror::Error;

use umbra_core::SyncError;

/// Errors produced by the SQLite store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not open or create the database.
    #[error("database connection failed: {0}")]
    ConnectionFailed(String),

    /// A schema migration did not apply.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// A query failed to execute.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored value could not be decoded.
    #[error("serialization failed: {0}")]
    SerializationError(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Fatal(err.to_string())
    }
}

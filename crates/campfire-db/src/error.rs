//! # Offline Store Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Categorized into the store failure taxonomy   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (campfire-sync) ← Storage faults fail the cycle             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Offline store errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// The underlying engine cannot be opened or has gone away.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A write would exceed the storage quota.
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A transaction failed and was rolled back. Callers retry or surface.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// Entity not found in its container.
    #[error("{container} record not found: {id}")]
    NotFound { container: String, id: String },

    /// The named container is not part of the declared schema.
    #[error("Unknown container: {0}")]
    UnknownContainer(String),

    /// A query named an index field the store cannot express.
    #[error("Invalid index field: {0}")]
    InvalidIndex(String),

    /// A record payload failed to serialize or deserialize.
    #[error("Record serialization failed: {0}")]
    Serialization(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Domain-level rejection (malformed record, bad tag).
    #[error(transparent)]
    Domain(#[from] campfire_core::CoreError),
}

impl DbError {
    /// Creates a NotFound error for a container and ID.
    pub fn not_found(container: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            container: container.into(),
            id: id.into(),
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound      → DbError::NotFound
/// sqlx::Error::Database "full"  → DbError::QuotaExceeded
/// sqlx::Error::PoolTimedOut     → DbError::StorageUnavailable
/// sqlx::Error::PoolClosed       → DbError::StorageUnavailable
/// Other                         → DbError::TransactionAborted
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                container: "record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();

                // SQLITE_FULL surfaces as "database or disk is full"
                if msg.contains("disk is full") || msg.contains("database is full") {
                    DbError::QuotaExceeded(msg)
                } else {
                    DbError::TransactionAborted(msg)
                }
            }

            sqlx::Error::PoolTimedOut => {
                DbError::StorageUnavailable("connection pool exhausted".to_string())
            }

            sqlx::Error::PoolClosed => DbError::StorageUnavailable("pool is closed".to_string()),

            other => DbError::TransactionAborted(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for store operations.
pub type DbResult<T> = Result<T, DbError>;

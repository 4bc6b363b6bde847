//! # Domain Error Types
//!
//! Errors produced by pure domain logic. Store and engine errors carry
//! their own types in their own crates.

use thiserror::Error;

/// Domain-level errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Schema declaration is invalid (bad container name, dangling FK, duplicate).
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Unknown outbox operation tag.
    #[error("Unknown operation: {0}")]
    InvalidOperation(String),

    /// Unknown outbox status tag.
    #[error("Unknown outbox status: {0}")]
    InvalidStatus(String),

    /// Unknown conflict strategy tag.
    #[error("Unknown conflict strategy: {0}")]
    InvalidStrategy(String),

    /// An entity record is structurally unusable (not an object, missing id).
    #[error("Invalid entity record: {0}")]
    InvalidRecord(String),
}

/// Result type for domain operations.
pub type CoreResult<T> = Result<T, CoreError>;

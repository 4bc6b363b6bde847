//! # Sync Error Types
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Check Phase    │  │   Transport     │  │     Storage             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Offline        │  │  Transport      │  │  Storage (DbError)      │ │
//! │  │  Unauthenticated│  │  InvalidResponse│  │  Serialization          │ │
//! │  │  MissingTenant  │  │                 │  │                         │ │
//! │  │  AuthExpired    │  └─────────────────┘  └─────────────────────────┘ │
//! │  │  Connectivity   │                                                   │
//! │  └─────────────────┘  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │                       │  Cancellation   │  │   Configuration         │ │
//! │                       │                 │  │                         │ │
//! │                       │  Aborted        │  │  InvalidConfig          │ │
//! │                       └─────────────────┘  │  ConfigLoad/SaveFailed  │ │
//! │                                            └─────────────────────────┘ │
//! │                                                                         │
//! │  Per-item push failures never carry this type: they land in the        │
//! │  outbox entry (retry_count, last_error) and the cycle continues.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Cycle-level sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Check-Phase Errors
    // =========================================================================
    /// Network unreachable per the host's link-layer hint. The cycle is
    /// skipped, not failed loudly.
    #[error("Network unreachable")]
    Offline,

    /// No auth token in the session. The host must authenticate first.
    #[error("No auth token available")]
    Unauthenticated,

    /// No active organization in the session.
    #[error("No active organization")]
    MissingTenant,

    /// The server rejected the token (401). The host must re-authenticate.
    #[error("Auth token rejected by server")]
    AuthExpired,

    /// The liveness probe failed for a non-auth reason.
    #[error("Connectivity check failed: {0}")]
    ConnectivityFailed(String),

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// The cycle was cooperatively aborted.
    #[error("Sync cycle aborted")]
    Aborted,

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// HTTP transport failure (connection refused, timeout, 5xx).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a shape the engine cannot use.
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Offline store fault. Fatal for the cycle; the engine stays usable.
    #[error(transparent)]
    Storage(#[from] campfire_db::DbError),

    /// Payload serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save the config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Storage(campfire_db::DbError::from(err))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Short machine-readable code carried in sync reports.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SyncError::Offline => "offline",
            SyncError::Unauthenticated => "unauthenticated",
            SyncError::MissingTenant => "missing_tenant",
            SyncError::AuthExpired => "auth_expired",
            SyncError::ConnectivityFailed(_) => "connectivity_failed",
            SyncError::Aborted => "aborted",
            SyncError::Transport(_) => "transport",
            SyncError::InvalidResponse(_) => "invalid_response",
            SyncError::Storage(_) => "storage",
            SyncError::Serialization(_) => "serialization",
            SyncError::InvalidConfig(_) => "invalid_config",
            SyncError::ConfigLoadFailed(_) => "config_load_failed",
            SyncError::ConfigSaveFailed(_) => "config_save_failed",
        }
    }

    /// True when the next lifecycle trigger may simply retry the cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Offline
                | SyncError::ConnectivityFailed(_)
                | SyncError::Transport(_)
                | SyncError::Aborted
        )
    }

    /// True when the host must re-authenticate before the next cycle.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthenticated | SyncError::MissingTenant | SyncError::AuthExpired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_and_auth_classification() {
        assert!(SyncError::Offline.is_retryable());
        assert!(SyncError::Transport("connection refused".into()).is_retryable());
        assert!(!SyncError::AuthExpired.is_retryable());
        assert!(SyncError::AuthExpired.is_auth_error());
        assert!(SyncError::Unauthenticated.is_auth_error());
        assert!(!SyncError::Offline.is_auth_error());
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(SyncError::Offline.reason_code(), "offline");
        assert_eq!(SyncError::AuthExpired.reason_code(), "auth_expired");
        assert_eq!(SyncError::Aborted.reason_code(), "aborted");
    }
}

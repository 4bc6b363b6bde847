//! # Sync Configuration
//!
//! Configuration for the engine and the lifecycle, loadable from a TOML
//! file with defaults for every field.
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [api]
//! base_url = "https://api.campfire.app/v1/"
//! probe_path = "health"
//! tenant_header = "X-Organization-Id"
//!
//! [engine]
//! outbox_retention_days = 7
//! mapping_retention_days = 30
//!
//! [lifecycle]
//! initial_delay_ms = 2000
//! online_delay_ms = 1500
//! login_delay_ms = 3000
//! visibility_delay_ms = 2000
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sections
// =============================================================================

/// Server endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Base URL every collection path is joined onto.
    pub base_url: String,

    /// Cheap endpoint used as the liveness probe (HEAD).
    pub probe_path: String,

    /// Header carrying the active organization ID.
    pub tenant_header: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: "http://localhost:8080/".to_string(),
            probe_path: "health".to_string(),
            tenant_header: "X-Organization-Id".to_string(),
        }
    }
}

/// Engine housekeeping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Synced outbox entries older than this are purged at reconcile.
    pub outbox_retention_days: u32,

    /// ID mappings older than this are purged at reconcile.
    pub mapping_retention_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            outbox_retention_days: 7,
            mapping_retention_days: 30,
        }
    }
}

impl EngineSettings {
    pub fn outbox_retention_ms(&self) -> i64 {
        i64::from(self.outbox_retention_days) * 24 * 60 * 60 * 1000
    }

    pub fn mapping_retention_ms(&self) -> i64 {
        i64::from(self.mapping_retention_days) * 24 * 60 * 60 * 1000
    }
}

/// Trigger debounce delays. Triggers always schedule through a tracked
/// timer, never calling the engine inline, so quick network blips coalesce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Delay after `init_sync` before the first cycle.
    pub initial_delay_ms: u64,

    /// Delay after a network-restored signal.
    pub online_delay_ms: u64,

    /// Delay after a user-logged-in signal.
    pub login_delay_ms: u64,

    /// Delay after the application becomes visible again.
    pub visibility_delay_ms: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        LifecycleSettings {
            initial_delay_ms: 2_000,
            online_delay_ms: 1_500,
            login_delay_ms: 3_000,
            visibility_delay_ms: 2_000,
        }
    }
}

// =============================================================================
// SyncConfig
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiSettings,
    pub engine: EngineSettings,
    pub lifecycle: LifecycleSettings,
}

impl SyncConfig {
    /// Defaults with the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        SyncConfig {
            api: ApiSettings {
                base_url: base_url.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Loads from the given path, or from the platform config dir when none
    /// is given.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let path = match config_path {
            Some(p) => p,
            None => Self::default_config_path()?,
        };

        debug!(path = %path.display(), "Loading sync config");
        let text = std::fs::read_to_string(&path)?;
        let config: SyncConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config file, falling back to defaults when it is missing
    /// or unreadable.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        match Self::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                info!(error = %e, "Using default sync config");
                SyncConfig::default()
            }
        }
    }

    /// Writes the config to the given path, or the platform config dir.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = match config_path {
            Some(p) => p,
            None => Self::default_config_path()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(&path, text)?;
        info!(path = %path.display(), "Saved sync config");
        Ok(())
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(SyncError::InvalidConfig("api.base_url is empty".into()));
        }
        reqwest::Url::parse(&self.api.base_url)
            .map_err(|e| SyncError::InvalidConfig(format!("api.base_url: {e}")))?;
        if self.api.tenant_header.trim().is_empty() {
            return Err(SyncError::InvalidConfig("api.tenant_header is empty".into()));
        }
        Ok(())
    }

    fn default_config_path() -> SyncResult<PathBuf> {
        let dirs = directories::ProjectDirs::from("app", "campfire", "campfire")
            .ok_or_else(|| SyncError::ConfigLoadFailed("no home directory".into()))?;
        Ok(dirs.config_dir().join("sync.toml"))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_carry_the_spec_delays() {
        let config = SyncConfig::default();
        config.validate().unwrap();

        assert_eq!(config.lifecycle.initial_delay_ms, 2_000);
        assert_eq!(config.lifecycle.online_delay_ms, 1_500);
        assert_eq!(config.lifecycle.login_delay_ms, 3_000);
        assert_eq!(config.engine.outbox_retention_days, 7);
        assert_eq!(
            config.engine.outbox_retention_ms(),
            7 * 24 * 60 * 60 * 1000
        );
    }

    #[test]
    fn validation_rejects_unusable_urls() {
        let mut config = SyncConfig::default();
        config.api.base_url = String::new();
        assert!(config.validate().is_err());

        config.api.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_settings() {
        let mut config = SyncConfig::new("https://api.example.org/v1/");
        config.engine.outbox_retention_days = 3;
        config.lifecycle.online_delay_ms = 250;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SyncConfig = toml::from_str(&text).unwrap();

        assert_eq!(parsed.api.base_url, "https://api.example.org/v1/");
        assert_eq!(parsed.engine.outbox_retention_days, 3);
        assert_eq!(parsed.lifecycle.online_delay_ms, 250);
    }

    #[test]
    fn partial_files_fall_back_to_defaults_per_field() {
        let parsed: SyncConfig =
            toml::from_str("[api]\nbase_url = \"https://api.example.org/\"\n").unwrap();
        assert_eq!(parsed.api.base_url, "https://api.example.org/");
        assert_eq!(parsed.api.probe_path, "health");
        assert_eq!(parsed.lifecycle.login_delay_ms, 3_000);
    }

    #[test]
    fn load_save_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");

        let config = SyncConfig::new("https://api.example.org/");
        config.save(Some(path.clone())).unwrap();

        let loaded = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.api.base_url, "https://api.example.org/");
    }

    #[test]
    fn load_or_default_swallows_missing_files() {
        let config = SyncConfig::load_or_default(Some(PathBuf::from("/nonexistent/sync.toml")));
        assert_eq!(config.api.probe_path, "health");
    }
}

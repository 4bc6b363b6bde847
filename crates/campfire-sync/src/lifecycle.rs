//! # Sync Lifecycle
//!
//! Deterministically attaches and detaches the sync system to the host
//! application.
//!
//! ## Trigger Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncLifecycle                                    │
//! │                                                                         │
//! │  init_sync()            ──► engine.init() + timer(initial, 2.0 s)      │
//! │  network restored       ──► timer(online, 1.5 s)                       │
//! │  application visible    ──► timer(visible, 2.0 s)  only when the       │
//! │                             outbox has pending entries                 │
//! │  user logged in         ──► timer(login, 3.0 s)                        │
//! │                                                                         │
//! │  A trigger never calls sync() inline: it always schedules through a    │
//! │  tracked, cancellable timer, so quick network blips coalesce into one  │
//! │  cycle. Re-triggering replaces the pending timer for that trigger.     │
//! │                                                                         │
//! │  cleanup_sync()         ──► cancel timers, detach                      │
//! │  trigger_manual_sync()  ──► delegates straight to engine.sync()        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use campfire_db::{ConflictRepository, OfflineStore, OutboxManager};

use crate::engine::{SyncEngine, SyncMetrics, SyncOptions, SyncReport};
use crate::error::SyncResult;

// =============================================================================
// Triggers
// =============================================================================

/// The events that may schedule a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SyncTrigger {
    Initial,
    NetworkRestored,
    Visible,
    Login,
}

impl SyncTrigger {
    fn as_str(self) -> &'static str {
        match self {
            SyncTrigger::Initial => "initial",
            SyncTrigger::NetworkRestored => "network_restored",
            SyncTrigger::Visible => "visible",
            SyncTrigger::Login => "login",
        }
    }
}

// =============================================================================
// Sync State
// =============================================================================

/// Engine metrics merged with lifecycle flags, for the host's status view.
#[derive(Debug, Clone, Serialize)]
pub struct SyncState {
    pub initialized: bool,
    pub syncing: bool,
    pub network_available: bool,
    pub pending_outbox: i64,
    pub unresolved_conflicts: i64,
    pub metrics: SyncMetrics,
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Orchestrator owning the engine's triggers and timers.
pub struct SyncLifecycle {
    engine: Arc<SyncEngine>,
    outbox: OutboxManager,
    conflicts: ConflictRepository,
    initialized: AtomicBool,
    timers: Mutex<HashMap<SyncTrigger, JoinHandle<()>>>,
}

impl SyncLifecycle {
    pub fn new(engine: Arc<SyncEngine>, store: &OfflineStore) -> Self {
        SyncLifecycle {
            engine,
            outbox: OutboxManager::new(store.clone()),
            conflicts: ConflictRepository::new(store.clone()),
            initialized: AtomicBool::new(false),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent attach: initializes the engine and schedules the first
    /// cycle. A second call is a no-op.
    pub async fn init_sync(&self) -> SyncResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("init_sync called twice, ignoring");
            return Ok(());
        }

        self.engine.init().await?;
        self.schedule(
            SyncTrigger::Initial,
            self.engine.config().lifecycle.initial_delay_ms,
        );
        info!("Sync lifecycle attached");
        Ok(())
    }

    /// Cancels every pending timer and detaches. A later `init_sync`
    /// re-attaches.
    pub fn cleanup_sync(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        let mut timers = self.lock_timers();
        for (trigger, handle) in timers.drain() {
            debug!(trigger = trigger.as_str(), "Cancelling sync timer");
            handle.abort();
        }
        info!("Sync lifecycle detached");
    }

    /// Host signal: the network came back. Quick on/off blips coalesce into
    /// a single scheduled cycle.
    pub fn notify_network_restored(&self) {
        self.engine.set_network_available(true);
        if !self.is_initialized() {
            return;
        }
        self.schedule(
            SyncTrigger::NetworkRestored,
            self.engine.config().lifecycle.online_delay_ms,
        );
    }

    /// Host signal: the network went away. Nothing is scheduled; the engine
    /// skips cycles until restored.
    pub fn notify_network_lost(&self) {
        self.engine.set_network_available(false);
    }

    /// Host signal: the application became visible after being hidden. A
    /// cycle is only worth scheduling when local work is waiting.
    pub async fn notify_app_visible(&self) -> SyncResult<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        let pending = self.outbox.get_pending_count().await?;
        if pending > 0 {
            debug!(pending, "Visibility restored with pending outbox work");
            self.schedule(
                SyncTrigger::Visible,
                self.engine.config().lifecycle.visibility_delay_ms,
            );
        }
        Ok(())
    }

    /// Host signal: a user logged in.
    pub fn notify_user_logged_in(&self) {
        if !self.is_initialized() {
            return;
        }
        self.schedule(
            SyncTrigger::Login,
            self.engine.config().lifecycle.login_delay_ms,
        );
    }

    /// External callers (a UI button) invoke a cycle directly.
    pub async fn trigger_manual_sync(&self, options: SyncOptions) -> SyncReport {
        self.engine.sync(options).await
    }

    /// Engine metrics merged with lifecycle flags.
    pub async fn get_sync_state(&self) -> SyncResult<SyncState> {
        Ok(SyncState {
            initialized: self.is_initialized(),
            syncing: self.engine.is_syncing(),
            network_available: self.engine.is_network_available(),
            pending_outbox: self.outbox.get_pending_count().await?,
            unresolved_conflicts: self.conflicts.count_unresolved().await?,
            metrics: self.engine.get_metrics(),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Replaces the trigger's pending timer with a fresh one.
    fn schedule(&self, trigger: SyncTrigger, delay_ms: u64) {
        let engine = self.engine.clone();
        let mut timers = self.lock_timers();

        if let Some(previous) = timers.remove(&trigger) {
            previous.abort();
        }

        debug!(trigger = trigger.as_str(), delay_ms, "Sync scheduled");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let report = engine.sync(SyncOptions::default()).await;
            if !report.success {
                debug!(
                    trigger = trigger.as_str(),
                    reason = report.reason.as_deref().unwrap_or("unknown"),
                    "Scheduled sync did not complete"
                );
            }
        });
        timers.insert(trigger, handle);
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<SyncTrigger, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SyncLifecycle {
    fn drop(&mut self) {
        let mut timers = self.lock_timers();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::events::NoOpEmitter;
    use crate::session::SharedSession;
    use campfire_core::schema::SchemaRegistry;
    use campfire_db::{DbConfig, Repository, WriteOptions};
    use serde_json::json;

    async fn lifecycle() -> (SyncLifecycle, OfflineStore) {
        let store = OfflineStore::open(DbConfig::in_memory(), SchemaRegistry::standard())
            .await
            .unwrap();
        let engine = Arc::new(
            SyncEngine::new(
                store.clone(),
                SyncConfig::new("http://127.0.0.1:9/"),
                Arc::new(SharedSession::signed_in("jwt", "42")),
                Arc::new(NoOpEmitter),
            )
            .unwrap(),
        );
        (SyncLifecycle::new(engine, &store), store)
    }

    #[tokio::test]
    async fn init_is_idempotent_and_cleanup_reattaches() {
        let (lifecycle, _store) = lifecycle().await;

        lifecycle.init_sync().await.unwrap();
        lifecycle.init_sync().await.unwrap();
        assert!(lifecycle.get_sync_state().await.unwrap().initialized);

        lifecycle.cleanup_sync();
        assert!(!lifecycle.get_sync_state().await.unwrap().initialized);

        lifecycle.init_sync().await.unwrap();
        assert!(lifecycle.get_sync_state().await.unwrap().initialized);
        lifecycle.cleanup_sync();
    }

    #[tokio::test]
    async fn manual_sync_reports_through_the_engine() {
        let (lifecycle, _store) = lifecycle().await;
        lifecycle.init_sync().await.unwrap();

        // Offline hint set: the cycle is skipped with a reason, not an error.
        lifecycle.notify_network_lost();
        let report = lifecycle.trigger_manual_sync(SyncOptions::default()).await;
        assert!(!report.success);
        assert_eq!(report.reason.as_deref(), Some("offline"));
        lifecycle.cleanup_sync();
    }

    #[tokio::test]
    async fn state_merges_engine_metrics_with_queue_counts() {
        let (lifecycle, store) = lifecycle().await;
        lifecycle.init_sync().await.unwrap();

        let groups = Repository::new(&store, "groups").unwrap();
        groups
            .create(json!({"name": "Alpha"}), &WriteOptions::local())
            .await
            .unwrap();

        let state = lifecycle.get_sync_state().await.unwrap();
        assert!(state.initialized);
        assert!(!state.syncing);
        assert!(state.network_available);
        assert_eq!(state.pending_outbox, 1);
        assert_eq!(state.unresolved_conflicts, 0);
        lifecycle.cleanup_sync();
    }

    #[tokio::test]
    async fn triggers_are_ignored_before_init() {
        let (lifecycle, _store) = lifecycle().await;

        // No timers exist yet, and none are created while detached.
        lifecycle.notify_user_logged_in();
        lifecycle.notify_app_visible().await.unwrap();
        assert!(lifecycle.lock_timers().is_empty());
    }
}

//! # Sync Engine
//!
//! The five-phase push/pull pipeline. Exactly one cycle runs at a time; a
//! concurrent call returns `already_syncing` without queuing.
//!
//! ## Cycle Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         One Sync Cycle                                  │
//! │                                                                         │
//! │  CHECK      network hint + token present + HEAD liveness probe         │
//! │    │        (401 → AuthExpired, other failure → ConnectivityFailed)    │
//! │    ▼                                                                    │
//! │  PULL       per type in topological order: GET listing →               │
//! │    │        bulkUpsert (or replaceAllForOrganization on full refresh)  │
//! │    │        per-type failures are logged and skipped, never fatal      │
//! │    ▼                                                                    │
//! │  MERGE      dirty ∧ serverUpdatedAt > localUpdatedAt →                 │
//! │    │        strategy decides: lww/create_wins push through,            │
//! │    │        field_merge/user_resolution park in conflict               │
//! │    ▼                                                                    │
//! │  PUSH       ordered outbox drain: resolve temp IDs, POST/PATCH/DELETE, │
//! │    │        2xx → synced (+ mapping + repair for creates),             │
//! │    │        409 → conflict, other → retry policy                       │
//! │    ▼                                                                    │
//! │  RECONCILE  purge synced outbox + old mappings, stamp lastSync         │
//! │                                                                         │
//! │  abort() is honored at every iteration boundary; an interrupted cycle  │
//! │  is undone by resetInProgress at the next init().                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use campfire_core::schema::EntitySpec;
use campfire_core::temp_id::is_temp_id;
use campfire_core::types::{now_ms, EntityId, EntityRecord, Operation, OutboxEntry};
use campfire_db::repository::entity::DirtyOverlap;
use campfire_db::{
    ConflictRepository, IdMapper, OfflineStore, OutboxManager, Repository, SyncMetaRepository,
};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEventEmitter;
use crate::http::{ApiClient, PushOutcome};
use crate::session::SessionProvider;

// =============================================================================
// Phase, Options, Reports
// =============================================================================

/// The engine's single observable phase variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Check,
    Pull,
    Merge,
    Push,
    Reconcile,
    Complete,
    Error,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Check => "check",
            SyncPhase::Pull => "pull",
            SyncPhase::Merge => "merge",
            SyncPhase::Push => "push",
            SyncPhase::Reconcile => "reconcile",
            SyncPhase::Complete => "complete",
            SyncPhase::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for one cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Use `replace_all_for_organization` so stale clean records are pruned.
    pub full_refresh: bool,

    /// Restrict the pull to these entity types. Push always drains the full
    /// outbox.
    pub entity_types: Option<Vec<String>>,
}

/// Outcome of one `sync()` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub success: bool,

    /// Machine-readable code when `success` is false (`already_syncing`,
    /// `offline`, `auth_expired`, ...).
    pub reason: Option<String>,

    /// Per-cycle correlation UUID. Absent when the cycle guard skipped the
    /// call.
    pub correlation_id: Option<String>,

    pub pulled: u64,
    pub pushed: u64,
    pub conflicts: u64,
    pub failed: u64,
    pub duration_ms: u64,
}

/// Engine metrics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncMetrics {
    pub phase: SyncPhase,
    pub last_sync: Option<i64>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub last_duration_ms: Option<u64>,
    /// Most recent errors, oldest first, capped at ten.
    pub last_errors: Vec<String>,
}

const MAX_TRACKED_ERRORS: usize = 10;

#[derive(Debug, Default)]
struct CycleStats {
    pulled: u64,
    pushed: u64,
    conflicts: u64,
    failed: u64,
}

struct PullOutcome {
    pulled: u64,
    /// `(entity_type, overlap)` for every dirty record the pull also
    /// delivered; the merge phase consumes the server copies.
    overlaps: Vec<(String, DirtyOverlap)>,
}

#[derive(Debug, Default)]
struct PushStats {
    pushed: u64,
    conflicts: u64,
    failed: u64,
}

enum PushResult {
    Synced,
    Conflicted,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// The five-phase sync pipeline over one offline store.
pub struct SyncEngine {
    store: OfflineStore,
    outbox: OutboxManager,
    id_mapper: IdMapper,
    meta: SyncMetaRepository,
    conflicts: ConflictRepository,
    api: ApiClient,
    session: Arc<dyn SessionProvider>,
    emitter: Arc<dyn SyncEventEmitter>,
    config: SyncConfig,

    /// Host-reported link-layer hint (`offlineStatusChanged` consumed).
    network_available: AtomicBool,
    /// Cycle guard: at most one cycle process-wide.
    syncing: AtomicBool,
    /// Cooperative cancellation, checked at iteration boundaries.
    abort_flag: AtomicBool,
    metrics: Mutex<SyncMetrics>,
}

impl SyncEngine {
    pub fn new(
        store: OfflineStore,
        config: SyncConfig,
        session: Arc<dyn SessionProvider>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let api = ApiClient::new(&config.api, session.clone())?;

        Ok(SyncEngine {
            outbox: OutboxManager::new(store.clone()),
            id_mapper: IdMapper::new(store.clone()),
            meta: SyncMetaRepository::new(store.clone()),
            conflicts: ConflictRepository::new(store.clone()),
            store,
            api,
            session,
            emitter,
            config,
            network_available: AtomicBool::new(true),
            syncing: AtomicBool::new(false),
            abort_flag: AtomicBool::new(false),
            metrics: Mutex::new(SyncMetrics::default()),
        })
    }

    /// Resets interrupted outbox entries and loads `lastSync`. Run once at
    /// application start, before the first cycle.
    pub async fn init(&self) -> SyncResult<()> {
        let reset = self.outbox.reset_in_progress().await?;
        let last_sync = self.meta.last_sync().await?;
        {
            let mut metrics = self.lock_metrics();
            metrics.last_sync = last_sync;
        }
        info!(reset, ?last_sync, "Sync engine initialized");
        Ok(())
    }

    /// Host-reported network reachability.
    pub fn set_network_available(&self, available: bool) {
        self.network_available.store(available, Ordering::SeqCst);
    }

    pub fn is_network_available(&self) -> bool {
        self.network_available.load(Ordering::SeqCst)
    }

    /// Cooperatively cancels the in-flight cycle at the next iteration
    /// boundary. No-op when idle.
    pub fn abort(&self) {
        self.abort_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn get_metrics(&self) -> SyncMetrics {
        self.lock_metrics().clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Counts the host cares about between cycles.
    pub async fn pending_outbox_count(&self) -> SyncResult<i64> {
        Ok(self.outbox.get_pending_count().await?)
    }

    pub async fn unresolved_conflict_count(&self) -> SyncResult<i64> {
        Ok(self.conflicts.count_unresolved().await?)
    }

    /// Runs one Check → Pull → Merge → Push → Reconcile cycle.
    pub async fn sync(&self, options: SyncOptions) -> SyncReport {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync requested while a cycle is active");
            return SyncReport {
                success: false,
                reason: Some("already_syncing".to_string()),
                ..Default::default()
            };
        }

        self.abort_flag.store(false, Ordering::SeqCst);
        let correlation_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(correlation_id = %correlation_id, full_refresh = options.full_refresh, "Sync cycle starting");
        self.emitter.sync_started(&correlation_id);

        let outcome = self.run_cycle(&options).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.syncing.store(false, Ordering::SeqCst);

        match outcome {
            Ok(stats) => {
                self.set_phase(SyncPhase::Complete);
                {
                    let mut metrics = self.lock_metrics();
                    metrics.cycles_completed += 1;
                    metrics.last_duration_ms = Some(duration_ms);
                }
                let report = SyncReport {
                    success: true,
                    reason: None,
                    correlation_id: Some(correlation_id.clone()),
                    pulled: stats.pulled,
                    pushed: stats.pushed,
                    conflicts: stats.conflicts,
                    failed: stats.failed,
                    duration_ms,
                };
                info!(
                    pulled = report.pulled,
                    pushed = report.pushed,
                    conflicts = report.conflicts,
                    failed = report.failed,
                    duration_ms,
                    "Sync cycle complete"
                );
                self.emitter.sync_completed(&correlation_id, &report);
                report
            }
            Err(error) => {
                let failed_phase = self.phase();
                self.set_phase(SyncPhase::Error);
                {
                    let mut metrics = self.lock_metrics();
                    metrics.cycles_failed += 1;
                    metrics.last_duration_ms = Some(duration_ms);
                }
                self.record_error(format!("{failed_phase}: {error}"));
                warn!(phase = %failed_phase, error = %error, "Sync cycle failed");
                self.emitter.sync_failed(&correlation_id, &error, failed_phase);
                SyncReport {
                    success: false,
                    reason: Some(error.reason_code().to_string()),
                    correlation_id: Some(correlation_id),
                    duration_ms,
                    ..Default::default()
                }
            }
        }
    }

    // =========================================================================
    // Phases
    // =========================================================================

    async fn run_cycle(&self, options: &SyncOptions) -> SyncResult<CycleStats> {
        self.set_phase(SyncPhase::Check);
        self.phase_check().await?;
        self.check_abort()?;

        self.set_phase(SyncPhase::Pull);
        let pull = self.phase_pull(options).await?;
        self.check_abort()?;

        self.set_phase(SyncPhase::Merge);
        let merge_conflicts = self.phase_merge(&pull.overlaps).await?;
        self.check_abort()?;

        self.set_phase(SyncPhase::Push);
        let push = self.phase_push().await?;
        self.check_abort()?;

        self.set_phase(SyncPhase::Reconcile);
        self.phase_reconcile().await?;

        Ok(CycleStats {
            pulled: pull.pulled,
            pushed: push.pushed,
            conflicts: merge_conflicts + push.conflicts,
            failed: push.failed,
        })
    }

    /// Phase 1: network hint, credentials, liveness probe.
    async fn phase_check(&self) -> SyncResult<()> {
        if !self.is_network_available() {
            return Err(SyncError::Offline);
        }
        if self.session.token().is_none() {
            return Err(SyncError::Unauthenticated);
        }
        if self.session.organization_id().is_none() {
            return Err(SyncError::MissingTenant);
        }
        self.api.probe().await
    }

    /// Phase 2: pull each type in topological order. Per-type failures are
    /// logged and skipped; a 401 aborts the cycle.
    async fn phase_pull(&self, options: &SyncOptions) -> SyncResult<PullOutcome> {
        let organization_id = self
            .session
            .organization_id()
            .ok_or(SyncError::MissingTenant)?;
        let registry = self.store.registry().clone();
        let mut outcome = PullOutcome {
            pulled: 0,
            overlaps: Vec::new(),
        };

        for spec in registry.specs() {
            self.check_abort()?;
            if let Some(filter) = &options.entity_types {
                if !filter.iter().any(|t| t == &spec.store_name) {
                    continue;
                }
            }

            let listing = match self.api.list(&spec.collection).await {
                Ok(listing) => listing,
                Err(SyncError::AuthExpired) => return Err(SyncError::AuthExpired),
                Err(error) => {
                    warn!(container = %spec.store_name, error = %error, "Pull failed for type, skipping");
                    self.record_error(format!("pull {}: {error}", spec.store_name));
                    continue;
                }
            };

            let received = listing.len();
            let repository = Repository::new(&self.store, &spec.store_name)?;
            if options.full_refresh {
                let report = repository
                    .replace_all_for_organization(&organization_id, listing)
                    .await?;
                outcome.pulled += report.upserted;
            } else {
                let report = repository.bulk_upsert(listing).await?;
                outcome.pulled += report.applied + report.overlaps.len() as u64;
                for overlap in report.overlaps {
                    outcome.overlaps.push((spec.store_name.clone(), overlap));
                }
            }
            debug!(container = %spec.store_name, received, "Pulled type");
        }

        Ok(outcome)
    }

    /// Phase 3: conflict detection over records the pull observed newer
    /// server copies for while a local edit was pending.
    async fn phase_merge(&self, overlaps: &[(String, DirtyOverlap)]) -> SyncResult<u64> {
        let registry = self.store.registry().clone();
        let overlap_index: HashMap<(&str, &str), &EntityRecord> = overlaps
            .iter()
            .map(|(entity_type, overlap)| {
                (
                    (entity_type.as_str(), overlap.entity_id.as_str()),
                    &overlap.server,
                )
            })
            .collect();

        let mut recorded = 0u64;
        for spec in registry.specs() {
            if !spec.conflict_strategy.requires_resolution() {
                // lww pushes through; create_wins cannot conflict.
                continue;
            }

            let repository = Repository::new(&self.store, &spec.store_name)?;
            for record in repository.get_dirty().await? {
                let (Some(local_at), Some(server_at)) =
                    (record.local_updated_at(), record.server_updated_at())
                else {
                    continue;
                };
                if server_at <= local_at {
                    continue;
                }
                let Some(id) = record.id() else {
                    continue;
                };
                let key = id.as_key();
                if self
                    .conflicts
                    .has_unresolved_for(&spec.store_name, &key)
                    .await?
                {
                    continue;
                }

                let server_version = overlap_index
                    .get(&(spec.store_name.as_str(), key.as_str()))
                    .map(|record| record.to_value());

                // Park the pending chain; the entries push again only after
                // resolution emits fresh outbox work.
                let pending = self.outbox.pending_for_entity(&spec.store_name, &key).await?;
                if pending.is_empty() {
                    self.conflicts
                        .insert(
                            &spec.store_name,
                            &key,
                            &record.to_value(),
                            server_version.as_ref(),
                            None,
                        )
                        .await?;
                } else {
                    for entry in &pending {
                        self.outbox
                            .mark_conflict(entry.local_id, server_version.as_ref())
                            .await?;
                    }
                }
                recorded += 1;
                info!(
                    container = %spec.store_name,
                    id = %key,
                    strategy = %spec.conflict_strategy,
                    "Conflict recorded"
                );
            }
        }

        Ok(recorded)
    }

    /// Phase 4: ordered outbox drain.
    async fn phase_push(&self) -> SyncResult<PushStats> {
        let registry = self.store.registry().clone();
        let entries = self.outbox.get_pending_ordered().await?;
        let mut stats = PushStats::default();

        if !entries.is_empty() {
            info!(pending = entries.len(), "Pushing outbox");
        }

        for entry in entries {
            self.check_abort()?;

            let Some(spec) = registry.spec(&entry.entity_type).cloned() else {
                self.outbox
                    .mark_failed(entry.local_id, "unknown entity type")
                    .await?;
                stats.failed += 1;
                continue;
            };

            // Read-only types are pulled, never pushed.
            if spec.read_only {
                self.outbox.mark_synced(entry.local_id, None).await?;
                continue;
            }

            if !self.outbox.are_dependencies_satisfied(&entry).await? {
                debug!(local_id = entry.local_id, "Dependencies unresolved, deferring");
                continue;
            }

            let resolved = self.outbox.resolve_payload_ids(&entry).await?;

            // An update or delete of an entity whose create has not pushed
            // yet waits for the mapping.
            if entry.operation != Operation::Create && is_temp_id(&resolved.entity_id) {
                debug!(local_id = entry.local_id, "Target still temp, deferring");
                continue;
            }

            self.outbox.mark_in_progress(entry.local_id).await?;

            let outcome = match entry.operation {
                Operation::Create => self.push_create(&spec, &resolved).await,
                Operation::Update => self.push_update(&spec, &resolved).await,
                Operation::Delete => self.push_delete(&spec, &resolved).await,
            };

            match outcome {
                Ok(PushResult::Synced) => stats.pushed += 1,
                Ok(PushResult::Conflicted) => stats.conflicts += 1,
                Err(SyncError::AuthExpired) => return Err(SyncError::AuthExpired),
                Err(error) => {
                    self.outbox
                        .mark_failed(entry.local_id, &error.to_string())
                        .await?;
                    stats.failed += 1;
                    self.record_error(format!(
                        "push {} {}: {error}",
                        entry.entity_type, entry.entity_id
                    ));
                }
            }
        }

        Ok(stats)
    }

    /// Phase 5: housekeeping and the lastSync stamp.
    async fn phase_reconcile(&self) -> SyncResult<()> {
        let purged = self
            .outbox
            .purge_synced(self.config.engine.outbox_retention_ms())
            .await?;
        let mappings = self
            .id_mapper
            .purge_old_mappings(self.config.engine.mapping_retention_ms())
            .await?;

        let stamp = now_ms();
        self.meta.set_last_sync(stamp).await?;
        {
            let mut metrics = self.lock_metrics();
            metrics.last_sync = Some(stamp);
        }
        debug!(purged, mappings, "Reconcile complete");
        Ok(())
    }

    // =========================================================================
    // Push Operations
    // =========================================================================

    async fn push_create(
        &self,
        spec: &EntitySpec,
        entry: &OutboxEntry,
    ) -> SyncResult<PushResult> {
        let body = external_payload(entry.payload.as_ref());

        match self
            .api
            .create(&spec.collection, &body, &entry.correlation_id)
            .await?
        {
            PushOutcome::Applied(server_entity) => {
                let server_record = EntityRecord::from_value(server_entity.clone())
                    .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
                let Some(server_id) = server_record.id() else {
                    return Err(SyncError::InvalidResponse(
                        "create response carries no id".to_string(),
                    ));
                };

                // The mapping, the reference repair, and the synced
                // transition commit together: a crash before the commit
                // leaves the entry in_progress, and the next init()'s
                // resetInProgress makes it eligible for replay under the
                // same correlation ID.
                let mut tx = self.store.begin().await?;
                if let Some(temp_id) = entry.temp_id.as_deref() {
                    self.id_mapper
                        .record_mapping_in(&mut tx, &spec.store_name, temp_id, &server_id)
                        .await?;
                }
                self.outbox
                    .mark_synced_in(&mut tx, entry.local_id, Some(&server_entity))
                    .await?;
                tx.commit().await?;

                self.finalize_entity(&spec.store_name, &server_id).await?;
                Ok(PushResult::Synced)
            }
            PushOutcome::Conflict(server_version) => {
                // Concurrent create won a unique constraint; the body echoes
                // the existing server record.
                self.outbox
                    .mark_conflict(entry.local_id, server_version.as_ref())
                    .await?;
                Ok(PushResult::Conflicted)
            }
        }
    }

    async fn push_update(
        &self,
        spec: &EntitySpec,
        entry: &OutboxEntry,
    ) -> SyncResult<PushResult> {
        let patch = external_payload(entry.payload.as_ref());

        match self
            .api
            .update(&spec.collection, &entry.entity_id, &patch, &entry.correlation_id)
            .await?
        {
            PushOutcome::Applied(_server_entity) => {
                self.outbox.mark_synced(entry.local_id, None).await?;
                let id = EntityId::from_key(&entry.entity_id, spec.use_integer_server_ids);
                self.finalize_entity(&spec.store_name, &id).await?;
                Ok(PushResult::Synced)
            }
            PushOutcome::Conflict(server_version) => {
                self.outbox
                    .mark_conflict(entry.local_id, server_version.as_ref())
                    .await?;
                Ok(PushResult::Conflicted)
            }
        }
    }

    async fn push_delete(
        &self,
        spec: &EntitySpec,
        entry: &OutboxEntry,
    ) -> SyncResult<PushResult> {
        self.api
            .delete(&spec.collection, &entry.entity_id, &entry.correlation_id)
            .await?;
        self.outbox.mark_synced(entry.local_id, None).await?;
        Ok(PushResult::Synced)
    }

    /// Clears the entity's dirty flag once its whole outbox chain has
    /// reached `synced`.
    async fn finalize_entity(&self, store_name: &str, id: &EntityId) -> SyncResult<()> {
        if !self
            .outbox
            .has_unsynced_entries(store_name, &id.as_key())
            .await?
        {
            Repository::new(&self.store, store_name)?
                .clear_dirty(id)
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Internal State
    // =========================================================================

    fn phase(&self) -> SyncPhase {
        self.lock_metrics().phase
    }

    fn set_phase(&self, phase: SyncPhase) {
        {
            let mut metrics = self.lock_metrics();
            metrics.phase = phase;
        }
        debug!(phase = %phase, "Sync phase changed");
        self.emitter.sync_phase_changed(phase);
    }

    fn check_abort(&self) -> SyncResult<()> {
        if self.abort_flag.load(Ordering::SeqCst) {
            return Err(SyncError::Aborted);
        }
        Ok(())
    }

    fn record_error(&self, message: String) {
        let mut metrics = self.lock_metrics();
        metrics.last_errors.push(message);
        let overflow = metrics.last_errors.len().saturating_sub(MAX_TRACKED_ERRORS);
        if overflow > 0 {
            metrics.last_errors.drain(..overflow);
        }
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, SyncMetrics> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The wire shape of an outbox payload: internal underscore-prefixed fields
/// and the primary key are stripped; the server assigns identity.
fn external_payload(payload: Option<&Value>) -> Value {
    let Some(Value::Object(fields)) = payload else {
        return Value::Object(Map::new());
    };
    Value::Object(
        fields
            .iter()
            .filter(|(k, _)| !k.starts_with('_') && k.as_str() != "id")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RecordingEmitter, SyncEvent};
    use crate::session::SharedSession;
    use campfire_core::schema::SchemaRegistry;
    use campfire_db::{DbConfig, WriteOptions};
    use serde_json::json;

    async fn engine_with(
        session: Arc<SharedSession>,
        emitter: Arc<RecordingEmitter>,
    ) -> (SyncEngine, OfflineStore) {
        let store = OfflineStore::open(DbConfig::in_memory(), SchemaRegistry::standard())
            .await
            .unwrap();
        let engine = SyncEngine::new(
            store.clone(),
            SyncConfig::new("http://127.0.0.1:9/"),
            session,
            emitter,
        )
        .unwrap();
        (engine, store)
    }

    #[test]
    fn external_payload_strips_internal_fields_and_id() {
        let payload = json!({
            "id": "temp_1700000000000_a1b2c3",
            "name": "Alpha",
            "_dirty": true,
            "_syncVersion": 1,
            "group_id": 501,
        });

        let body = external_payload(Some(&payload));
        assert_eq!(body, json!({"name": "Alpha", "group_id": 501}));
        assert_eq!(external_payload(None), json!({}));
    }

    #[tokio::test]
    async fn offline_hint_skips_the_cycle() {
        let session = Arc::new(SharedSession::signed_in("jwt", "42"));
        let emitter = Arc::new(RecordingEmitter::new());
        let (engine, _store) = engine_with(session, emitter.clone()).await;

        engine.set_network_available(false);
        let report = engine.sync(SyncOptions::default()).await;

        assert!(!report.success);
        assert_eq!(report.reason.as_deref(), Some("offline"));
        assert_eq!(engine.get_metrics().phase, SyncPhase::Error);
        assert!(matches!(
            emitter.events().last(),
            Some(SyncEvent::Failed { reason, phase, .. })
                if reason == "offline" && *phase == SyncPhase::Check
        ));
        // The engine stays usable after any failure.
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn missing_credentials_fail_in_check() {
        let session = Arc::new(SharedSession::new());
        let emitter = Arc::new(RecordingEmitter::new());
        let (engine, _store) = engine_with(session.clone(), emitter).await;

        let report = engine.sync(SyncOptions::default()).await;
        assert_eq!(report.reason.as_deref(), Some("unauthenticated"));

        session.set_token(Some("jwt".into()));
        let report = engine.sync(SyncOptions::default()).await;
        assert_eq!(report.reason.as_deref(), Some("missing_tenant"));
    }

    #[tokio::test]
    async fn init_resets_interrupted_entries_and_loads_last_sync() {
        let session = Arc::new(SharedSession::signed_in("jwt", "42"));
        let emitter = Arc::new(RecordingEmitter::new());
        let (engine, store) = engine_with(session, emitter).await;

        let groups = Repository::new(&store, "groups").unwrap();
        groups
            .create(json!({"name": "Alpha"}), &WriteOptions::local())
            .await
            .unwrap();
        let outbox = OutboxManager::new(store.clone());
        let entry = &outbox.get_all().await.unwrap()[0];
        outbox.mark_in_progress(entry.local_id).await.unwrap();

        SyncMetaRepository::new(store.clone())
            .set_last_sync(1_700_000_000_000)
            .await
            .unwrap();

        engine.init().await.unwrap();

        assert_eq!(outbox.get_pending_count().await.unwrap(), 1);
        assert_eq!(engine.get_metrics().last_sync, Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn error_log_is_capped_at_ten() {
        let session = Arc::new(SharedSession::signed_in("jwt", "42"));
        let emitter = Arc::new(RecordingEmitter::new());
        let (engine, _store) = engine_with(session, emitter).await;

        for i in 0..15 {
            engine.record_error(format!("error {i}"));
        }
        let errors = engine.get_metrics().last_errors;
        assert_eq!(errors.len(), 10);
        assert_eq!(errors.first().map(String::as_str), Some("error 5"));
        assert_eq!(errors.last().map(String::as_str), Some("error 14"));
    }
}

//! # Entity Repository
//!
//! Per-entity-type facade over one container. The only legal path through
//! which host code reads or writes entities.
//!
//! ## Write Atomicity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Repository Write (create / update / remove)            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. entity container write (temp ID, _dirty, _localUpdatedAt)  │   │
//! │  │  2. _outbox insert (operation, payload, dependencies)          │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Observers see both or neither. Reads never issue network I/O.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Server-sourced application (`bulk_upsert`, `replace_all_for_organization`,
//! `is_server_data` writes) never touches the outbox.

use serde_json::Value;
use tracing::debug;

use campfire_core::error::CoreError;
use campfire_core::schema::EntitySpec;
use campfire_core::temp_id::generate_temp_id;
use campfire_core::types::{now_ms, EntityId, EntityRecord, Operation, OutboxEntry};

use crate::entity_table;
use crate::error::{DbError, DbResult};
use crate::repository::outbox;
use crate::store::OfflineStore;

// =============================================================================
// Options and Reports
// =============================================================================

/// Write origin. Server-sourced writes skip temp IDs, dirty flags, and the
/// outbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub is_server_data: bool,
}

impl WriteOptions {
    pub fn local() -> Self {
        WriteOptions {
            is_server_data: false,
        }
    }

    pub fn server_data() -> Self {
        WriteOptions {
            is_server_data: true,
        }
    }
}

/// A locally-dirty record a pull also delivered. The local fields were kept;
/// the merge phase decides what happens next.
#[derive(Debug, Clone)]
pub struct DirtyOverlap {
    pub entity_id: String,
    /// The local record after `_serverUpdatedAt`/`_syncVersion` stamping.
    pub local: EntityRecord,
    /// The server copy as pulled.
    pub server: EntityRecord,
}

/// Outcome of `bulk_upsert`.
#[derive(Debug, Default)]
pub struct BulkUpsertReport {
    /// Clean records overwritten authoritatively.
    pub applied: u64,
    /// Dirty records whose local fields were preserved.
    pub overlaps: Vec<DirtyOverlap>,
}

/// Outcome of `replace_all_for_organization`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceReport {
    pub deleted: u64,
    pub upserted: u64,
    pub skipped_dirty: u64,
}

// =============================================================================
// Repository
// =============================================================================

/// Facade binding one entity container.
#[derive(Debug, Clone)]
pub struct Repository {
    store: OfflineStore,
    spec: EntitySpec,
}

impl Repository {
    /// Binds the container named in the declared schema.
    pub fn new(store: &OfflineStore, store_name: &str) -> DbResult<Self> {
        let spec = store
            .registry()
            .spec(store_name)
            .cloned()
            .ok_or_else(|| DbError::UnknownContainer(store_name.to_string()))?;
        Ok(Repository {
            store: store.clone(),
            spec,
        })
    }

    pub fn spec(&self) -> &EntitySpec {
        &self.spec
    }

    pub fn store_name(&self) -> &str {
        &self.spec.store_name
    }

    // -------------------------------------------------------------------------
    // Reads (always local)
    // -------------------------------------------------------------------------

    pub async fn get_by_id(&self, id: &EntityId) -> DbResult<Option<EntityRecord>> {
        let mut conn = self.store.pool().acquire().await?;
        entity_table::get(&mut conn, self.store_name(), &id.as_key()).await
    }

    pub async fn get_all(&self) -> DbResult<Vec<EntityRecord>> {
        let mut conn = self.store.pool().acquire().await?;
        entity_table::all(&mut conn, self.store_name()).await
    }

    pub async fn get_all_by_organization(
        &self,
        organization_id: &str,
    ) -> DbResult<Vec<EntityRecord>> {
        let mut conn = self.store.pool().acquire().await?;
        entity_table::by_organization(&mut conn, self.store_name(), organization_id).await
    }

    pub async fn get_by_index(&self, field: &str, value: &Value) -> DbResult<Vec<EntityRecord>> {
        let mut conn = self.store.pool().acquire().await?;
        entity_table::by_fields(&mut conn, self.store_name(), &[(field, value.clone())]).await
    }

    pub async fn get_by_compound_index(
        &self,
        filters: &[(&str, Value)],
    ) -> DbResult<Vec<EntityRecord>> {
        let mut conn = self.store.pool().acquire().await?;
        entity_table::by_fields(&mut conn, self.store_name(), filters).await
    }

    pub async fn count_by_index(&self, field: &str, value: &Value) -> DbResult<i64> {
        let mut conn = self.store.pool().acquire().await?;
        entity_table::count_by_fields(&mut conn, self.store_name(), &[(field, value.clone())])
            .await
    }

    /// Records whose local copy diverges from the last server-known state.
    pub async fn get_dirty(&self) -> DbResult<Vec<EntityRecord>> {
        let mut conn = self.store.pool().acquire().await?;
        entity_table::dirty_records(&mut conn, self.store_name()).await
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Creates a record. Local creates are assigned a temp ID when none is
    /// present, stamped dirty, and enqueued with their FK dependencies in
    /// the same transaction.
    pub async fn create(&self, data: Value, options: &WriteOptions) -> DbResult<EntityRecord> {
        let mut record = EntityRecord::from_value(data)?;

        if options.is_server_data {
            let mut tx = self.store.begin().await?;
            let record = self.apply_server_record(&mut tx, record).await?;
            tx.commit().await?;
            return Ok(record);
        }

        let id = match record.id() {
            Some(id) => id,
            None => {
                let id = EntityId::Temp(generate_temp_id());
                record.set_id(&id);
                id
            }
        };
        record.set_dirty(true);
        record.set_local_updated_at(now_ms());

        let dependencies = self.store.registry().extract_dependencies(record.fields());
        let entry = OutboxEntry::new(
            self.store_name(),
            &id,
            Operation::Create,
            Some(record.to_value()),
            dependencies,
        );

        let mut tx = self.store.begin().await?;
        entity_table::put(&mut tx, self.store_name(), &record).await?;
        let local_id = outbox::insert_in(&mut tx, &entry).await?;
        tx.commit().await?;

        debug!(
            container = %self.store_name(),
            id = %id,
            outbox_local_id = local_id,
            "Created record"
        );
        Ok(record)
    }

    /// Merges a patch into an existing record. Fails with `NotFound` when
    /// the record is absent. Local updates enqueue the patch.
    pub async fn update(
        &self,
        id: &EntityId,
        patch: Value,
        options: &WriteOptions,
    ) -> DbResult<EntityRecord> {
        let Value::Object(patch_fields) = patch else {
            return Err(DbError::Domain(CoreError::InvalidRecord(
                "update patch must be an object".to_string(),
            )));
        };

        let mut tx = self.store.begin().await?;
        let mut record = entity_table::get(&mut tx, self.store_name(), &id.as_key())
            .await?
            .ok_or_else(|| DbError::not_found(self.store_name(), id.as_key()))?;

        record.merge_patch(&patch_fields);

        if options.is_server_data {
            let stamp = record.server_clock().unwrap_or_else(now_ms);
            record.set_dirty(false);
            record.set_sync_version(record.sync_version() + 1);
            record.set_server_updated_at(stamp);
            entity_table::put(&mut tx, self.store_name(), &record).await?;
            tx.commit().await?;
            return Ok(record);
        }

        record.set_dirty(true);
        record.set_local_updated_at(now_ms());

        let dependencies = self.store.registry().extract_dependencies(&patch_fields);
        let entry = OutboxEntry::new(
            self.store_name(),
            id,
            Operation::Update,
            Some(Value::Object(patch_fields)),
            dependencies,
        );

        entity_table::put(&mut tx, self.store_name(), &record).await?;
        outbox::insert_in(&mut tx, &entry).await?;
        tx.commit().await?;

        debug!(container = %self.store_name(), id = %id, "Updated record");
        Ok(record)
    }

    /// Deletes a record. A temp-ID entity (never synced) also cancels its
    /// pending outbox entries and emits no further outbox work; a synced
    /// entity enqueues a delete.
    pub async fn remove(&self, id: &EntityId, options: &WriteOptions) -> DbResult<()> {
        let mut tx = self.store.begin().await?;
        entity_table::delete(&mut tx, self.store_name(), &id.as_key()).await?;

        if options.is_server_data {
            tx.commit().await?;
            return Ok(());
        }

        if id.is_temp() {
            let cancelled =
                outbox::delete_for_entity_in(&mut tx, self.store_name(), &id.as_key()).await?;
            tx.commit().await?;
            debug!(
                container = %self.store_name(),
                id = %id,
                cancelled,
                "Removed never-synced record, cancelled its outbox entries"
            );
            return Ok(());
        }

        let entry = OutboxEntry::new(self.store_name(), id, Operation::Delete, None, Vec::new());
        outbox::insert_in(&mut tx, &entry).await?;
        tx.commit().await?;

        debug!(container = %self.store_name(), id = %id, "Removed record, delete enqueued");
        Ok(())
    }

    /// Applies a server listing. Clean records are overwritten with
    /// `_dirty = false` and a bumped `_syncVersion`; locally-dirty records
    /// keep their fields and are stamped `_serverUpdatedAt` so the merge
    /// phase can see the overlap. Never touches the outbox.
    pub async fn bulk_upsert(&self, entities: Vec<Value>) -> DbResult<BulkUpsertReport> {
        let mut report = BulkUpsertReport::default();
        let mut tx = self.store.begin().await?;

        for value in entities {
            let server = EntityRecord::from_value(value)?;
            let Some(id) = server.id() else {
                debug!(container = %self.store_name(), "Skipping pulled record without id");
                continue;
            };
            let key = id.as_key();
            let stamp = server.server_clock().unwrap_or_else(now_ms);

            match entity_table::get(&mut tx, self.store_name(), &key).await? {
                Some(mut local) if local.dirty() => {
                    local.set_sync_version(local.sync_version() + 1);
                    local.set_server_updated_at(stamp);
                    entity_table::put(&mut tx, self.store_name(), &local).await?;
                    report.overlaps.push(DirtyOverlap {
                        entity_id: key,
                        local,
                        server,
                    });
                }
                existing => {
                    let mut record = server;
                    record.set_dirty(false);
                    record.set_sync_version(
                        existing.map(|e| e.sync_version() + 1).unwrap_or(1),
                    );
                    record.set_server_updated_at(stamp);
                    entity_table::put(&mut tx, self.store_name(), &record).await?;
                    report.applied += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    /// Full-refresh pull for one tenant: clean records the server no longer
    /// lists are pruned, pulled records are upserted, and records with local
    /// edits always win over the pull.
    pub async fn replace_all_for_organization(
        &self,
        organization_id: &str,
        entities: Vec<Value>,
    ) -> DbResult<ReplaceReport> {
        let mut report = ReplaceReport::default();
        let mut tx = self.store.begin().await?;

        let dirty_ids: std::collections::HashSet<String> =
            entity_table::dirty_ids_for_organization(&mut tx, self.store_name(), organization_id)
                .await?
                .into_iter()
                .collect();
        // Versions survive the delete-and-recreate so they never decrease.
        let prior_versions: std::collections::HashMap<String, i64> =
            entity_table::clean_versions_for_organization(
                &mut tx,
                self.store_name(),
                organization_id,
            )
            .await?
            .into_iter()
            .collect();

        report.deleted =
            entity_table::delete_clean_for_organization(&mut tx, self.store_name(), organization_id)
                .await?;

        for value in entities {
            let server = EntityRecord::from_value(value)?;
            let Some(id) = server.id() else {
                continue;
            };
            let key = id.as_key();

            if dirty_ids.contains(&key) {
                report.skipped_dirty += 1;
                continue;
            }

            let stamp = server.server_clock().unwrap_or_else(now_ms);
            let mut record = server;
            record.set_dirty(false);
            record.set_sync_version(prior_versions.get(&key).map(|v| v + 1).unwrap_or(1));
            record.set_server_updated_at(stamp);
            entity_table::put(&mut tx, self.store_name(), &record).await?;
            report.upserted += 1;
        }

        tx.commit().await?;
        debug!(
            container = %self.store_name(),
            organization_id,
            deleted = report.deleted,
            upserted = report.upserted,
            skipped_dirty = report.skipped_dirty,
            "Replaced tenant records from pull"
        );
        Ok(report)
    }

    /// Empties the container. No outbox effect.
    pub async fn clear(&self) -> DbResult<()> {
        let mut conn = self.store.pool().acquire().await?;
        entity_table::clear(&mut conn, self.store_name()).await
    }

    /// Clears the dirty flag once the record's outbox chain has fully
    /// synced. Called by the sync engine after a successful push.
    pub async fn clear_dirty(&self, id: &EntityId) -> DbResult<()> {
        let mut tx = self.store.begin().await?;
        if let Some(mut record) =
            entity_table::get(&mut tx, self.store_name(), &id.as_key()).await?
        {
            record.set_dirty(false);
            entity_table::put(&mut tx, self.store_name(), &record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Server-sourced single-record application inside an open transaction.
    async fn apply_server_record(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        record: EntityRecord,
    ) -> DbResult<EntityRecord> {
        let Some(id) = record.id() else {
            return Err(DbError::Domain(CoreError::InvalidRecord(
                "server record has no usable id".to_string(),
            )));
        };
        let existing = entity_table::get(tx, self.store_name(), &id.as_key()).await?;
        let stamp = record.server_clock().unwrap_or_else(now_ms);

        let mut record = record;
        record.set_dirty(false);
        record.set_sync_version(existing.map(|e| e.sync_version() + 1).unwrap_or(1));
        record.set_server_updated_at(stamp);
        entity_table::put(tx, self.store_name(), &record).await?;
        Ok(record)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::outbox::OutboxManager;
    use crate::store::{DbConfig, OfflineStore};
    use campfire_core::schema::SchemaRegistry;
    use campfire_core::types::OutboxStatus;
    use serde_json::json;

    async fn open_store() -> OfflineStore {
        OfflineStore::open(DbConfig::in_memory(), SchemaRegistry::standard())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn local_create_assigns_temp_id_and_enqueues_atomically() {
        let store = open_store().await;
        let groups = Repository::new(&store, "groups").unwrap();
        let outbox = OutboxManager::new(store.clone());

        let record = groups
            .create(json!({"name": "Alpha", "organization_id": "42"}), &WriteOptions::local())
            .await
            .unwrap();

        let id = record.id().unwrap();
        assert!(id.is_temp());
        assert!(record.dirty());
        assert!(record.local_updated_at().is_some());

        let entries = outbox.get_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, Operation::Create);
        assert_eq!(entries[0].entity_id, id.as_key());
        assert_eq!(entries[0].temp_id.as_deref(), Some(id.as_key().as_str()));
        assert_eq!(entries[0].status, OutboxStatus::Pending);

        let payload = entries[0].payload.as_ref().unwrap();
        assert_eq!(payload["name"], json!("Alpha"));
    }

    #[tokio::test]
    async fn create_with_temp_fk_declares_a_dependency() {
        let store = open_store().await;
        let groups = Repository::new(&store, "groups").unwrap();
        let participants = Repository::new(&store, "participants").unwrap();
        let outbox = OutboxManager::new(store.clone());

        let group = groups
            .create(json!({"name": "Alpha"}), &WriteOptions::local())
            .await
            .unwrap();
        let group_id = group.id().unwrap().as_key();

        participants
            .create(
                json!({"first_name": "Ana", "group_id": group_id}),
                &WriteOptions::local(),
            )
            .await
            .unwrap();

        let entries = outbox.get_pending_ordered().await.unwrap();
        assert_eq!(entries.len(), 2);
        let participant_entry = &entries[1];
        assert_eq!(participant_entry.entity_type, "participants");
        assert_eq!(participant_entry.dependencies.len(), 1);
        assert_eq!(participant_entry.dependencies[0].entity_type, "groups");
        assert_eq!(participant_entry.dependencies[0].temp_id, group_id);
    }

    #[tokio::test]
    async fn server_data_create_skips_the_outbox() {
        let store = open_store().await;
        let groups = Repository::new(&store, "groups").unwrap();
        let outbox = OutboxManager::new(store.clone());

        let record = groups
            .create(
                json!({"id": 501, "name": "Alpha", "updated_at": 1_700_000_000_000i64}),
                &WriteOptions::server_data(),
            )
            .await
            .unwrap();

        assert!(!record.dirty());
        assert_eq!(record.sync_version(), 1);
        assert_eq!(record.server_updated_at(), Some(1_700_000_000_000));
        assert_eq!(outbox.get_all().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn update_merges_and_enqueues_only_the_patch() {
        let store = open_store().await;
        let participants = Repository::new(&store, "participants").unwrap();
        let outbox = OutboxManager::new(store.clone());

        participants
            .create(
                json!({"id": 501, "first_name": "Ana", "last_name": "Ruiz"}),
                &WriteOptions::server_data(),
            )
            .await
            .unwrap();

        let updated = participants
            .update(
                &EntityId::Int(501),
                json!({"first_name": "Anna"}),
                &WriteOptions::local(),
            )
            .await
            .unwrap();

        assert_eq!(updated.get("first_name"), Some(&json!("Anna")));
        assert_eq!(updated.get("last_name"), Some(&json!("Ruiz")));
        assert!(updated.dirty());

        let entries = outbox.get_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, Operation::Update);
        assert_eq!(entries[0].payload, Some(json!({"first_name": "Anna"})));
    }

    #[tokio::test]
    async fn update_of_a_missing_record_is_not_found() {
        let store = open_store().await;
        let groups = Repository::new(&store, "groups").unwrap();

        let result = groups
            .update(&EntityId::Int(999), json!({"name": "x"}), &WriteOptions::local())
            .await;
        assert!(matches!(result, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn removing_a_temp_entity_cancels_everything() {
        let store = open_store().await;
        let groups = Repository::new(&store, "groups").unwrap();
        let outbox = OutboxManager::new(store.clone());

        let record = groups
            .create(json!({"name": "Alpha"}), &WriteOptions::local())
            .await
            .unwrap();
        let id = record.id().unwrap();
        groups
            .update(&id, json!({"name": "Beta"}), &WriteOptions::local())
            .await
            .unwrap();
        assert_eq!(outbox.get_all().await.unwrap().len(), 2);

        groups.remove(&id, &WriteOptions::local()).await.unwrap();

        // Entity gone, outbox empty, nothing will ever reach the server.
        assert!(groups.get_by_id(&id).await.unwrap().is_none());
        assert_eq!(outbox.get_all().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn removing_a_synced_entity_enqueues_a_delete() {
        let store = open_store().await;
        let groups = Repository::new(&store, "groups").unwrap();
        let outbox = OutboxManager::new(store.clone());

        groups
            .create(json!({"id": 501, "name": "Alpha"}), &WriteOptions::server_data())
            .await
            .unwrap();
        groups
            .remove(&EntityId::Int(501), &WriteOptions::local())
            .await
            .unwrap();

        let entries = outbox.get_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, Operation::Delete);
        assert_eq!(entries[0].entity_id, "501");
        assert_eq!(entries[0].payload, None);
    }

    #[tokio::test]
    async fn bulk_upsert_overwrites_clean_and_preserves_dirty() {
        let store = open_store().await;
        let participants = Repository::new(&store, "participants").unwrap();

        participants
            .create(json!({"id": 501, "first_name": "Ana"}), &WriteOptions::server_data())
            .await
            .unwrap();
        participants
            .create(json!({"id": 502, "first_name": "Ben"}), &WriteOptions::server_data())
            .await
            .unwrap();
        // 501 gets a concurrent local edit.
        participants
            .update(
                &EntityId::Int(501),
                json!({"first_name": "Anna"}),
                &WriteOptions::local(),
            )
            .await
            .unwrap();

        let report = participants
            .bulk_upsert(vec![
                json!({"id": 501, "first_name": "Annabelle", "updated_at": 1_900_000_000_000i64}),
                json!({"id": 502, "first_name": "Benjamin"}),
            ])
            .await
            .unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.overlaps.len(), 1);
        assert_eq!(report.overlaps[0].entity_id, "501");

        // The dirty edit survived; the server stamp landed.
        let local = participants
            .get_by_id(&EntityId::Int(501))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.get("first_name"), Some(&json!("Anna")));
        assert!(local.dirty());
        assert_eq!(local.server_updated_at(), Some(1_900_000_000_000));

        // The clean record was overwritten authoritatively.
        let clean = participants
            .get_by_id(&EntityId::Int(502))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(clean.get("first_name"), Some(&json!("Benjamin")));
        assert!(!clean.dirty());
        assert_eq!(clean.sync_version(), 2);
    }

    #[tokio::test]
    async fn replace_all_prunes_stale_and_dirty_always_wins() {
        let store = open_store().await;
        let groups = Repository::new(&store, "groups").unwrap();

        for (id, name) in [(1, "Alpha"), (2, "Beta"), (3, "Gamma")] {
            groups
                .create(
                    json!({"id": id, "name": name, "organization_id": "42"}),
                    &WriteOptions::server_data(),
                )
                .await
                .unwrap();
        }
        // Group 2 has a local edit.
        groups
            .update(&EntityId::Int(2), json!({"name": "Beta (local)"}), &WriteOptions::local())
            .await
            .unwrap();

        // The server listing no longer includes group 3 and has a new name
        // for groups 1 and 2.
        let report = groups
            .replace_all_for_organization(
                "42",
                vec![
                    json!({"id": 1, "name": "Alpha v2", "organization_id": "42"}),
                    json!({"id": 2, "name": "Beta v2", "organization_id": "42"}),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.upserted, 1);
        assert_eq!(report.skipped_dirty, 1);

        // Stale clean record pruned.
        assert!(groups.get_by_id(&EntityId::Int(3)).await.unwrap().is_none());
        // Clean record refreshed, version monotone.
        let alpha = groups.get_by_id(&EntityId::Int(1)).await.unwrap().unwrap();
        assert_eq!(alpha.get("name"), Some(&json!("Alpha v2")));
        assert_eq!(alpha.sync_version(), 2);
        // Dirty record untouched by the pull.
        let beta = groups.get_by_id(&EntityId::Int(2)).await.unwrap().unwrap();
        assert_eq!(beta.get("name"), Some(&json!("Beta (local)")));
        assert!(beta.dirty());
    }

    #[tokio::test]
    async fn index_reads_cover_single_and_compound_queries() {
        let store = open_store().await;
        let attendance = Repository::new(&store, "attendance").unwrap();

        for (id, participant, activity) in [(1, 9001, 12), (2, 9001, 13), (3, 9002, 12)] {
            attendance
                .create(
                    json!({
                        "id": id,
                        "organization_id": "42",
                        "participant_id": participant,
                        "activity_id": activity,
                    }),
                    &WriteOptions::server_data(),
                )
                .await
                .unwrap();
        }

        let by_participant = attendance
            .get_by_index("participant_id", &json!(9001))
            .await
            .unwrap();
        assert_eq!(by_participant.len(), 2);

        let compound = attendance
            .get_by_compound_index(&[
                ("participant_id", json!(9001)),
                ("activity_id", json!(13)),
            ])
            .await
            .unwrap();
        assert_eq!(compound.len(), 1);

        let count = attendance
            .count_by_index("activity_id", &json!(12))
            .await
            .unwrap();
        assert_eq!(count, 2);

        let by_org = attendance.get_all_by_organization("42").await.unwrap();
        assert_eq!(by_org.len(), 3);
    }

    #[tokio::test]
    async fn repository_rejects_undeclared_containers() {
        let store = open_store().await;
        assert!(matches!(
            Repository::new(&store, "not_a_container"),
            Err(DbError::UnknownContainer(_))
        ));
    }

    #[tokio::test]
    async fn clear_dirty_flips_only_the_flag() {
        let store = open_store().await;
        let groups = Repository::new(&store, "groups").unwrap();

        groups
            .create(json!({"id": 501, "name": "Alpha"}), &WriteOptions::server_data())
            .await
            .unwrap();
        groups
            .update(&EntityId::Int(501), json!({"name": "Beta"}), &WriteOptions::local())
            .await
            .unwrap();

        groups.clear_dirty(&EntityId::Int(501)).await.unwrap();
        let record = groups.get_by_id(&EntityId::Int(501)).await.unwrap().unwrap();
        assert!(!record.dirty());
        assert_eq!(record.get("name"), Some(&json!("Beta")));
    }
}

//! # ID Mapper
//!
//! Single source of truth for temp → server identity translation.
//!
//! ## Repair Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              addMapping(T, temp, server)  →  repairReferences           │
//! │                                                                         │
//! │  For every entity container:              (one transaction each)       │
//! │    • record whose id == temp and type == T  → primary key rewritten    │
//! │    • any recognized FK field valued temp    → value rewritten          │
//! │                                                                         │
//! │  For the outbox:                          (one transaction)            │
//! │    • entries targeting (T, temp)            → entity_id rewritten      │
//! │    • payload FK fields valued temp          → payload rewritten        │
//! │                                                                         │
//! │  After repair no persisted record anywhere retains temp as a value.    │
//! │  Reapplying the same mapping is a no-op.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use campfire_core::schema::{EntitySpec, SchemaRegistry};
use campfire_core::types::{now_ms, EntityId, IdMapping, FIELD_ID};

use crate::entity_table;
use crate::error::DbResult;
use crate::store::OfflineStore;

/// Outcome of one reference repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Entity rows rewritten (primary keys and FK fields).
    pub entities_rewritten: u64,
    /// Outbox rows rewritten (entity IDs and payload FK fields).
    pub outbox_rewritten: u64,
}

/// Maintains the bidirectional temp ↔ server dictionary and repairs stored
/// references when a mapping is learned.
#[derive(Debug, Clone)]
pub struct IdMapper {
    store: OfflineStore,
}

impl IdMapper {
    pub fn new(store: OfflineStore) -> Self {
        IdMapper { store }
    }

    /// Upserts a mapping. Safe to re-learn an existing pair.
    pub async fn add_mapping(
        &self,
        entity_type: &str,
        temp_id: &str,
        server_id: &EntityId,
    ) -> DbResult<()> {
        let mut conn = self.store.pool().acquire().await?;
        add_mapping_in(&mut conn, entity_type, temp_id, &server_id.as_key()).await
    }

    /// Server key for a temp ID, if learned.
    pub async fn lookup_by_temp(
        &self,
        entity_type: &str,
        temp_id: &str,
    ) -> DbResult<Option<String>> {
        let mut conn = self.store.pool().acquire().await?;
        lookup_temp_in(&mut conn, entity_type, temp_id).await
    }

    /// Temp ID a server ID was minted from, if any.
    pub async fn lookup_by_server(
        &self,
        entity_type: &str,
        server_id: &EntityId,
    ) -> DbResult<Option<String>> {
        let row = sqlx::query(
            "SELECT temp_id FROM _id_map WHERE entity_type = ?1 AND server_id = ?2",
        )
        .bind(entity_type)
        .bind(server_id.as_key())
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(|r| r.get::<String, _>("temp_id")))
    }

    /// All learned mappings, oldest first.
    pub async fn get_all(&self) -> DbResult<Vec<IdMapping>> {
        let rows = sqlx::query(
            "SELECT entity_type, temp_id, server_id, created_at FROM _id_map ORDER BY id",
        )
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows
            .iter()
            .map(|row| IdMapping {
                entity_type: row.get("entity_type"),
                temp_id: row.get("temp_id"),
                server_id: row.get("server_id"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Learns a mapping and repairs every stored reference inside the
    /// caller's transaction. Nothing becomes visible until the caller
    /// commits, so the mapping and the repaired references land together
    /// with whatever else the transaction carries (the sync engine puts the
    /// outbox acknowledgment in the same one). A rolled-back transaction
    /// leaves no trace; retrying is safe.
    pub async fn record_mapping_in(
        &self,
        conn: &mut SqliteConnection,
        entity_type: &str,
        temp_id: &str,
        server_id: &EntityId,
    ) -> DbResult<RepairReport> {
        let registry = self.store.registry().clone();
        add_mapping_in(conn, entity_type, temp_id, &server_id.as_key()).await?;

        let mut report = RepairReport::default();
        for spec in registry.specs() {
            report.entities_rewritten +=
                repair_container_in(conn, &registry, spec, entity_type, temp_id, server_id)
                    .await?;
        }
        report.outbox_rewritten =
            repair_outbox_in(conn, &registry, entity_type, temp_id, server_id).await?;

        info!(
            entity_type,
            temp_id,
            server_id = %server_id,
            entities = report.entities_rewritten,
            outbox = report.outbox_rewritten,
            "Mapping recorded, references repaired"
        );
        Ok(report)
    }

    /// Rewrites every stored occurrence of `temp_id` to the server ID: the
    /// entity's own primary key, recognized FK fields in every container,
    /// and outbox entity IDs and payloads. One transaction per entity
    /// container; idempotent. For learning a new mapping use
    /// `record_mapping_in`, which does the same work atomically with the
    /// mapping insert.
    pub async fn repair_references(
        &self,
        entity_type: &str,
        temp_id: &str,
        server_id: &EntityId,
    ) -> DbResult<RepairReport> {
        let registry = self.store.registry().clone();
        let mut report = RepairReport::default();

        for spec in registry.specs() {
            let mut tx = self.store.begin().await?;
            let rewritten =
                repair_container_in(&mut tx, &registry, spec, entity_type, temp_id, server_id)
                    .await?;
            tx.commit().await?;
            report.entities_rewritten += rewritten;
        }

        let mut tx = self.store.begin().await?;
        report.outbox_rewritten =
            repair_outbox_in(&mut tx, &registry, entity_type, temp_id, server_id).await?;
        tx.commit().await?;

        info!(
            entity_type,
            temp_id,
            server_id = %server_id,
            entities = report.entities_rewritten,
            outbox = report.outbox_rewritten,
            "Reference repair complete"
        );
        Ok(report)
    }

    /// Deletes mappings older than the age threshold. Stored references were
    /// repaired at mapping time, so old rows only serve late arrivals.
    pub async fn purge_old_mappings(&self, max_age_ms: i64) -> DbResult<u64> {
        let cutoff = now_ms() - max_age_ms;
        let result = sqlx::query("DELETE FROM _id_map WHERE created_at < ?1")
            .bind(cutoff)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected())
    }

}

// =============================================================================
// Repair Steps (shared by both repair paths)
// =============================================================================

async fn repair_container_in(
    conn: &mut SqliteConnection,
    registry: &SchemaRegistry,
    spec: &EntitySpec,
    entity_type: &str,
    temp_id: &str,
    server_id: &EntityId,
) -> DbResult<u64> {
    let mut rewritten = 0u64;

    // The entity's own primary key.
    if spec.store_name == entity_type {
        if let Some(mut record) = entity_table::get(conn, &spec.store_name, temp_id).await? {
            record.set_id(server_id);
            entity_table::delete(conn, &spec.store_name, temp_id).await?;
            entity_table::put(conn, &spec.store_name, &record).await?;
            rewritten += 1;
        }
    }

    // FK fields in this container that point at the repaired type.
    for fk in registry.fk_fields_referencing(entity_type) {
        let holders = entity_table::by_fields(
            conn,
            &spec.store_name,
            &[(fk.field.as_str(), serde_json::Value::String(temp_id.into()))],
        )
        .await?;
        for mut record in holders {
            record.set(fk.field.clone(), server_id.to_value());
            entity_table::put(conn, &spec.store_name, &record).await?;
            rewritten += 1;
        }
    }

    if rewritten > 0 {
        debug!(
            container = %spec.store_name,
            temp_id,
            rewritten,
            "Repaired entity references"
        );
    }
    Ok(rewritten)
}

async fn repair_outbox_in(
    conn: &mut SqliteConnection,
    registry: &SchemaRegistry,
    entity_type: &str,
    temp_id: &str,
    server_id: &EntityId,
) -> DbResult<u64> {
    let mut rewritten = 0u64;

    // Entries still targeting the temp ID directly. temp_id is kept for
    // audit; only entity_id moves to the server key.
    let retargeted = sqlx::query(
        "UPDATE _outbox SET entity_id = ?1 WHERE entity_type = ?2 AND entity_id = ?3",
    )
    .bind(server_id.as_key())
    .bind(entity_type)
    .bind(temp_id)
    .execute(&mut *conn)
    .await?;
    rewritten += retargeted.rows_affected();

    // Payload FK fields (and the payload's own id for the repaired type).
    let rows = sqlx::query(
        "SELECT local_id, entity_type, payload FROM _outbox \
         WHERE status != 'synced' AND payload IS NOT NULL",
    )
    .fetch_all(&mut *conn)
    .await?;

    let fks = registry.fk_fields_referencing(entity_type);
    for row in rows {
        let local_id: i64 = row.get("local_id");
        let entry_type: String = row.get("entity_type");
        let payload_text: String = row.get("payload");
        let Ok(mut payload) = serde_json::from_str::<serde_json::Value>(&payload_text) else {
            continue;
        };
        let Some(fields) = payload.as_object_mut() else {
            continue;
        };

        let mut changed = false;
        for fk in &fks {
            if fields.get(&fk.field).and_then(|v| v.as_str()) == Some(temp_id) {
                fields.insert(fk.field.clone(), server_id.to_value());
                changed = true;
            }
        }
        if entry_type == entity_type
            && fields.get(FIELD_ID).and_then(|v| v.as_str()) == Some(temp_id)
        {
            fields.insert(FIELD_ID.to_string(), server_id.to_value());
            changed = true;
        }

        if changed {
            sqlx::query("UPDATE _outbox SET payload = ?1 WHERE local_id = ?2")
                .bind(serde_json::to_string(&payload)?)
                .bind(local_id)
                .execute(&mut *conn)
                .await?;
            rewritten += 1;
        }
    }

    Ok(rewritten)
}

// =============================================================================
// Connection-Level Helpers (shared with the outbox manager)
// =============================================================================

pub(crate) async fn add_mapping_in(
    conn: &mut SqliteConnection,
    entity_type: &str,
    temp_id: &str,
    server_key: &str,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO _id_map (entity_type, temp_id, server_id, created_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (entity_type, temp_id) DO UPDATE SET server_id = excluded.server_id",
    )
    .bind(entity_type)
    .bind(temp_id)
    .bind(server_key)
    .bind(now_ms())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn lookup_temp_in(
    conn: &mut SqliteConnection,
    entity_type: &str,
    temp_id: &str,
) -> DbResult<Option<String>> {
    let row = sqlx::query("SELECT server_id FROM _id_map WHERE entity_type = ?1 AND temp_id = ?2")
        .bind(entity_type)
        .bind(temp_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.get::<String, _>("server_id")))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DbConfig, OfflineStore};
    use campfire_core::schema::SchemaRegistry;
    use campfire_core::types::EntityRecord;
    use serde_json::json;

    async fn open_store() -> OfflineStore {
        OfflineStore::open(DbConfig::in_memory(), SchemaRegistry::standard())
            .await
            .unwrap()
    }

    async fn put_record(store: &OfflineStore, table: &str, value: serde_json::Value) {
        let record = EntityRecord::from_value(value).unwrap();
        let mut conn = store.pool().acquire().await.unwrap();
        entity_table::put(&mut conn, table, &record).await.unwrap();
    }

    #[tokio::test]
    async fn mappings_look_up_in_both_directions() {
        let store = open_store().await;
        let mapper = IdMapper::new(store);

        mapper
            .add_mapping("groups", "temp_1700000000000_a1b2c3", &EntityId::Int(501))
            .await
            .unwrap();

        assert_eq!(
            mapper
                .lookup_by_temp("groups", "temp_1700000000000_a1b2c3")
                .await
                .unwrap(),
            Some("501".to_string())
        );
        assert_eq!(
            mapper
                .lookup_by_server("groups", &EntityId::Int(501))
                .await
                .unwrap(),
            Some("temp_1700000000000_a1b2c3".to_string())
        );
        assert_eq!(
            mapper.lookup_by_temp("participants", "temp_x").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn re_adding_a_mapping_is_an_upsert() {
        let store = open_store().await;
        let mapper = IdMapper::new(store);

        mapper
            .add_mapping("groups", "temp_x", &EntityId::Int(501))
            .await
            .unwrap();
        mapper
            .add_mapping("groups", "temp_x", &EntityId::Int(501))
            .await
            .unwrap();

        assert_eq!(mapper.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repair_rewrites_primary_keys_and_fk_fields() {
        let store = open_store().await;
        let temp = "temp_1700000000000_a1b2c3";

        put_record(&store, "groups", json!({"id": temp, "name": "Alpha"})).await;
        put_record(
            &store,
            "participants",
            json!({"id": "temp_1700000000001_d4e5f6", "first_name": "Ana", "group_id": temp}),
        )
        .await;

        let mapper = IdMapper::new(store.clone());
        mapper
            .add_mapping("groups", temp, &EntityId::Int(501))
            .await
            .unwrap();
        let report = mapper
            .repair_references("groups", temp, &EntityId::Int(501))
            .await
            .unwrap();
        assert_eq!(report.entities_rewritten, 2);

        let mut conn = store.pool().acquire().await.unwrap();
        let group = entity_table::get(&mut conn, "groups", "501")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(group.get("id"), Some(&json!(501)));
        assert!(entity_table::get(&mut conn, "groups", temp)
            .await
            .unwrap()
            .is_none());

        let participant =
            entity_table::get(&mut conn, "participants", "temp_1700000000001_d4e5f6")
                .await
                .unwrap()
                .unwrap();
        assert_eq!(participant.get("group_id"), Some(&json!(501)));

        // No temp reference to the group survives anywhere.
        let dump = serde_json::to_string(&group.to_value()).unwrap();
        assert!(!dump.contains(temp));
    }

    #[tokio::test]
    async fn record_mapping_in_commits_or_rolls_back_as_one() {
        let store = open_store().await;
        let temp = "temp_1700000000000_a1b2c3";
        put_record(&store, "groups", json!({"id": temp, "name": "Alpha"})).await;

        let entry = campfire_core::types::OutboxEntry::new(
            "participants",
            &EntityId::Temp("temp_1700000000001_d4e5f6".into()),
            campfire_core::types::Operation::Create,
            Some(json!({"first_name": "Ana", "group_id": temp})),
            vec![],
        );
        let entry_id = {
            let mut conn = store.pool().acquire().await.unwrap();
            crate::repository::outbox::insert_in(&mut conn, &entry)
                .await
                .unwrap()
        };

        let mapper = IdMapper::new(store.clone());

        // Dropped without commit: neither the mapping nor any repair
        // survives the rollback.
        {
            let mut tx = store.begin().await.unwrap();
            mapper
                .record_mapping_in(&mut tx, "groups", temp, &EntityId::Int(501))
                .await
                .unwrap();
        }
        assert_eq!(mapper.lookup_by_temp("groups", temp).await.unwrap(), None);
        {
            let mut conn = store.pool().acquire().await.unwrap();
            assert!(entity_table::get(&mut conn, "groups", temp)
                .await
                .unwrap()
                .is_some());
        }

        // Committed: the mapping, the primary-key rewrite, and the
        // dependent outbox payload land together.
        let mut tx = store.begin().await.unwrap();
        let report = mapper
            .record_mapping_in(&mut tx, "groups", temp, &EntityId::Int(501))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(report.entities_rewritten, 1);
        assert_eq!(report.outbox_rewritten, 1);
        assert_eq!(
            mapper.lookup_by_temp("groups", temp).await.unwrap(),
            Some("501".to_string())
        );

        let mut conn = store.pool().acquire().await.unwrap();
        assert!(entity_table::get(&mut conn, "groups", "501")
            .await
            .unwrap()
            .is_some());
        let payload: String =
            sqlx::query_scalar("SELECT payload FROM _outbox WHERE local_id = ?1")
                .bind(entry_id)
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(payload["group_id"], json!(501));
    }

    #[tokio::test]
    async fn repair_is_idempotent() {
        let store = open_store().await;
        let temp = "temp_1700000000000_a1b2c3";
        put_record(&store, "groups", json!({"id": temp})).await;

        let mapper = IdMapper::new(store);
        mapper
            .add_mapping("groups", temp, &EntityId::Int(501))
            .await
            .unwrap();

        let first = mapper
            .repair_references("groups", temp, &EntityId::Int(501))
            .await
            .unwrap();
        assert_eq!(first.entities_rewritten, 1);

        let second = mapper
            .repair_references("groups", temp, &EntityId::Int(501))
            .await
            .unwrap();
        assert_eq!(second, RepairReport::default());
    }

    #[tokio::test]
    async fn purge_drops_only_old_mappings() {
        let store = open_store().await;
        let mapper = IdMapper::new(store.clone());

        mapper
            .add_mapping("groups", "temp_old", &EntityId::Int(1))
            .await
            .unwrap();
        sqlx::query("UPDATE _id_map SET created_at = created_at - 100000 WHERE temp_id = 'temp_old'")
            .execute(store.pool())
            .await
            .unwrap();
        mapper
            .add_mapping("groups", "temp_new", &EntityId::Int(2))
            .await
            .unwrap();

        let purged = mapper.purge_old_mappings(50_000).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(mapper.get_all().await.unwrap().len(), 1);
    }
}

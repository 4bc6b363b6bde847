//! # Conflict Records
//!
//! Detected divergences between a dirty local record and a newer server
//! copy. A record is created on detection, resolved by user action or an
//! application-chosen strategy, and then kept in resolved state as an audit
//! trail.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::info;

use campfire_core::types::{now_ms, ConflictRecord};

use crate::error::{DbError, DbResult};
use crate::store::OfflineStore;

/// Repository over the `_conflicts` container.
#[derive(Debug, Clone)]
pub struct ConflictRepository {
    store: OfflineStore,
}

impl ConflictRepository {
    pub fn new(store: OfflineStore) -> Self {
        ConflictRepository { store }
    }

    /// Records a detected conflict. Returns the record ID.
    pub async fn insert(
        &self,
        entity_type: &str,
        entity_id: &str,
        local_version: &Value,
        server_version: Option<&Value>,
        outbox_local_id: Option<i64>,
    ) -> DbResult<i64> {
        let mut conn = self.store.pool().acquire().await?;
        insert_in(
            &mut conn,
            entity_type,
            entity_id,
            local_version,
            server_version,
            outbox_local_id,
        )
        .await
    }

    /// Unresolved conflicts, oldest first.
    pub async fn unresolved(&self) -> DbResult<Vec<ConflictRecord>> {
        let rows = sqlx::query("SELECT * FROM _conflicts WHERE resolved_at = 0 ORDER BY id")
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(row_to_conflict).collect()
    }

    /// Every conflict ever recorded for one entity, oldest first.
    pub async fn for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<Vec<ConflictRecord>> {
        let rows =
            sqlx::query("SELECT * FROM _conflicts WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY id")
                .bind(entity_type)
                .bind(entity_id)
                .fetch_all(self.store.pool())
                .await?;
        rows.iter().map(row_to_conflict).collect()
    }

    /// True when the entity already has an open conflict. The merge phase
    /// checks this so repeated cycles do not duplicate records.
    pub async fn has_unresolved_for(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM _conflicts \
             WHERE entity_type = ?1 AND entity_id = ?2 AND resolved_at = 0",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_one(self.store.pool())
        .await?;
        Ok(count > 0)
    }

    pub async fn count_unresolved(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _conflicts WHERE resolved_at = 0")
            .fetch_one(self.store.pool())
            .await?;
        Ok(count)
    }

    /// Stamps the conflict resolved. The record stays as an audit trail.
    pub async fn resolve(&self, conflict_id: i64) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE _conflicts SET resolved_at = ?2 WHERE id = ?1 AND resolved_at = 0")
                .bind(conflict_id)
                .bind(now_ms())
                .execute(self.store.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("_conflicts", conflict_id.to_string()));
        }
        info!(conflict_id, "Conflict resolved");
        Ok(())
    }
}

/// Inserts a conflict inside the caller's transaction.
pub(crate) async fn insert_in(
    conn: &mut SqliteConnection,
    entity_type: &str,
    entity_id: &str,
    local_version: &Value,
    server_version: Option<&Value>,
    outbox_local_id: Option<i64>,
) -> DbResult<i64> {
    let server_version = server_version.map(serde_json::to_string).transpose()?;
    let result = sqlx::query(
        "INSERT INTO _conflicts \
         (entity_type, entity_id, local_version, server_version, outbox_local_id, \
          detected_at, resolved_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(serde_json::to_string(local_version)?)
    .bind(server_version)
    .bind(outbox_local_id)
    .bind(now_ms())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

fn row_to_conflict(row: &SqliteRow) -> DbResult<ConflictRecord> {
    let local_version: String = row.try_get("local_version")?;
    let server_version: Option<String> = row.try_get("server_version")?;
    Ok(ConflictRecord {
        id: row.try_get("id")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        local_version: serde_json::from_str(&local_version)?,
        server_version: server_version
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        outbox_local_id: row.try_get("outbox_local_id")?,
        detected_at: row.try_get("detected_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DbConfig, OfflineStore};
    use campfire_core::schema::SchemaRegistry;
    use serde_json::json;

    async fn open_repo() -> ConflictRepository {
        let store = OfflineStore::open(DbConfig::in_memory(), SchemaRegistry::standard())
            .await
            .unwrap();
        ConflictRepository::new(store)
    }

    #[tokio::test]
    async fn conflicts_resolve_into_an_audit_trail() {
        let repo = open_repo().await;

        let id = repo
            .insert(
                "participants",
                "501",
                &json!({"first_name": "Anna"}),
                Some(&json!({"first_name": "Annabelle"})),
                Some(3),
            )
            .await
            .unwrap();

        assert!(repo.has_unresolved_for("participants", "501").await.unwrap());
        assert_eq!(repo.count_unresolved().await.unwrap(), 1);

        let open = repo.unresolved().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].outbox_local_id, Some(3));
        assert!(!open[0].is_resolved());

        repo.resolve(id).await.unwrap();
        assert!(!repo.has_unresolved_for("participants", "501").await.unwrap());
        assert_eq!(repo.unresolved().await.unwrap().len(), 0);

        // The record survives resolution.
        let all = repo.for_entity("participants", "501").await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_resolved());
    }

    #[tokio::test]
    async fn resolving_twice_is_rejected() {
        let repo = open_repo().await;
        let id = repo
            .insert("groups", "7", &json!({}), None, None)
            .await
            .unwrap();

        repo.resolve(id).await.unwrap();
        assert!(repo.resolve(id).await.is_err());
    }
}

//! # Sync Metadata
//!
//! Single-key container for engine bookkeeping: the `lastSync` stamp plus
//! any cursor values the engine chooses to persist.

use serde_json::Value;
use sqlx::Row;

use crate::error::DbResult;
use crate::store::OfflineStore;

/// Key under which the last successful cycle completion time is stored.
pub const KEY_LAST_SYNC: &str = "lastSync";

/// Repository over the `_sync_meta` container.
#[derive(Debug, Clone)]
pub struct SyncMetaRepository {
    store: OfflineStore,
}

impl SyncMetaRepository {
    pub fn new(store: OfflineStore) -> Self {
        SyncMetaRepository { store }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<Value>> {
        let row = sqlx::query("SELECT value FROM _sync_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.store.pool())
            .await?;
        row.map(|r| {
            let text: String = r.get("value");
            Ok(serde_json::from_str(&text)?)
        })
        .transpose()
    }

    pub async fn set(&self, key: &str, value: &Value) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO _sync_meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Epoch ms of the last completed sync cycle.
    pub async fn last_sync(&self) -> DbResult<Option<i64>> {
        Ok(self.get(KEY_LAST_SYNC).await?.and_then(|v| v.as_i64()))
    }

    pub async fn set_last_sync(&self, epoch_ms: i64) -> DbResult<()> {
        self.set(KEY_LAST_SYNC, &Value::from(epoch_ms)).await
    }
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

    #[tokio::test]
    async fn values_upsert_and_read_back() {
        let store = OfflineStore::open(DbConfig::in_memory(), SchemaRegistry::standard())
            .await
            .unwrap();
        let meta = SyncMetaRepository::new(store);

        assert_eq!(meta.last_sync().await.unwrap(), None);

        meta.set_last_sync(1_700_000_000_000).await.unwrap();
        assert_eq!(meta.last_sync().await.unwrap(), Some(1_700_000_000_000));

        meta.set_last_sync(1_700_000_100_000).await.unwrap();
        assert_eq!(meta.last_sync().await.unwrap(), Some(1_700_000_100_000));

        meta.set("pullCursor", &json!({"groups": 42})).await.unwrap();
        assert_eq!(
            meta.get("pullCursor").await.unwrap(),
            Some(json!({"groups": 42}))
        );
    }
}

//! # Entity Container Operations
//!
//! Row-level operations over one entity container. Every function takes a
//! `&mut SqliteConnection`, so the same helpers run inside a repository
//! transaction or against a plain pool connection.
//!
//! ## Row Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Entity Container Row                                │
//! │                                                                         │
//! │  id TEXT PRIMARY KEY        ← canonical key form of the record id      │
//! │  organization_id TEXT       ← promoted for the tenant index            │
//! │  sync_version INTEGER       ← promoted for the _syncVersion index      │
//! │  dirty INTEGER              ← promoted for merge/pull scans            │
//! │  local_updated_at INTEGER                                              │
//! │  server_updated_at INTEGER                                             │
//! │  data TEXT                  ← the full record as JSON (source of truth)│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The JSON payload is the source of truth; the promoted columns are derived
//! from it on every write. Queries on other fields go through
//! `json_extract`, backed by the expression indexes the schema declares.

use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use campfire_core::error::CoreError;
use campfire_core::types::{
    EntityRecord, FIELD_DIRTY, FIELD_LOCAL_UPDATED_AT, FIELD_SERVER_UPDATED_AT,
    FIELD_SYNC_VERSION,
};

use crate::error::{DbError, DbResult};

// =============================================================================
// Identifier Helpers
// =============================================================================

/// Quotes a SQL identifier. Container names are validated at schema build;
/// embedded quotes are doubled regardless.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Field names usable inside a `json_extract` path or an index declaration.
pub(crate) fn valid_field_name(field: &str) -> bool {
    let mut bytes = field.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// SQL expression addressing a queryable field: promoted columns by name,
/// everything else through `json_extract`.
fn field_expr(field: &str) -> DbResult<String> {
    if !valid_field_name(field) {
        return Err(DbError::InvalidIndex(field.to_string()));
    }
    Ok(match field {
        "organization_id" => "organization_id".to_string(),
        f if f == FIELD_SYNC_VERSION => "sync_version".to_string(),
        f if f == FIELD_DIRTY => "dirty".to_string(),
        f if f == FIELD_LOCAL_UPDATED_AT => "local_updated_at".to_string(),
        f if f == FIELD_SERVER_UPDATED_AT => "server_updated_at".to_string(),
        f => format!("json_extract(data, '$.{f}')"),
    })
}

// =============================================================================
// Value Binding
// =============================================================================

/// JSON scalar lowered to a SQLite value. `json_extract` yields INTEGER for
/// JSON booleans, so booleans bind as 0/1.
enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Int(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match to_sql_value(value) {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Real(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
    }
}

fn row_to_record(row: &SqliteRow) -> DbResult<EntityRecord> {
    let data: String = row.try_get("data")?;
    let fields: Map<String, Value> = serde_json::from_str(&data)?;
    Ok(EntityRecord::new(fields))
}

// =============================================================================
// Writes
// =============================================================================

/// Inserts or replaces one record, refreshing the promoted columns from the
/// JSON payload. The record must carry a usable primary key.
pub(crate) async fn put(
    conn: &mut SqliteConnection,
    table: &str,
    record: &EntityRecord,
) -> DbResult<()> {
    let id = record
        .id()
        .ok_or_else(|| CoreError::InvalidRecord("record has no usable id".to_string()))?;

    let sql = format!(
        "INSERT OR REPLACE INTO {} \
         (id, organization_id, sync_version, dirty, local_updated_at, server_updated_at, data) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        quote_ident(table)
    );

    sqlx::query(&sql)
        .bind(id.as_key())
        .bind(record.organization_id())
        .bind(record.sync_version())
        .bind(i64::from(record.dirty()))
        .bind(record.local_updated_at())
        .bind(record.server_updated_at())
        .bind(serde_json::to_string(record.fields())?)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub(crate) async fn bulk_put(
    conn: &mut SqliteConnection,
    table: &str,
    records: &[EntityRecord],
) -> DbResult<()> {
    for record in records {
        put(conn, table, record).await?;
    }
    Ok(())
}

/// Deletes by canonical key. Returns whether a row existed.
pub(crate) async fn delete(
    conn: &mut SqliteConnection,
    table: &str,
    id_key: &str,
) -> DbResult<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", quote_ident(table));
    let result = sqlx::query(&sql).bind(id_key).execute(&mut *conn).await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn bulk_delete(
    conn: &mut SqliteConnection,
    table: &str,
    id_keys: &[String],
) -> DbResult<u64> {
    let mut deleted = 0;
    for key in id_keys {
        if delete(conn, table, key).await? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

pub(crate) async fn clear(conn: &mut SqliteConnection, table: &str) -> DbResult<()> {
    let sql = format!("DELETE FROM {}", quote_ident(table));
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

/// Deletes every non-dirty row of the tenant. Dirty rows survive a full
/// refresh.
pub(crate) async fn delete_clean_for_organization(
    conn: &mut SqliteConnection,
    table: &str,
    organization_id: &str,
) -> DbResult<u64> {
    let sql = format!(
        "DELETE FROM {} WHERE organization_id = ?1 AND dirty = 0",
        quote_ident(table)
    );
    let result = sqlx::query(&sql)
        .bind(organization_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// Reads
// =============================================================================

pub(crate) async fn get(
    conn: &mut SqliteConnection,
    table: &str,
    id_key: &str,
) -> DbResult<Option<EntityRecord>> {
    let sql = format!("SELECT data FROM {} WHERE id = ?1", quote_ident(table));
    let row = sqlx::query(&sql)
        .bind(id_key)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_record).transpose()
}

pub(crate) async fn all(conn: &mut SqliteConnection, table: &str) -> DbResult<Vec<EntityRecord>> {
    let sql = format!("SELECT data FROM {} ORDER BY id", quote_ident(table));
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_record).collect()
}

pub(crate) async fn by_organization(
    conn: &mut SqliteConnection,
    table: &str,
    organization_id: &str,
) -> DbResult<Vec<EntityRecord>> {
    let sql = format!(
        "SELECT data FROM {} WHERE organization_id = ?1 ORDER BY id",
        quote_ident(table)
    );
    let rows = sqlx::query(&sql)
        .bind(organization_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(row_to_record).collect()
}

/// Equality query over one or more indexed fields.
pub(crate) async fn by_fields(
    conn: &mut SqliteConnection,
    table: &str,
    filters: &[(&str, Value)],
) -> DbResult<Vec<EntityRecord>> {
    let (sql, values) = filtered_sql("SELECT data FROM", table, filters)?;
    let mut query = sqlx::query(&sql);
    for value in &values {
        query = bind_value(query, value);
    }
    let rows = query.fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_record).collect()
}

pub(crate) async fn count_by_fields(
    conn: &mut SqliteConnection,
    table: &str,
    filters: &[(&str, Value)],
) -> DbResult<i64> {
    let (sql, values) = filtered_sql("SELECT COUNT(*) AS n FROM", table, filters)?;
    let mut query = sqlx::query(&sql);
    for value in &values {
        query = bind_value(query, value);
    }
    let row = query.fetch_one(&mut *conn).await?;
    Ok(row.try_get("n")?)
}

fn filtered_sql(
    prefix: &str,
    table: &str,
    filters: &[(&str, Value)],
) -> DbResult<(String, Vec<Value>)> {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut values = Vec::with_capacity(filters.len());
    for (i, (field, value)) in filters.iter().enumerate() {
        clauses.push(format!("{} = ?{}", field_expr(field)?, i + 1));
        values.push(value.clone());
    }
    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Ok((
        format!("{prefix} {}{where_clause}", quote_ident(table)),
        values,
    ))
}

// =============================================================================
// Dirty-Flag Scans
// =============================================================================

pub(crate) async fn dirty_records(
    conn: &mut SqliteConnection,
    table: &str,
) -> DbResult<Vec<EntityRecord>> {
    let sql = format!(
        "SELECT data FROM {} WHERE dirty = 1 ORDER BY id",
        quote_ident(table)
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_record).collect()
}

/// Canonical keys of the tenant's dirty rows.
pub(crate) async fn dirty_ids_for_organization(
    conn: &mut SqliteConnection,
    table: &str,
    organization_id: &str,
) -> DbResult<Vec<String>> {
    let sql = format!(
        "SELECT id FROM {} WHERE organization_id = ?1 AND dirty = 1",
        quote_ident(table)
    );
    let rows = sqlx::query(&sql)
        .bind(organization_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter()
        .map(|row| Ok(row.try_get::<String, _>("id")?))
        .collect()
}

/// `(id, sync_version)` of the tenant's clean rows, captured before a full
/// refresh deletes them so versions stay monotone across the refresh.
pub(crate) async fn clean_versions_for_organization(
    conn: &mut SqliteConnection,
    table: &str,
    organization_id: &str,
) -> DbResult<Vec<(String, i64)>> {
    let sql = format!(
        "SELECT id, sync_version FROM {} WHERE organization_id = ?1 AND dirty = 0",
        quote_ident(table)
    );
    let rows = sqlx::query(&sql)
        .bind(organization_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter()
        .map(|row| {
            Ok((
                row.try_get::<String, _>("id")?,
                row.try_get::<i64, _>("sync_version")?,
            ))
        })
        .collect()
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

    async fn open_store() -> OfflineStore {
        OfflineStore::open(DbConfig::in_memory(), SchemaRegistry::standard())
            .await
            .unwrap()
    }

    fn record(value: Value) -> EntityRecord {
        EntityRecord::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips_the_json_payload() {
        let store = open_store().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let rec = record(json!({
            "id": 501,
            "organization_id": "42",
            "name": "Alpha",
            "_syncVersion": 2,
            "_dirty": false,
        }));
        put(&mut conn, "groups", &rec).await.unwrap();

        let loaded = get(&mut conn, "groups", "501").await.unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(get(&mut conn, "groups", "999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_rejects_records_without_an_id() {
        let store = open_store().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let rec = record(json!({"name": "no id"}));
        assert!(put(&mut conn, "groups", &rec).await.is_err());
    }

    #[tokio::test]
    async fn queries_hit_promoted_columns_and_json_fields() {
        let store = open_store().await;
        let mut conn = store.pool().acquire().await.unwrap();

        for (id, org, group) in [(1, "42", 7), (2, "42", 8), (3, "43", 7)] {
            let rec = record(json!({
                "id": id,
                "organization_id": org,
                "group_id": group,
                "_dirty": id == 2,
            }));
            put(&mut conn, "participants", &rec).await.unwrap();
        }

        let by_org = by_organization(&mut conn, "participants", "42").await.unwrap();
        assert_eq!(by_org.len(), 2);

        let by_group = by_fields(&mut conn, "participants", &[("group_id", json!(7))])
            .await
            .unwrap();
        assert_eq!(by_group.len(), 2);

        let compound = by_fields(
            &mut conn,
            "participants",
            &[("group_id", json!(7)), ("organization_id", json!("42"))],
        )
        .await
        .unwrap();
        assert_eq!(compound.len(), 1);

        let count = count_by_fields(&mut conn, "participants", &[("group_id", json!(8))])
            .await
            .unwrap();
        assert_eq!(count, 1);

        let dirty = dirty_ids_for_organization(&mut conn, "participants", "42")
            .await
            .unwrap();
        assert_eq!(dirty, vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn clean_rows_are_deleted_dirty_rows_survive() {
        let store = open_store().await;
        let mut conn = store.pool().acquire().await.unwrap();

        for (id, dirty) in [(1, false), (2, true), (3, false)] {
            let rec = record(json!({
                "id": id,
                "organization_id": "42",
                "_dirty": dirty,
            }));
            put(&mut conn, "groups", &rec).await.unwrap();
        }

        let deleted = delete_clean_for_organization(&mut conn, "groups", "42")
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let remaining = all(&mut conn, "groups").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].dirty());
    }

    #[tokio::test]
    async fn invalid_field_names_are_rejected() {
        let store = open_store().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let result = by_fields(&mut conn, "groups", &[("name; DROP TABLE", json!(1))]).await;
        assert!(matches!(result, Err(DbError::InvalidIndex(_))));
    }
}

//! # Offline Store
//!
//! Embedded SQLite database hosting one container per declared entity type
//! plus the four control containers (`_outbox`, `_id_map`, `_sync_meta`,
//! `_conflicts`).
//!
//! ## Open Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      OfflineStore::open                                 │
//! │                                                                         │
//! │  DbConfig::new(path) ← Pool settings                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Connect (WAL, NORMAL synchronous, foreign keys, create-if-missing)    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Run embedded migrations ← control tables                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Create entity containers + indexes from the declared schema           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Ready: repositories, outbox manager, ID mapper share the pool         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every container lives in the same database file, so one sqlx transaction
//! spans any set of containers. Repository writes rely on this to keep the
//! entity update and its outbox entry atomic.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use campfire_core::schema::SchemaRegistry;

use crate::entity_table::{quote_ident, valid_field_name};
use crate::error::{DbError, DbResult};
use crate::migrations;

// =============================================================================
// Configuration
// =============================================================================

/// Offline store configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/campfire.db").max_connections(5);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    pub idle_timeout: Duration,

    /// Whether to run migrations on open.
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a configuration with the given path. The file is created on
    /// open if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// In-memory database configuration for tests. An in-memory database
    /// exists per connection, so the pool is pinned to a single connection.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Offline Store
// =============================================================================

/// Handle to the embedded offline database. Cheap to clone; all clones share
/// the pool and the declared schema.
#[derive(Debug, Clone)]
pub struct OfflineStore {
    pool: SqlitePool,
    registry: Arc<SchemaRegistry>,
}

impl OfflineStore {
    /// Opens (or creates) the store and brings it to the declared schema
    /// version.
    ///
    /// ## What This Does
    /// 1. Connects with WAL journal mode, NORMAL synchronous, foreign keys on
    /// 2. Runs the control-table migrations
    /// 3. Creates every declared entity container and its indexes
    ///
    /// ## Errors
    /// `StorageUnavailable` when the engine cannot be opened;
    /// `MigrationFailed` when the control tables cannot be brought current.
    pub async fn open(config: DbConfig, registry: SchemaRegistry) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            schema_version = registry.version(),
            containers = registry.specs().len(),
            "Opening offline store"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::StorageUnavailable(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::StorageUnavailable(e.to_string()))?;

        debug!(max_connections = config.max_connections, "Pool created");

        let store = OfflineStore {
            pool,
            registry: Arc::new(registry),
        };

        if config.run_migrations {
            migrations::run_migrations(&store.pool).await?;
        }
        store.create_containers().await?;

        info!("Offline store ready");
        Ok(store)
    }

    /// The declared schema shared by repositories and the sync engine.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// The underlying pool, for queries not covered by the repositories.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begins a read-write transaction. All containers share one database,
    /// so the transaction spans any set of them.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Deletes every row in every entity and control container in one
    /// transaction. Used on tenant switch and logout; open handles stay
    /// valid.
    pub async fn wipe(&self) -> DbResult<()> {
        info!("Wiping offline store");

        let mut tx = self.pool.begin().await?;
        for spec in self.registry.specs() {
            let sql = format!("DELETE FROM {}", quote_ident(&spec.store_name));
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        for control in ["_outbox", "_id_map", "_sync_meta", "_conflicts"] {
            let sql = format!("DELETE FROM {control}");
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Offline store wiped");
        Ok(())
    }

    /// True when the database answers a trivial query.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Closes the pool. All store operations fail afterwards.
    pub async fn close(&self) {
        info!("Closing offline store");
        self.pool.close().await;
    }

    /// Creates every declared entity container and its indexes. Idempotent.
    async fn create_containers(&self) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        for spec in self.registry.specs() {
            let table = quote_ident(&spec.store_name);

            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n\
                 \x20   id TEXT PRIMARY KEY,\n\
                 \x20   organization_id TEXT,\n\
                 \x20   sync_version INTEGER NOT NULL DEFAULT 0,\n\
                 \x20   dirty INTEGER NOT NULL DEFAULT 0,\n\
                 \x20   local_updated_at INTEGER,\n\
                 \x20   server_updated_at INTEGER,\n\
                 \x20   data TEXT NOT NULL\n\
                 )"
            );
            sqlx::query(&ddl).execute(&mut *tx).await?;

            let org_index = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {table} (organization_id)",
                quote_ident(&format!("idx_{}_organization_id", spec.store_name))
            );
            sqlx::query(&org_index).execute(&mut *tx).await?;

            let version_index = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {table} (sync_version)",
                quote_ident(&format!("idx_{}_sync_version", spec.store_name))
            );
            sqlx::query(&version_index).execute(&mut *tx).await?;

            // Declared extra indexes are expression indexes over the JSON
            // payload.
            for index in &spec.extra_indexes {
                let mut exprs = Vec::with_capacity(index.fields.len());
                for field in &index.fields {
                    if !valid_field_name(field) {
                        return Err(DbError::InvalidIndex(field.clone()));
                    }
                    exprs.push(format!("json_extract(data, '$.{field}')"));
                }
                let sql = format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {table} ({})",
                    quote_ident(&format!("idx_{}_{}", spec.store_name, index.name())),
                    exprs.join(", ")
                );
                sqlx::query(&sql).execute(&mut *tx).await?;
            }

            debug!(container = %spec.store_name, "Container ready");
        }

        tx.commit().await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

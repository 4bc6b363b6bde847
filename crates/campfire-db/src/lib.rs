//! # campfire-db: Offline Store for the Campfire Sync Core
//!
//! Embedded SQLite database hosting one container per entity type plus the
//! four control containers, with the repositories that mutate them.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Campfire Data Flow                                 │
//! │                                                                         │
//! │  Host write (create participant)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   campfire-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────────┐   ┌───────────────┐   ┌──────────────────┐  │   │
//! │  │   │ OfflineStore │   │ Repositories  │   │ Control stores   │  │   │
//! │  │   │ (store.rs)   │   │ (entity.rs)   │   │ outbox / id map  │  │   │
//! │  │   │              │◄──│               │◄──│ meta / conflicts │  │   │
//! │  │   │ pool + DDL   │   │ CRUD + outbox │   │                  │  │   │
//! │  │   └──────────────┘   └───────────────┘   └──────────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL) - one file, one transaction spans everything    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - Pool creation, container DDL, wipe, health check
//! - [`migrations`] - Embedded control-table migrations
//! - `entity_table` - Row-level container operations (crate-internal)
//! - [`repository`] - Entity repository, outbox manager, ID mapper, metadata,
//!   conflicts
//! - [`error`] - Store error types

// =============================================================================
// Module Declarations
// =============================================================================

pub(crate) mod entity_table;
pub mod error;
pub mod migrations;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use store::{DbConfig, OfflineStore};

pub use repository::conflicts::ConflictRepository;
pub use repository::entity::{
    BulkUpsertReport, DirtyOverlap, ReplaceReport, Repository, WriteOptions,
};
pub use repository::id_map::{IdMapper, RepairReport};
pub use repository::meta::{SyncMetaRepository, KEY_LAST_SYNC};
pub use repository::outbox::{OutboxManager, DEFAULT_RETENTION_MS, MAX_RETRIES};

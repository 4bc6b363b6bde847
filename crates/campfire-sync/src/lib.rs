//! # campfire-sync: Sync Engine for the Campfire Offline Core
//!
//! The five-phase push/pull pipeline (Check → Pull → Merge → Push →
//! Reconcile) over the offline store, plus the lifecycle orchestrator that
//! attaches it to a host application. This crate is the only component that
//! talks HTTP.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Crate Layout                                │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     SyncLifecycle (lifecycle.rs)                 │  │
//! │  │   init / cleanup, debounced triggers, manual sync, state view    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │                     SyncEngine (engine.rs)                       │  │
//! │  │   one cycle at a time; abort flag; metrics; phase events         │  │
//! │  └──────┬──────────────────────────────────────────────┬────────────┘  │
//! │         │                                              │               │
//! │  ┌──────▼──────────┐                        ┌──────────▼────────────┐  │
//! │  │ ApiClient       │                        │ campfire-db           │  │
//! │  │ (http.rs, REST) │                        │ outbox / ID map /     │  │
//! │  │ token + tenant  │                        │ conflicts / metadata  │  │
//! │  │ + Correlation-Id│                        └───────────────────────┘  │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - The five-phase sync state machine
//! - [`lifecycle`] - Attach/detach orchestration and trigger timers
//! - [`http`] - REST client (probe, list, create, update, delete)
//! - [`session`] - Host-injected token and tenant capability
//! - [`events`] - Observation event emitter trait
//! - [`config`] - TOML configuration
//! - [`error`] - Sync error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use campfire_core::schema::SchemaRegistry;
//! use campfire_db::{DbConfig, OfflineStore};
//! use campfire_sync::{
//!     NoOpEmitter, SharedSession, SyncConfig, SyncEngine, SyncLifecycle,
//! };
//!
//! let store = OfflineStore::open(DbConfig::new(db_path), SchemaRegistry::standard()).await?;
//! let session = Arc::new(SharedSession::new());
//! let engine = Arc::new(SyncEngine::new(
//!     store.clone(),
//!     SyncConfig::load_or_default(None),
//!     session.clone(),
//!     Arc::new(NoOpEmitter),
//! )?);
//!
//! let lifecycle = SyncLifecycle::new(engine, &store);
//! lifecycle.init_sync().await?;
//!
//! // Later, from a UI button:
//! let report = lifecycle.trigger_manual_sync(Default::default()).await;
//! println!("pushed {} records", report.pushed);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod session;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ApiSettings, EngineSettings, LifecycleSettings, SyncConfig};
pub use engine::{SyncEngine, SyncMetrics, SyncOptions, SyncPhase, SyncReport};
pub use error::{SyncError, SyncResult};
pub use events::{NoOpEmitter, RecordingEmitter, SyncEvent, SyncEventEmitter};
pub use http::{ApiClient, PushOutcome, CORRELATION_HEADER};
pub use lifecycle::{SyncLifecycle, SyncState};
pub use session::{SessionProvider, SharedSession};

//! # campfire-core: Pure Domain Logic for the Campfire Sync Core
//!
//! This crate is the foundation of the Campfire offline-first sync system.
//! It holds every type the store, repositories, and sync engine agree on,
//! as pure data with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Campfire Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Host Application (UI)                        │   │
//! │  │     reads Repositories, observes sync events, never talks HTTP  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ campfire-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐   │   │
//! │  │   │   types   │  │  temp_id  │  │  schema   │  │   error   │   │   │
//! │  │   │  records  │  │ generate  │  │ registry  │  │  domain   │   │   │
//! │  │   │  outbox   │  │ recognize │  │ sync order│  │  errors   │   │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  campfire-db (Offline Store)                    │   │
//! │  │       SQLite containers, outbox, ID map, conflict records       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entity records, outbox entries, ID mappings, conflicts
//! - [`temp_id`] - Temp ID generation and recognition
//! - [`schema`] - Entity specs, sync order, FK registry
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod schema;
pub mod temp_id;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use schema::{ConflictStrategy, EntitySpec, FkField, IndexSpec, SchemaRegistry};
pub use temp_id::{generate_temp_id, is_temp_id, is_temp_value, TEMP_ID_PREFIX};
pub use types::*;

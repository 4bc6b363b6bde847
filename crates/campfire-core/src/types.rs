//! # Sync Domain Types
//!
//! The shared vocabulary of the sync core: opaque entity records with their
//! sync bookkeeping fields, outbox entries with their status machine, ID
//! mappings, and conflict records.
//!
//! ## Entity Record Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Entity Record (opaque JSON map)                    │
//! │                                                                         │
//! │  {                                                                      │
//! │    "id": 501 | "temp_1700000000000_a1b2c3",   ← server or temp ID       │
//! │    "organization_id": "42",                   ← tenant discriminator    │
//! │    "first_name": "Ana", ...                   ← opaque domain fields    │
//! │                                                                         │
//! │    "_syncVersion": 3,         ← bumped on every authoritative write     │
//! │    "_dirty": true,            ← local copy diverges from server copy    │
//! │    "_localUpdatedAt": 17…,    ← ms of most recent local mutation        │
//! │    "_serverUpdatedAt": 17…    ← last server-observed modification       │
//! │  }                                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CoreError;
use crate::temp_id::is_temp_id;

// =============================================================================
// Field Names
// =============================================================================

/// Primary key field.
pub const FIELD_ID: &str = "id";
/// Tenant discriminator field.
pub const FIELD_ORGANIZATION_ID: &str = "organization_id";
/// Monotone counter bumped on every authoritative server write.
pub const FIELD_SYNC_VERSION: &str = "_syncVersion";
/// True while the local copy diverges from the last server-known state.
pub const FIELD_DIRTY: &str = "_dirty";
/// Millisecond timestamp of the most recent local mutation.
pub const FIELD_LOCAL_UPDATED_AT: &str = "_localUpdatedAt";
/// Last server-observed modification time, when known.
pub const FIELD_SERVER_UPDATED_AT: &str = "_serverUpdatedAt";
/// The server's own modification-time field on pulled records.
pub const FIELD_SERVER_CLOCK: &str = "updated_at";

/// Current epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Entity IDs
// =============================================================================

/// A primary-key value: a temp ID minted offline, or a server-assigned
/// integer or string.
///
/// Every ID has a canonical string key form used for store lookups and URL
/// path segments; `to_value` restores the JSON representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityId {
    /// Locally-assigned `temp_<ms>_<6 base36>` identifier.
    Temp(String),
    /// Server-assigned integer identifier.
    Int(i64),
    /// Server-assigned string identifier.
    Text(String),
}

impl EntityId {
    /// Reads an ID out of a JSON value. Non-integer numbers and non-scalar
    /// values are rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if is_temp_id(s) => Some(EntityId::Temp(s.clone())),
            Value::String(s) => Some(EntityId::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(EntityId::Int),
            _ => None,
        }
    }

    /// Rebuilds an ID from its canonical key form. `use_integer` reflects the
    /// entity spec's `use_integer_server_ids`.
    pub fn from_key(key: &str, use_integer: bool) -> Self {
        if is_temp_id(key) {
            EntityId::Temp(key.to_string())
        } else if use_integer {
            match key.parse::<i64>() {
                Ok(n) => EntityId::Int(n),
                Err(_) => EntityId::Text(key.to_string()),
            }
        } else {
            EntityId::Text(key.to_string())
        }
    }

    /// Canonical string key: temp and string IDs verbatim, integers in
    /// decimal.
    pub fn as_key(&self) -> String {
        match self {
            EntityId::Temp(s) | EntityId::Text(s) => s.clone(),
            EntityId::Int(n) => n.to_string(),
        }
    }

    /// JSON representation for record and payload fields.
    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Temp(s) | EntityId::Text(s) => Value::String(s.clone()),
            EntityId::Int(n) => Value::Number((*n).into()),
        }
    }

    /// True for locally-minted temp IDs.
    pub fn is_temp(&self) -> bool {
        matches!(self, EntityId::Temp(_))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

// =============================================================================
// Entity Records
// =============================================================================

/// An opaque entity record: a JSON object carrying domain fields plus the
/// sync bookkeeping fields named by the `FIELD_*` constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EntityRecord {
    fields: Map<String, Value>,
}

impl EntityRecord {
    /// Wraps an existing field map.
    pub fn new(fields: Map<String, Value>) -> Self {
        EntityRecord { fields }
    }

    /// Accepts any JSON object; everything else is rejected.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(fields) => Ok(EntityRecord { fields }),
            other => Err(CoreError::InvalidRecord(format!(
                "expected object, got {other}"
            ))),
        }
    }

    /// The underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consumes the record, returning the field map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// The record as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    // -------------------------------------------------------------------------
    // Sync bookkeeping accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> Option<EntityId> {
        self.fields.get(FIELD_ID).and_then(EntityId::from_value)
    }

    pub fn set_id(&mut self, id: &EntityId) {
        self.fields.insert(FIELD_ID.to_string(), id.to_value());
    }

    /// Tenant discriminator, normalized to its string form.
    pub fn organization_id(&self) -> Option<String> {
        match self.fields.get(FIELD_ORGANIZATION_ID) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn sync_version(&self) -> i64 {
        self.fields
            .get(FIELD_SYNC_VERSION)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn set_sync_version(&mut self, version: i64) {
        self.fields
            .insert(FIELD_SYNC_VERSION.to_string(), version.into());
    }

    pub fn dirty(&self) -> bool {
        self.fields
            .get(FIELD_DIRTY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.fields.insert(FIELD_DIRTY.to_string(), dirty.into());
    }

    pub fn local_updated_at(&self) -> Option<i64> {
        self.fields.get(FIELD_LOCAL_UPDATED_AT).and_then(Value::as_i64)
    }

    pub fn set_local_updated_at(&mut self, ms: i64) {
        self.fields
            .insert(FIELD_LOCAL_UPDATED_AT.to_string(), ms.into());
    }

    pub fn server_updated_at(&self) -> Option<i64> {
        self.fields
            .get(FIELD_SERVER_UPDATED_AT)
            .and_then(Value::as_i64)
    }

    pub fn set_server_updated_at(&mut self, ms: i64) {
        self.fields
            .insert(FIELD_SERVER_UPDATED_AT.to_string(), ms.into());
    }

    /// The server's own modification time on a pulled record, in epoch ms.
    /// Accepts an integer millisecond value or an RFC 3339 string.
    pub fn server_clock(&self) -> Option<i64> {
        match self.fields.get(FIELD_SERVER_CLOCK)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis()),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Mutation helpers
    // -------------------------------------------------------------------------

    /// Shallow-merges a patch into the record. Patch fields win.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) {
        for (k, v) in patch {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    /// A copy of the fields without the underscore-prefixed sync bookkeeping.
    /// This is the shape sent over the wire.
    pub fn external_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl From<Map<String, Value>> for EntityRecord {
    fn from(fields: Map<String, Value>) -> Self {
        EntityRecord { fields }
    }
}

// =============================================================================
// Outbox Entries
// =============================================================================

/// The mutation kind carried by an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(CoreError::InvalidOperation(other.to_string())),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbox entry status.
///
/// ## State Machine
/// ```text
/// pending → in_progress → synced                    (terminal)
///                       → conflict                  (until user resolution)
///                       → pending                   (retryable failure)
///                       → failed                    (retries exhausted, terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    InProgress,
    Synced,
    Conflict,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InProgress => "in_progress",
            OutboxStatus::Synced => "synced",
            OutboxStatus::Conflict => "conflict",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "in_progress" => Ok(OutboxStatus::InProgress),
            "synced" => Ok(OutboxStatus::Synced),
            "conflict" => Ok(OutboxStatus::Conflict),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An FK reference inside an outbox payload that must resolve to a server ID
/// before the entry may push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Entity type the reference points at.
    pub entity_type: String,
    /// The temp ID the payload carries.
    pub temp_id: String,
}

/// One record per pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Monotone local sequence; assigned by the store on insert.
    pub local_id: i64,
    /// UUID generated at enqueue time; the server's deduplication key.
    pub correlation_id: String,
    pub entity_type: String,
    /// Canonical key form of the target's primary key.
    pub entity_id: String,
    /// Set when `entity_id` was a temp ID at enqueue time. Kept after
    /// resolution for audit.
    pub temp_id: Option<String>,
    pub operation: Operation,
    /// Enqueue time, epoch ms.
    pub timestamp: i64,
    /// Create: full entity. Update: the patch. Delete: none.
    pub payload: Option<Value>,
    pub dependencies: Vec<Dependency>,
    pub status: OutboxStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub server_response: Option<Value>,
}

impl OutboxEntry {
    /// Builds a fresh `pending` entry with a new correlation ID. `local_id`
    /// stays 0 until the store assigns the sequence number.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: &EntityId,
        operation: Operation,
        payload: Option<Value>,
        dependencies: Vec<Dependency>,
    ) -> Self {
        OutboxEntry {
            local_id: 0,
            correlation_id: Uuid::new_v4().to_string(),
            entity_type: entity_type.into(),
            entity_id: entity_id.as_key(),
            temp_id: match entity_id {
                EntityId::Temp(t) => Some(t.clone()),
                _ => None,
            },
            operation,
            timestamp: now_ms(),
            payload,
            dependencies,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            server_response: None,
        }
    }
}

/// Per-status outbox counts, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxSummary {
    pub pending: i64,
    pub in_progress: i64,
    pub synced: i64,
    pub conflict: i64,
    pub failed: i64,
}

// =============================================================================
// ID Mappings
// =============================================================================

/// One learned temp → server identity translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMapping {
    pub entity_type: String,
    pub temp_id: String,
    /// Canonical key form of the server-assigned ID.
    pub server_id: String,
    /// Epoch ms when the mapping was learned.
    pub created_at: i64,
}

// =============================================================================
// Conflict Records
// =============================================================================

/// A detected divergence between a dirty local record and a newer server
/// copy. `resolved_at == 0` means unresolved; resolved records are kept as
/// an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub local_version: Value,
    pub server_version: Option<Value>,
    pub outbox_local_id: Option<i64>,
    pub detected_at: i64,
    pub resolved_at: i64,
}

impl ConflictRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at != 0
    }
}

// =============================================================================
// Tests
// =============================================================================

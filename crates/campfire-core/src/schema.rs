//! # Schema Registry
//!
//! Declares the entity containers the offline store hosts, the topological
//! sync order, the recognized FK fields, and each container's conflict
//! strategy. The registry is declared once at startup and shared by the
//! store, the repositories, and the sync engine.
//!
//! ## Sync Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Topological Sync Order                              │
//! │                                                                         │
//! │  groups → participants → activities → badge_templates → attendance     │
//! │    → honors → badge_progress → medication_requirements                  │
//! │    → medication_distributions → carpool_offers → carpool_assignments    │
//! │                                                                         │
//! │  Entities referenced as FKs come first; a create can only push after   │
//! │  every entity it references has a server ID. Unknown types sort last.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::temp_id::is_temp_value;
use crate::types::Dependency;

// =============================================================================
// Conflict Strategy
// =============================================================================

/// How the merge phase treats a dirty local record that a pull has observed
/// a newer server copy for. A closed set consumed by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Last write wins: the local push proceeds and becomes the new truth.
    #[default]
    Lww,
    /// Field-level merge is required; a conflict record is written and the
    /// entry is parked until resolution.
    FieldMerge,
    /// Append-only entities cannot conflict; the create proceeds.
    CreateWins,
    /// A person must decide; a conflict record is written and the entry is
    /// parked until resolution.
    UserResolution,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Lww => "lww",
            ConflictStrategy::FieldMerge => "field_merge",
            ConflictStrategy::CreateWins => "create_wins",
            ConflictStrategy::UserResolution => "user_resolution",
        }
    }

    /// True when a detected overlap must produce a conflict record instead
    /// of pushing through.
    pub fn requires_resolution(&self) -> bool {
        matches!(
            self,
            ConflictStrategy::FieldMerge | ConflictStrategy::UserResolution
        )
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lww" => Ok(ConflictStrategy::Lww),
            "field_merge" => Ok(ConflictStrategy::FieldMerge),
            "create_wins" => Ok(ConflictStrategy::CreateWins),
            "user_resolution" => Ok(ConflictStrategy::UserResolution),
            other => Err(CoreError::InvalidStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Entity Specs
// =============================================================================

/// A declared secondary index over a container: one field, or a compound
/// field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<String>,
}

impl IndexSpec {
    pub fn single(field: impl Into<String>) -> Self {
        IndexSpec {
            fields: vec![field.into()],
        }
    }

    pub fn compound(fields: &[&str]) -> Self {
        IndexSpec {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Stable identifier used in index DDL.
    pub fn name(&self) -> String {
        self.fields.join("_")
    }
}

/// A recognized FK field and the entity type it references. Any such field
/// holding a temp-ID value contributes an outbox dependency and is subject
/// to reference repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FkField {
    pub field: String,
    pub references: String,
}

/// Declaration of one entity container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Container name; also the default server collection path segment.
    pub store_name: String,
    /// Server collection path segment.
    pub collection: String,
    /// Primary key field name.
    pub id_field: String,
    /// Whether the server assigns integer IDs for this type.
    pub use_integer_server_ids: bool,
    pub conflict_strategy: ConflictStrategy,
    /// Read-only types are pulled but never pushed; outbox entries for them
    /// are acknowledged without a request.
    pub read_only: bool,
    /// Declared secondary indexes beyond `organization_id` and
    /// `_syncVersion`.
    pub extra_indexes: Vec<IndexSpec>,
}

impl EntitySpec {
    pub fn new(store_name: impl Into<String>) -> Self {
        let store_name = store_name.into();
        EntitySpec {
            collection: store_name.clone(),
            store_name,
            id_field: "id".to_string(),
            use_integer_server_ids: true,
            conflict_strategy: ConflictStrategy::Lww,
            read_only: false,
            extra_indexes: Vec::new(),
        }
    }

    pub fn conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn string_server_ids(mut self) -> Self {
        self.use_integer_server_ids = false;
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.extra_indexes.push(index);
        self
    }
}

// =============================================================================
// Registry
// =============================================================================

/// The declared schema: containers in topological sync order plus the FK
/// field registry.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRegistry {
    version: u32,
    specs: Vec<EntitySpec>,
    fk_fields: Vec<FkField>,
}

/// Builder validating the declaration before use.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    version: u32,
    specs: Vec<EntitySpec>,
    fk_fields: Vec<FkField>,
}

impl SchemaRegistryBuilder {
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Declares a container. Declaration order is the sync order.
    pub fn entity(mut self, spec: EntitySpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn fk_field(mut self, field: impl Into<String>, references: impl Into<String>) -> Self {
        self.fk_fields.push(FkField {
            field: field.into(),
            references: references.into(),
        });
        self
    }

    pub fn build(self) -> CoreResult<SchemaRegistry> {
        let mut seen = std::collections::HashSet::new();
        for spec in &self.specs {
            if !valid_container_name(&spec.store_name) {
                return Err(CoreError::InvalidSchema(format!(
                    "container name '{}' must match [a-z][a-z0-9_]*",
                    spec.store_name
                )));
            }
            if !seen.insert(spec.store_name.clone()) {
                return Err(CoreError::InvalidSchema(format!(
                    "container '{}' declared twice",
                    spec.store_name
                )));
            }
            if spec.extra_indexes.iter().any(|ix| ix.fields.is_empty()) {
                return Err(CoreError::InvalidSchema(format!(
                    "container '{}' declares an empty index",
                    spec.store_name
                )));
            }
        }
        for fk in &self.fk_fields {
            if !seen.contains(&fk.references) {
                return Err(CoreError::InvalidSchema(format!(
                    "FK field '{}' references undeclared container '{}'",
                    fk.field, fk.references
                )));
            }
        }
        Ok(SchemaRegistry {
            version: self.version,
            specs: self.specs,
            fk_fields: self.fk_fields,
        })
    }
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default().version(1)
    }

    /// The Campfire application schema: the youth-group entity containers in
    /// topological sync order, with the FK fields the payload scanner
    /// recognizes.
    pub fn standard() -> Self {
        SchemaRegistry::builder()
            .version(1)
            .entity(EntitySpec::new("groups"))
            .entity(
                EntitySpec::new("participants")
                    .conflict_strategy(ConflictStrategy::UserResolution)
                    .index(IndexSpec::single("group_id")),
            )
            .entity(EntitySpec::new("activities"))
            .entity(EntitySpec::new("badge_templates").read_only())
            .entity(
                EntitySpec::new("attendance")
                    .index(IndexSpec::compound(&["participant_id", "activity_id"])),
            )
            .entity(EntitySpec::new("honors").index(IndexSpec::single("participant_id")))
            .entity(
                EntitySpec::new("badge_progress")
                    .conflict_strategy(ConflictStrategy::CreateWins)
                    .index(IndexSpec::compound(&["participant_id", "badge_template_id"])),
            )
            .entity(
                EntitySpec::new("medication_requirements")
                    .conflict_strategy(ConflictStrategy::UserResolution),
            )
            .entity(
                EntitySpec::new("medication_distributions")
                    .conflict_strategy(ConflictStrategy::CreateWins)
                    .index(IndexSpec::compound(&[
                        "participant_id",
                        "medication_requirement_id",
                    ])),
            )
            .entity(EntitySpec::new("carpool_offers"))
            .entity(
                EntitySpec::new("carpool_assignments")
                    .index(IndexSpec::compound(&["carpool_offer_id", "participant_id"])),
            )
            .fk_field("group_id", "groups")
            .fk_field("participant_id", "participants")
            .fk_field("activity_id", "activities")
            .fk_field("badge_template_id", "badge_templates")
            .fk_field("honor_id", "honors")
            .fk_field("medication_requirement_id", "medication_requirements")
            .fk_field("carpool_offer_id", "carpool_offers")
            .build()
            .expect("builtin schema is valid")
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Containers in topological sync order.
    pub fn specs(&self) -> &[EntitySpec] {
        &self.specs
    }

    pub fn spec(&self, store_name: &str) -> Option<&EntitySpec> {
        self.specs.iter().find(|s| s.store_name == store_name)
    }

    pub fn contains(&self, store_name: &str) -> bool {
        self.spec(store_name).is_some()
    }

    /// Position in the topological sync order. Unknown types sort last.
    pub fn sync_rank(&self, store_name: &str) -> usize {
        self.specs
            .iter()
            .position(|s| s.store_name == store_name)
            .unwrap_or(usize::MAX)
    }

    pub fn fk_fields(&self) -> &[FkField] {
        &self.fk_fields
    }

    pub fn fk_for_field(&self, field: &str) -> Option<&FkField> {
        self.fk_fields.iter().find(|fk| fk.field == field)
    }

    /// FK fields that point at the given entity type, in declaration order.
    pub fn fk_fields_referencing(&self, store_name: &str) -> Vec<&FkField> {
        self.fk_fields
            .iter()
            .filter(|fk| fk.references == store_name)
            .collect()
    }

    /// Recognized FK fields in `fields` whose value is currently a temp ID.
    pub fn temp_fk_references<'a>(
        &'a self,
        fields: &Map<String, Value>,
    ) -> Vec<(&'a FkField, String)> {
        self.fk_fields
            .iter()
            .filter_map(|fk| match fields.get(&fk.field) {
                Some(value) if is_temp_value(value) => {
                    let Value::String(temp) = value else {
                        return None;
                    };
                    Some((fk, temp.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// The outbox dependencies implied by the temp FK references in a create
    /// payload.
    pub fn extract_dependencies(&self, fields: &Map<String, Value>) -> Vec<Dependency> {
        let mut deps: Vec<Dependency> = Vec::new();
        for (fk, temp_id) in self.temp_fk_references(fields) {
            let dep = Dependency {
                entity_type: fk.references.clone(),
                temp_id,
            };
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        deps
    }
}

fn valid_container_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

// =============================================================================
// Tests
// =============================================================================

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use commons_core::{CredentialKind, CredentialRecord, SchemaId, Visibility};

use crate::error::StoreError;

pub const MEMBERSHIP_SCHEMA: &str = "membership-v1";
pub const STEWARD_SCHEMA: &str = "steward-v1";
pub const ENDORSEMENT_SCHEMA: &str = "endorsement-v1";
pub const REVOCATION_SCHEMA: &str = "revocation-v1";
pub const INVITATION_SCHEMA: &str = "invitation-v1";
pub const SELF_CLAIM_SCHEMA: &str = "self-claim-v1";

/// Field shape and visibility of a credential schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Unique schema identifier.
    pub id: SchemaId,
    /// Human-readable name.
    pub name: String,
    /// What credentials of this schema assert.
    pub kind: CredentialKind,
    /// Whether records replicate to the community log.
    pub visibility: Visibility,
    /// Payload fields that must be present.
    pub required_fields: Vec<String>,
    /// Whether at least one SAID reference is required.
    pub requires_reference: bool,
}

impl SchemaDefinition {
    fn builtin(
        id: &str,
        name: &str,
        kind: CredentialKind,
        visibility: Visibility,
        required_fields: &[&str],
        requires_reference: bool,
    ) -> Self {
        Self {
            id: SchemaId::new(id),
            name: name.into(),
            kind,
            visibility,
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
            requires_reference,
        }
    }
}

/// Registry of credential schemas and their visibility.
///
/// Unknown schemas are accepted without field checks, classified as
/// [`CredentialKind::Other`] and kept private.
pub struct SchemaRegistry {
    schemas: DashMap<SchemaId, SchemaDefinition>,
}

impl SchemaRegistry {
    /// Create a new registry with the built-in community schemas.
    pub fn new() -> Self {
        let registry = Self {
            schemas: DashMap::new(),
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&self) {
        use CredentialKind::*;
        use Visibility::*;

        for schema in [
            SchemaDefinition::builtin(MEMBERSHIP_SCHEMA, "Community Membership", Membership, Community, &["role"], false),
            SchemaDefinition::builtin(STEWARD_SCHEMA, "Operations Steward", Steward, Community, &["role"], false),
            SchemaDefinition::builtin(ENDORSEMENT_SCHEMA, "Member Endorsement", Endorsement, Community, &[], false),
            SchemaDefinition::builtin(REVOCATION_SCHEMA, "Credential Revocation", Revocation, Community, &["reason"], true),
            SchemaDefinition::builtin(INVITATION_SCHEMA, "Invitation", Invitation, Private, &[], false),
            SchemaDefinition::builtin(SELF_CLAIM_SCHEMA, "Self Claim", SelfClaim, Private, &[], false),
        ] {
            self.schemas.insert(schema.id.clone(), schema);
        }
    }

    /// Register a custom schema, replacing any previous definition.
    pub fn register(&self, schema: SchemaDefinition) -> Result<(), StoreError> {
        if schema.id.as_str().is_empty() {
            return Err(StoreError::Malformed("schema id must not be empty".into()));
        }
        tracing::debug!(schema = %schema.id, kind = %schema.kind, "schema registered");
        self.schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    /// Get a schema by ID.
    pub fn get(&self, id: &SchemaId) -> Option<SchemaDefinition> {
        self.schemas.get(id).map(|e| e.value().clone())
    }

    pub fn kind_of(&self, id: &SchemaId) -> CredentialKind {
        self.schemas
            .get(id)
            .map(|e| e.kind)
            .unwrap_or(CredentialKind::Other)
    }

    pub fn visibility_of(&self, id: &SchemaId) -> Visibility {
        self.schemas
            .get(id)
            .map(|e| e.visibility)
            .unwrap_or(Visibility::Private)
    }

    pub fn is_community_visible(&self, id: &SchemaId) -> bool {
        self.visibility_of(id) == Visibility::Community
    }

    /// Community-visible schema IDs, sorted.
    pub fn community_schemas(&self) -> Vec<SchemaId> {
        let mut ids: Vec<SchemaId> = self
            .schemas
            .iter()
            .filter(|e| e.visibility == Visibility::Community)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered schemas.
    pub fn count(&self) -> usize {
        self.schemas.len()
    }

    /// Check identifiers and schema-required fields of a record.
    pub fn validate(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        if !record.said.is_valid() {
            return Err(StoreError::Malformed(format!(
                "invalid said: {:?}",
                record.said.as_str()
            )));
        }
        if !record.issuer.is_valid() {
            return Err(StoreError::Malformed(format!("{}: missing issuer", record.said)));
        }
        if !record.subject.is_valid() {
            return Err(StoreError::Malformed(format!("{}: missing subject", record.said)));
        }
        if record.schema.as_str().is_empty() {
            return Err(StoreError::Malformed(format!("{}: missing schema", record.said)));
        }

        let Some(schema) = self.get(&record.schema) else {
            return Ok(());
        };

        if !schema.required_fields.is_empty() {
            let fields = record.payload.as_object().ok_or_else(|| {
                StoreError::Malformed(format!("{}: payload must be a JSON object", record.said))
            })?;
            for field in &schema.required_fields {
                if fields.get(field).map_or(true, |v| v.is_null()) {
                    return Err(StoreError::Malformed(format!(
                        "{}: missing required field '{}' for schema {}",
                        record.said, field, schema.id
                    )));
                }
            }
        }
        if schema.requires_reference && record.references.is_empty() {
            return Err(StoreError::Malformed(format!(
                "{}: schema {} requires a reference",
                record.said, schema.id
            )));
        }
        Ok(())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Primitive Registry
//!
//! The vocabulary of atomic executable actions. Every plan step and every
//! Motor Cortex invocation must name a primitive registered here, and its
//! params must satisfy the primitive's payload schema.
//!
//! Registration is an idempotent upsert: re-registering an identical schema is
//! a no-op, a conflicting schema fails with `DuplicateDefinition` unless the
//! call is an explicit [`PrimitiveRegistry::update`]. Primitives composed at
//! runtime go through [`PrimitiveRegistry::synthesize`] and keep the ordered
//! list of primitives they were built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::payload::{
    FetchArgs, RecallArgs, RememberArgs, RespondArgs, SearchArgs, SummarizeArgs,
    DIALOGUE_RESOURCE, FETCH, RECALL, REMEMBER, RESPOND, SEARCH, SUMMARIZE,
};
use super::schema::PrimitiveSchema;
use crate::error::{CortexError, CortexResult};

/// Where a primitive came from. Built-ins sort before synthesized primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveOrigin {
    Builtin,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveDefinition {
    pub primitive_type: String,
    pub schema: PrimitiveSchema,
    pub origin: PrimitiveOrigin,
    /// Source primitives, in composition order. Empty for built-ins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_resource: Option<String>,
    /// Bumped on every accepted schema change.
    pub revision: u32,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    Inserted,
    Unchanged,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Register,
    Update,
}

#[derive(Debug, Default)]
pub struct PrimitiveRegistry {
    entries: RwLock<HashMap<String, PrimitiveDefinition>>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in conversational primitives.
    pub fn with_builtins() -> CortexResult<Self> {
        let registry = Self::new();
        let builtins = [
            (FETCH, PrimitiveSchema::of::<FetchArgs>(FETCH)?, None),
            (SEARCH, PrimitiveSchema::of::<SearchArgs>(SEARCH)?, None),
            (SUMMARIZE, PrimitiveSchema::of::<SummarizeArgs>(SUMMARIZE)?, None),
            (
                RESPOND,
                PrimitiveSchema::of::<RespondArgs>(RESPOND)?,
                Some(DIALOGUE_RESOURCE),
            ),
            (REMEMBER, PrimitiveSchema::of::<RememberArgs>(REMEMBER)?, None),
            (RECALL, PrimitiveSchema::of::<RecallArgs>(RECALL)?, None),
        ];
        for (primitive_type, schema, resource) in builtins {
            registry.register(primitive_type, schema)?;
            if let Some(resource) = resource {
                registry.claim_exclusive(primitive_type, resource)?;
            }
        }
        Ok(registry)
    }

    pub fn register(
        &self,
        primitive_type: impl Into<String>,
        schema: PrimitiveSchema,
    ) -> CortexResult<Registration> {
        self.upsert(primitive_type.into(), schema, Mode::Register)
    }

    /// Explicit update: replaces a conflicting schema instead of failing.
    pub fn update(
        &self,
        primitive_type: impl Into<String>,
        schema: PrimitiveSchema,
    ) -> CortexResult<Registration> {
        self.upsert(primitive_type.into(), schema, Mode::Update)
    }

    fn upsert(
        &self,
        primitive_type: String,
        schema: PrimitiveSchema,
        mode: Mode,
    ) -> CortexResult<Registration> {
        let mut entries = self.write();
        if let Some(existing) = entries.get_mut(&primitive_type) {
            if existing.schema == schema {
                return Ok(Registration::Unchanged);
            }
            if mode == Mode::Register {
                return Err(CortexError::DuplicateDefinition(primitive_type));
            }
            existing.schema = schema;
            existing.revision += 1;
            debug!(
                primitive = %primitive_type,
                revision = existing.revision,
                "primitive schema updated"
            );
            return Ok(Registration::Updated);
        }

        debug!(primitive = %primitive_type, "primitive registered");
        entries.insert(
            primitive_type.clone(),
            PrimitiveDefinition {
                primitive_type,
                schema,
                origin: PrimitiveOrigin::Builtin,
                provenance: vec![],
                exclusive_resource: None,
                revision: 1,
                registered_at: Utc::now(),
            },
        );
        Ok(Registration::Inserted)
    }

    /// Register a primitive composed at runtime from existing ones.
    pub fn synthesize(
        &self,
        primitive_type: impl Into<String>,
        schema: PrimitiveSchema,
        sources: Vec<String>,
    ) -> CortexResult<Registration> {
        let primitive_type = primitive_type.into();
        if sources.is_empty() {
            return Err(CortexError::EmptyProvenance(primitive_type));
        }

        let mut entries = self.write();
        if let Some(missing) = sources.iter().find(|s| !entries.contains_key(s.as_str())) {
            return Err(CortexError::NotFound(missing.clone()));
        }
        // Inherit a source's exclusive resource so composites never bypass it.
        let exclusive_resource = sources
            .iter()
            .find_map(|s| entries.get(s).and_then(|d| d.exclusive_resource.clone()));

        if let Some(existing) = entries.get(&primitive_type) {
            if existing.origin == PrimitiveOrigin::Synthesized
                && existing.schema == schema
                && existing.provenance == sources
            {
                return Ok(Registration::Unchanged);
            }
            return Err(CortexError::DuplicateDefinition(primitive_type));
        }

        debug!(primitive = %primitive_type, sources = ?sources, "primitive synthesized");
        entries.insert(
            primitive_type.clone(),
            PrimitiveDefinition {
                primitive_type,
                schema,
                origin: PrimitiveOrigin::Synthesized,
                provenance: sources,
                exclusive_resource,
                revision: 1,
                registered_at: Utc::now(),
            },
        );
        Ok(Registration::Inserted)
    }

    /// Mark a primitive as holding `resource` exclusively within a stage.
    pub fn claim_exclusive(
        &self,
        primitive_type: &str,
        resource: impl Into<String>,
    ) -> CortexResult<()> {
        let mut entries = self.write();
        let definition = entries
            .get_mut(primitive_type)
            .ok_or_else(|| CortexError::NotFound(primitive_type.to_string()))?;
        definition.exclusive_resource = Some(resource.into());
        Ok(())
    }

    pub fn lookup(&self, primitive_type: &str) -> CortexResult<PrimitiveDefinition> {
        self.read()
            .get(primitive_type)
            .cloned()
            .ok_or_else(|| CortexError::NotFound(primitive_type.to_string()))
    }

    pub fn contains(&self, primitive_type: &str) -> bool {
        self.read().contains_key(primitive_type)
    }

    /// Built-ins first, then synthesized primitives; lexicographic within each group.
    pub fn list(&self) -> Vec<PrimitiveDefinition> {
        let mut definitions: Vec<PrimitiveDefinition> = self.read().values().cloned().collect();
        definitions.sort_by(|a, b| {
            a.origin
                .cmp(&b.origin)
                .then_with(|| a.primitive_type.cmp(&b.primitive_type))
        });
        definitions
    }

    /// Check `params` against the payload schema of `primitive_type`.
    pub fn validate_params(&self, primitive_type: &str, params: &Value) -> CortexResult<()> {
        let entries = self.read();
        let definition = entries
            .get(primitive_type)
            .ok_or_else(|| CortexError::NotFound(primitive_type.to_string()))?;
        definition.schema.validate(params).map_err(|message| {
            CortexError::CompilationError(format!(
                "params for '{}' rejected: {}",
                primitive_type, message
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PrimitiveDefinition>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PrimitiveDefinition>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object_schema(name: &str, required: &str) -> PrimitiveSchema {
        PrimitiveSchema::new(
            name,
            json!({
                "type": "object",
                "properties": { required: { "type": "string" } },
                "required": [required]
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = PrimitiveRegistry::new();
        assert_eq!(
            registry.register("translate", object_schema("translate", "text")).unwrap(),
            Registration::Inserted
        );
        assert_eq!(
            registry.register("translate", object_schema("translate", "text")).unwrap(),
            Registration::Unchanged
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("translate").unwrap().revision, 1);
    }

    #[test]
    fn test_conflicting_schema_requires_update() {
        let registry = PrimitiveRegistry::new();
        registry.register("translate", object_schema("translate", "text")).unwrap();

        let err = registry
            .register("translate", object_schema("translate", "body"))
            .unwrap_err();
        assert_eq!(err, CortexError::DuplicateDefinition("translate".to_string()));

        assert_eq!(
            registry.update("translate", object_schema("translate", "body")).unwrap(),
            Registration::Updated
        );
        let definition = registry.lookup("translate").unwrap();
        assert_eq!(definition.revision, 2);
        assert_eq!(definition.origin, PrimitiveOrigin::Builtin);
    }

    #[test]
    fn test_update_inserts_missing_primitive() {
        let registry = PrimitiveRegistry::new();
        assert_eq!(
            registry.update("wave", PrimitiveSchema::any_object("wave").unwrap()).unwrap(),
            Registration::Inserted
        );
        assert!(registry.contains("wave"));
    }

    #[test]
    fn test_lookup_missing() {
        let registry = PrimitiveRegistry::new();
        assert_eq!(
            registry.lookup("nope").unwrap_err(),
            CortexError::NotFound("nope".to_string())
        );
    }

    #[test]
    fn test_builtins_schema_checks_params() {
        let registry = PrimitiveRegistry::with_builtins().unwrap();
        assert!(registry
            .validate_params(FETCH, &json!({ "source": "https://example.org" }))
            .is_ok());
        assert!(matches!(
            registry.validate_params(FETCH, &json!({ "url": "https://example.org" })),
            Err(CortexError::CompilationError(_))
        ));
        assert_eq!(
            registry.lookup(RESPOND).unwrap().exclusive_resource.as_deref(),
            Some(DIALOGUE_RESOURCE)
        );
    }
}

//! Kind registry: resolves kind names (including forward and self
//! references) to their metadata at the moment a relation is used.

use super::kind::EntitySchema;
use super::relation::RelationDescriptor;
use crate::error::{OrmError, OrmResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Source of entity and relation metadata consumed by the engine
pub trait MetadataProvider: Send + Sync {
    /// Metadata for a kind, if registered
    fn schema(&self, kind: &str) -> Option<Arc<EntitySchema>>;

    /// Relation descriptors declared on a kind
    fn relations(&self, kind: &str) -> Vec<RelationDescriptor> {
        self.schema(kind)
            .map(|s| s.relations.clone())
            .unwrap_or_default()
    }

    /// Metadata for a kind, or `UnknownKind`
    fn require(&self, kind: &str) -> OrmResult<Arc<EntitySchema>> {
        self.schema(kind)
            .ok_or_else(|| OrmError::UnknownKind(kind.to_string()))
    }

    /// Resolve a relation's target kind by name.
    fn resolve_target(
        &self,
        owner_kind: &str,
        relation: &RelationDescriptor,
    ) -> OrmResult<Arc<EntitySchema>> {
        let target = relation.target.resolve_name(owner_kind);
        self.schema(target)
            .ok_or_else(|| OrmError::UnresolvedRelation {
                kind: owner_kind.to_string(),
                relation: relation.name.clone(),
                target: target.to_string(),
            })
    }
}

/// Name-keyed registry of entity kinds.
///
/// Kinds may be registered in any order, and after sessions holding the
/// registry have been created.
#[derive(Debug, Default)]
pub struct KindRegistry {
    kinds: RwLock<HashMap<String, Arc<EntitySchema>>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a kind
    pub fn register(&self, schema: EntitySchema) -> OrmResult<()> {
        let schema = schema.normalized()?;
        debug!(kind = %schema.kind, relations = schema.relations.len(), "registering entity kind");
        self.kinds
            .write()
            .insert(schema.kind.clone(), Arc::new(schema));
        Ok(())
    }

    /// Builder-style registration
    pub fn with(self, schema: EntitySchema) -> OrmResult<Self> {
        self.register(schema)?;
        Ok(self)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.read().contains_key(kind)
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kinds.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.kinds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.read().is_empty()
    }
}

impl MetadataProvider for KindRegistry {
    fn schema(&self, kind: &str) -> Option<Arc<EntitySchema>> {
        self.kinds.read().get(kind).cloned()
    }
}

//! Relationship loading and persistence
//!
//! - [`lazy`] / [`async_lazy`]: deferred relation proxies
//! - [`eager`]: one batched query for several relations of many sources
//! - [`cascade`] / [`async_cascade`]: recursive saves with edge creation
//! - [`diff`]: edge removal that precedes an update

pub mod async_cascade;
pub mod async_lazy;
pub mod cascade;
pub mod diff;
pub mod eager;
pub mod lazy;

pub use async_cascade::AsyncCascadeEngine;
pub use async_lazy::AsyncLazyRelation;
pub use cascade::{CascadeContext, CascadeEngine};
pub use eager::{EagerLoad, EagerPlan};
pub use lazy::LazyRelation;

use crate::entity::{EntityRef, Related};
use crate::error::{OrmError, OrmResult};
use crate::graph::NodeId;
use crate::hydrate::Hydrator;
use crate::query::QueryResult;
use crate::schema::{EntitySchema, MetadataProvider, RelationDescriptor};
use std::collections::hash_map::{Entry, HashMap};
use std::sync::Arc;

/// Metadata plus hydrator: everything needed to turn rows into entities
#[derive(Clone)]
pub struct Mapper {
    metadata: Arc<dyn MetadataProvider>,
    hydrator: Arc<dyn Hydrator>,
}

impl Mapper {
    pub fn new(metadata: Arc<dyn MetadataProvider>, hydrator: Arc<dyn Hydrator>) -> Self {
        Self { metadata, hydrator }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataProvider> {
        &self.metadata
    }

    pub fn hydrate(&self, value: &serde_json::Value, schema: &EntitySchema) -> OrmResult<EntityRef> {
        Ok(EntityRef::new(self.hydrator.hydrate(value, schema)?))
    }

    /// Hydrate every node of one column, in row order
    pub(crate) fn hydrate_column(
        &self,
        result: &QueryResult,
        column: &str,
        schema: &EntitySchema,
    ) -> OrmResult<Vec<EntityRef>> {
        let mut members = Vec::with_capacity(result.len());
        for row in result.rows() {
            let value = row.require(column)?;
            if value.is_null() {
                continue;
            }
            members.push(self.hydrate(value, schema)?);
        }
        Ok(members)
    }
}

/// Shape loaded members according to the relation's cardinality
pub(crate) fn shape_related(relation: &RelationDescriptor, members: Vec<EntityRef>) -> Related {
    if relation.is_collection() {
        Related::Collection(members)
    } else {
        Related::Single(members.into_iter().next())
    }
}

/// Owner identity required before touching a relation in the store
pub(crate) fn require_owner(kind: &str, relation: &str, id: Option<NodeId>) -> OrmResult<NodeId> {
    id.ok_or_else(|| OrmError::UnpersistedOwner {
        kind: kind.to_string(),
        relation: relation.to_string(),
    })
}

/// Per-load cache so one node read twice in a result becomes one instance
#[derive(Default)]
pub(crate) struct IdentityMap {
    seen: HashMap<(String, NodeId), EntityRef>,
}

impl IdentityMap {
    /// The shared instance for this node, and whether it was new
    pub(crate) fn intern(&mut self, entity: EntityRef) -> (EntityRef, bool) {
        let Some(id) = entity.id() else {
            return (entity, true);
        };
        match self.seen.entry((entity.kind(), id)) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => (slot.insert(entity).clone(), true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::hydrate::NodeHydrator;
    use crate::schema::KindRegistry;
    use serde_json::json;

    #[test]
    fn test_hydrate_column_skips_nulls() {
        let mapper = Mapper::new(Arc::new(KindRegistry::new()), Arc::new(NodeHydrator));
        let result = QueryResult::new(
            vec!["target".to_string()],
            vec![vec![json!({"id": 1})], vec![json!(null)], vec![json!({"id": 2})]],
        );
        let members = mapper
            .hydrate_column(&result, "target", &EntitySchema::new("Person"))
            .unwrap();
        assert_eq!(members.len(), 2);
        assert!(mapper
            .hydrate_column(&result, "missing", &EntitySchema::new("Person"))
            .is_err());
    }

    #[test]
    fn test_shape_single_takes_first() {
        let a = EntityRef::new(Entity::new("Company"));
        let b = EntityRef::new(Entity::new("Company"));
        let single = RelationDescriptor::single("company", "WORKS_AT", "Company");
        let shaped = shape_related(&single, vec![a.clone(), b]);
        assert!(shaped.single().unwrap().ptr_eq(&a));
        assert!(matches!(shape_related(&single, vec![]), Related::Single(None)));
    }

    #[test]
    fn test_identity_map_shares_instances() {
        let mut map = IdentityMap::default();
        let (first, new) = map.intern(EntityRef::new(Entity::persisted("Person", NodeId::new(1))));
        assert!(new);
        let (again, new) = map.intern(EntityRef::new(Entity::persisted("Person", NodeId::new(1))));
        assert!(!new);
        let (other, _) = map.intern(EntityRef::new(Entity::persisted("Company", NodeId::new(1))));
        assert!(first.ptr_eq(&again));
        assert!(!first.ptr_eq(&other));
    }
}

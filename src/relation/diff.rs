//! Edge removal preceding an update save
//!
//! An update rebuilds relations from scratch: every edge of a relation
//! leaving the entity is deleted, then the cascade recreates one edge per
//! current member. Which relations take part is decided by
//! [`present_relations`]; a relation without a present value keeps its
//! edges untouched.

use crate::entity::{EntityRef, Related, RelationValue};
use crate::error::OrmResult;
use crate::graph::NodeId;
use crate::query::{CypherQuery, QueryBuilder};
use crate::schema::{EntitySchema, RelationDescriptor};

/// A declared relation together with the members it currently holds
#[derive(Debug, Clone)]
pub struct PresentRelation {
    pub relation: RelationDescriptor,
    pub related: Related,
}

/// Snapshot of the relations of `entity` that have a present value, in
/// declaration order.
///
/// Left out: unset slots, single relations explicitly set to none, and
/// lazy proxies that were never loaded. An empty collection is present.
pub fn present_relations(entity: &EntityRef, schema: &EntitySchema) -> Vec<PresentRelation> {
    let guard = entity.read();
    schema
        .relations
        .iter()
        .filter_map(|relation| {
            let related = match guard.relation(&relation.name)? {
                RelationValue::Resolved(related) => related.clone(),
                RelationValue::Lazy(handle) => handle.peek()?,
            };
            if let Related::Single(None) = related {
                return None;
            }
            Some(PresentRelation {
                relation: relation.clone(),
                related,
            })
        })
        .collect()
}

/// One `DELETE` per present relation, for a source that already existed
pub fn delete_queries(
    builder: &QueryBuilder,
    present: &[PresentRelation],
    source_id: NodeId,
) -> OrmResult<Vec<CypherQuery>> {
    present
        .iter()
        .map(|p| builder.relation_delete(&p.relation, source_id))
        .collect()
}

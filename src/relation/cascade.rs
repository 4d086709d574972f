//! Cascade persistence engine (blocking)
//!
//! `save` writes the entity's node, then walks its relations:
//!
//! 1. if the entity existed before this call, delete the old edges of every
//!    relation with a present value (see [`super::diff`]);
//! 2. resolve each member to an identity, recursively saving cascading
//!    members that have none;
//! 3. create one edge per resolved member.
//!
//! Instances are tracked by object identity in a [`CascadeContext`] that
//! lives for one top-level save, so cyclic object graphs terminate. There
//! is no rollback: the first failing statement aborts the save and the
//! statements already executed stay committed.

use super::diff::{self, PresentRelation};
use super::require_owner;
use crate::config::UnpersistedPolicy;
use crate::entity::{EntityIdentity, EntityRef};
use crate::error::{OrmError, OrmResult};
use crate::executor::QueryExecutor;
use crate::graph::NodeId;
use crate::query::{CypherQuery, QueryBuilder, QueryResult, NODE_ID_COLUMN};
use crate::schema::{EntitySchema, MetadataProvider, RelationDescriptor};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

/// Entities already taken up by the current top-level save
#[derive(Debug, Default)]
pub struct CascadeContext {
    visited: FxHashSet<EntityIdentity>,
}

impl CascadeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an instance visited; false if it already was
    pub fn mark(&mut self, entity: &EntityRef) -> bool {
        self.visited.insert(entity.identity())
    }

    pub fn is_visited(&self, entity: &EntityRef) -> bool {
        self.visited.contains(&entity.identity())
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

/// How a relation member ends up on the far side of an edge
pub(crate) enum MemberPlan {
    /// Already has an identity
    Known(NodeId),
    /// Needs a recursive save first
    Cascade,
    /// No edge is created
    Skip,
}

/// Decide what to do with one member. Marks cascading members visited.
pub(crate) fn plan_member(
    owner_kind: &str,
    relation: &RelationDescriptor,
    member: &EntityRef,
    policy: UnpersistedPolicy,
    ctx: &mut CascadeContext,
) -> OrmResult<MemberPlan> {
    if let Some(id) = member.id() {
        return Ok(MemberPlan::Known(id));
    }
    if !relation.cascade {
        return match policy {
            UnpersistedPolicy::Skip => {
                warn!(
                    kind = %owner_kind,
                    relation = %relation.name,
                    "skipping unsaved member of non-cascading relation"
                );
                Ok(MemberPlan::Skip)
            }
            UnpersistedPolicy::Error => Err(OrmError::UnpersistedCascade {
                kind: owner_kind.to_string(),
                relation: relation.name.clone(),
            }),
        };
    }
    if ctx.mark(member) {
        Ok(MemberPlan::Cascade)
    } else {
        // visited earlier in this save; its node write may not have happened yet
        Ok(member.id().map_or(MemberPlan::Skip, MemberPlan::Known))
    }
}

/// Node write for an entity: create when transient, update otherwise
pub(crate) fn node_write(
    builder: &QueryBuilder,
    schema: &EntitySchema,
    entity: &EntityRef,
) -> OrmResult<(CypherQuery, Option<NodeId>)> {
    let guard = entity.read();
    match guard.id() {
        Some(id) => Ok((builder.update_node(schema, id, guard.properties())?, Some(id))),
        None => Ok((builder.create_node(schema, guard.properties()), None)),
    }
}

/// Read the identity returned by a node write and record it on the entity
pub(crate) fn assign_written_id(
    entity: &EntityRef,
    schema: &EntitySchema,
    previous: Option<NodeId>,
    result: &QueryResult,
) -> OrmResult<NodeId> {
    let Some(row) = result.first() else {
        return Err(match previous {
            Some(id) => OrmError::EntityNotFound {
                kind: schema.kind.clone(),
                id,
            },
            None => OrmError::Mapping(format!("create of {} returned no rows", schema.kind)),
        });
    };
    let id = row.get_node_id(NODE_ID_COLUMN)?;
    entity.write().assign_id(id)?;
    Ok(id)
}

/// Blocking cascade engine, borrowed from a session for one save
pub struct CascadeEngine<'a> {
    executor: &'a dyn QueryExecutor,
    metadata: &'a dyn MetadataProvider,
    builder: QueryBuilder,
    policy: UnpersistedPolicy,
}

impl<'a> CascadeEngine<'a> {
    pub fn new(
        executor: &'a dyn QueryExecutor,
        metadata: &'a dyn MetadataProvider,
        policy: UnpersistedPolicy,
    ) -> Self {
        Self {
            executor,
            metadata,
            builder: QueryBuilder::new(),
            policy,
        }
    }

    /// Persist an entity and everything reachable through cascading relations
    pub fn save(&self, entity: &EntityRef) -> OrmResult<NodeId> {
        let mut ctx = CascadeContext::new();
        ctx.mark(entity);
        let id = self.save_in(entity, &mut ctx)?;
        info!(kind = %entity.kind(), id = %id, visited = ctx.len(), "saved entity");
        Ok(id)
    }

    /// Relation sync for an entity whose node is already written
    pub fn cascade_save(&self, entity: &EntityRef, is_update: bool) -> OrmResult<()> {
        let kind = entity.kind();
        let source_id = require_owner(&kind, "*", entity.id())?;
        let schema = self.metadata.require(&kind)?;
        let mut ctx = CascadeContext::new();
        ctx.mark(entity);
        self.cascade_in(entity, &schema, source_id, is_update, &mut ctx)
    }

    fn save_in(&self, entity: &EntityRef, ctx: &mut CascadeContext) -> OrmResult<NodeId> {
        let kind = entity.kind();
        let schema = self.metadata.require(&kind)?;

        let (query, previous) = node_write(&self.builder, &schema, entity)?;
        let result = self.run(&query)?;
        let id = assign_written_id(entity, &schema, previous, &result)?;
        debug!(kind = %kind, id = %id, update = previous.is_some(), "node written");

        self.cascade_in(entity, &schema, id, previous.is_some(), ctx)?;
        Ok(id)
    }

    fn cascade_in(
        &self,
        entity: &EntityRef,
        schema: &EntitySchema,
        source_id: NodeId,
        is_update: bool,
        ctx: &mut CascadeContext,
    ) -> OrmResult<()> {
        let present = diff::present_relations(entity, schema);

        if is_update {
            for query in diff::delete_queries(&self.builder, &present, source_id)? {
                self.run(&query)?;
            }
        }

        for PresentRelation { relation, related } in &present {
            for member in related.members() {
                let target_id = match plan_member(&schema.kind, relation, &member, self.policy, ctx)? {
                    MemberPlan::Known(id) => id,
                    MemberPlan::Cascade => {
                        debug!(kind = %schema.kind, relation = %relation.name, "cascading save");
                        self.save_in(&member, ctx)?
                    }
                    MemberPlan::Skip => continue,
                };
                self.run(&self.builder.relation_create(relation, source_id, target_id)?)?;
            }
        }
        Ok(())
    }

    fn run(&self, query: &CypherQuery) -> OrmResult<QueryResult> {
        debug!(query = %query.text, "executing");
        self.executor.execute(&query.text, &query.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::schema::KindRegistry;
    use crate::testkit::RecordingExecutor;

    fn registry() -> KindRegistry {
        KindRegistry::new()
            .with(
                EntitySchema::new("Person")
                    .with_relation(
                        RelationDescriptor::collection("friends", "KNOWS", "Person").with_cascade(true),
                    )
                    .with_relation(RelationDescriptor::single("company", "WORKS_AT", "Company")),
            )
            .unwrap()
            .with(EntitySchema::new("Company"))
            .unwrap()
    }

    fn person(name: &str) -> EntityRef {
        EntityRef::new(Entity::new("Person").with_property("name", name))
    }

    #[test]
    fn test_cascade_creates_members_then_edges() {
        let executor = RecordingExecutor::new();
        let registry = registry();
        let engine = CascadeEngine::new(&executor, &registry, UnpersistedPolicy::Skip);

        let a = person("A");
        let (b, c) = (person("B"), person("C"));
        a.write().set_collection("friends", vec![b.clone(), c.clone()]);

        let id = engine.save(&a).unwrap();
        assert_eq!(id, NodeId::new(1));
        assert_eq!(b.id(), Some(NodeId::new(2)));
        assert_eq!(c.id(), Some(NodeId::new(3)));

        assert_eq!(executor.count_matching("CREATE (n:Person)"), 3);
        assert_eq!(executor.count_matching("MATCH (source), (target)"), 2);
        assert_eq!(executor.count_matching("MATCH (source)-[r:"), 0);

        // each member node precedes the edge that references it
        let texts = executor.texts();
        assert!(texts[1].starts_with("CREATE (n:Person)"));
        assert!(texts[2].starts_with("MATCH (source), (target)"));
    }

    #[test]
    fn test_cycle_terminates_and_saves_each_once() {
        let executor = RecordingExecutor::new();
        let registry = registry();
        let engine = CascadeEngine::new(&executor, &registry, UnpersistedPolicy::Skip);

        let a = person("A");
        let b = person("B");
        a.write().set_collection("friends", vec![b.clone()]);
        b.write().set_collection("friends", vec![a.clone()]);

        engine.save(&a).unwrap();
        assert_eq!(executor.count_matching("CREATE (n:Person)"), 2);
        assert_eq!(executor.count_matching("MATCH (source), (target)"), 2);
        assert_eq!(a.id(), Some(NodeId::new(1)));
        assert_eq!(b.id(), Some(NodeId::new(2)));
    }

    #[test]
    fn test_non_cascading_unsaved_member_skipped_or_rejected() {
        let executor = RecordingExecutor::new();
        let registry = registry();
        let a = person("A");
        a.write()
            .set_single("company", Some(EntityRef::new(Entity::new("Company"))));

        CascadeEngine::new(&executor, &registry, UnpersistedPolicy::Skip)
            .save(&a)
            .unwrap();
        assert_eq!(executor.count(), 1);

        let b = person("B");
        b.write()
            .set_single("company", Some(EntityRef::new(Entity::new("Company"))));
        let err = CascadeEngine::new(&executor, &registry, UnpersistedPolicy::Error)
            .save(&b)
            .unwrap_err();
        assert!(matches!(err, OrmError::UnpersistedCascade { ref relation, .. } if relation == "company"));
    }

    #[test]
    fn test_update_deletes_then_recreates() {
        let executor = RecordingExecutor::new();
        let registry = registry();
        let engine = CascadeEngine::new(&executor, &registry, UnpersistedPolicy::Skip);

        let a = EntityRef::new(Entity::persisted("Person", NodeId::new(100)));
        let d = EntityRef::new(Entity::persisted("Person", NodeId::new(103)));
        let company = EntityRef::new(Entity::persisted("Company", NodeId::new(200)));
        a.write().set_collection("friends", vec![d]);
        a.write().set_single("company", Some(company));

        engine.save(&a).unwrap();
        let texts = executor.texts();
        assert!(texts[0].starts_with("MATCH (n:Person) WHERE id(n) = $id RETURN n"));
        assert!(texts[1].starts_with("MATCH (source)-[r:KNOWS]->()"));
        assert!(texts[2].starts_with("MATCH (source)-[r:WORKS_AT]->()"));
        assert!(texts[3].ends_with("CREATE (source)-[:KNOWS]->(target)"));
        assert!(texts[4].ends_with("CREATE (source)-[:WORKS_AT]->(target)"));
        assert_eq!(texts.len(), 5);
    }

    #[test]
    fn test_cascade_save_requires_identity() {
        let executor = RecordingExecutor::new();
        let registry = registry();
        let engine = CascadeEngine::new(&executor, &registry, UnpersistedPolicy::Skip);
        assert!(matches!(
            engine.cascade_save(&person("A"), false),
            Err(OrmError::UnpersistedOwner { .. })
        ));
        assert_eq!(executor.count(), 0);
    }

    #[test]
    fn test_failure_aborts_remaining_statements() {
        let executor = RecordingExecutor::with_responder(|query, _| {
            query
                .contains("KNOWS")
                .then(|| Err(OrmError::QueryExecution("edge store offline".to_string())))
        });
        let registry = registry();
        let engine = CascadeEngine::new(&executor, &registry, UnpersistedPolicy::Skip);

        let a = person("A");
        a.write().set_collection("friends", vec![person("B"), person("C")]);
        let err = engine.save(&a).unwrap_err();
        assert!(matches!(err, OrmError::QueryExecution(ref m) if m == "edge store offline"));
        // A, B written; first edge failed; C never reached
        assert_eq!(executor.count_matching("CREATE (n:Person)"), 2);
    }
}

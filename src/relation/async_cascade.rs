//! Cascade persistence engine (suspending)
//!
//! Mirrors [`super::CascadeEngine`] step for step; only the submission
//! yields. Recursion goes through boxed futures.

use super::cascade::{assign_written_id, node_write, plan_member, CascadeContext, MemberPlan};
use super::diff::{self, PresentRelation};
use super::require_owner;
use crate::config::UnpersistedPolicy;
use crate::entity::EntityRef;
use crate::error::OrmResult;
use crate::executor::AsyncQueryExecutor;
use crate::graph::NodeId;
use crate::query::{CypherQuery, QueryBuilder, QueryResult};
use crate::schema::{EntitySchema, MetadataProvider};
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

/// Suspending cascade engine, borrowed from an [`crate::AsyncSession`]
/// for one save.
///
/// Every statement is awaited before the next one is built, so the order
/// of submission is the same as the blocking engine's: node write, edge
/// deletes for an update, then per member the cascaded save (if any)
/// followed by its edge.
pub struct AsyncCascadeEngine<'a> {
    executor: &'a dyn AsyncQueryExecutor,
    metadata: &'a dyn MetadataProvider,
    builder: QueryBuilder,
    policy: UnpersistedPolicy,
}

impl<'a> AsyncCascadeEngine<'a> {
    pub fn new(
        executor: &'a dyn AsyncQueryExecutor,
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

    /// Persist an entity and everything reachable through cascading
    /// relations, each at most once. Returns the entity's identity.
    pub async fn save(&self, entity: &EntityRef) -> OrmResult<NodeId> {
        let mut ctx = CascadeContext::new();
        ctx.mark(entity);
        let id = self.save_in(entity, &mut ctx).await?;
        let kind = entity.kind();
        info!(kind = %kind, id = %id, visited = ctx.len(), "saved entity");
        Ok(id)
    }

    /// Relation sync for an entity whose node is already written. Fails
    /// with `UnpersistedOwner` when the entity has no identity.
    pub async fn cascade_save(&self, entity: &EntityRef, is_update: bool) -> OrmResult<()> {
        let kind = entity.kind();
        let source_id = require_owner(&kind, "*", entity.id())?;
        let schema = self.metadata.require(&kind)?;
        let mut ctx = CascadeContext::new();
        ctx.mark(entity);
        self.cascade_in(entity, &schema, source_id, is_update, &mut ctx)
            .await
    }

    // boxed: save_in and cascade_in recurse into each other
    fn save_in<'b>(
        &'b self,
        entity: &'b EntityRef,
        ctx: &'b mut CascadeContext,
    ) -> BoxFuture<'b, OrmResult<NodeId>> {
        async move {
            let kind = entity.kind();
            let schema = self.metadata.require(&kind)?;

            let (query, previous) = node_write(&self.builder, &schema, entity)?;
            let result = self.run(&query).await?;
            let id = assign_written_id(entity, &schema, previous, &result)?;
            debug!(kind = %kind, id = %id, update = previous.is_some(), "node written");

            self.cascade_in(entity, &schema, id, previous.is_some(), ctx)
                .await?;
            Ok(id)
        }
        .boxed()
    }

    fn cascade_in<'b>(
        &'b self,
        entity: &'b EntityRef,
        schema: &'b EntitySchema,
        source_id: NodeId,
        is_update: bool,
        ctx: &'b mut CascadeContext,
    ) -> BoxFuture<'b, OrmResult<()>> {
        async move {
            let present = diff::present_relations(entity, schema);

            if is_update {
                for query in diff::delete_queries(&self.builder, &present, source_id)? {
                    self.run(&query).await?;
                }
            }

            for PresentRelation { relation, related } in &present {
                for member in related.members() {
                    let plan = plan_member(&schema.kind, relation, &member, self.policy, ctx)?;
                    let target_id = match plan {
                        MemberPlan::Known(id) => id,
                        MemberPlan::Cascade => {
                            debug!(kind = %schema.kind, relation = %relation.name, "cascading save");
                            self.save_in(&member, ctx).await?
                        }
                        MemberPlan::Skip => continue,
                    };
                    let create = self.builder.relation_create(relation, source_id, target_id)?;
                    self.run(&create).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn run(&self, query: &CypherQuery) -> OrmResult<QueryResult> {
        debug!(query = %query.text, "executing");
        self.executor.execute(&query.text, &query.params).await
    }
}

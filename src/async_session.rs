//! Suspending session over an [`AsyncQueryExecutor`]
//!
//! Same operations and state machine as [`crate::Session`]; every store
//! round trip is an `.await` point. Entity locks are never held across
//! one. For batched writes with change tracking, open a
//! [`UnitOfWork`] with [`AsyncSession::begin`].

use crate::config::{OrmConfig, UnpersistedPolicy};
use crate::entity::EntityRef;
use crate::error::{OrmError, OrmResult};
use crate::executor::{AsyncQueryExecutor, HttpExecutor};
use crate::graph::{NodeId, PropertyValue};
use crate::hydrate::{Hydrator, NodeHydrator};
use crate::query::{Aggregate, CypherQuery, IdSelector, QueryBuilder, QueryResult};
use crate::relation::async_lazy::attach_lazy_async;
use crate::relation::{AsyncCascadeEngine, EagerPlan, Mapper};
use crate::schema::MetadataProvider;
use crate::session::{aggregate_value, numeric_aggregate};
use crate::unit_of_work::UnitOfWork;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for saving and loading entities over a suspending
/// executor. Holds no cache between calls.
pub struct AsyncSession {
    executor: Arc<dyn AsyncQueryExecutor>,
    mapper: Mapper,
    builder: QueryBuilder,
    policy: UnpersistedPolicy,
}

impl AsyncSession {
    /// Session with the default node hydrator and skip policy
    pub fn new(
        executor: Arc<dyn AsyncQueryExecutor>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Self {
        Self {
            executor,
            mapper: Mapper::new(metadata, Arc::new(NodeHydrator)),
            builder: QueryBuilder::new(),
            policy: UnpersistedPolicy::default(),
        }
    }

    /// Session whose kinds and cascade policy come from configuration
    pub fn from_config(
        executor: Arc<dyn AsyncQueryExecutor>,
        config: &OrmConfig,
    ) -> OrmResult<Self> {
        let registry = config.registry()?;
        Ok(Self::new(executor, Arc::new(registry)).with_policy(config.cascade.on_unpersisted))
    }

    /// Session over HTTP to the configured endpoint
    pub fn connect(config: &OrmConfig) -> OrmResult<Self> {
        let executor = HttpExecutor::from_config(config)?;
        info!(endpoint = %executor.base_url(), graph = %executor.graph(), "connecting session");
        Self::from_config(Arc::new(executor), config)
    }

    /// Replace the hydrator used for every load
    pub fn with_hydrator(mut self, hydrator: Arc<dyn Hydrator>) -> Self {
        self.mapper = Mapper::new(Arc::clone(self.mapper.metadata()), hydrator);
        self
    }

    /// Policy for unsaved members of non-cascading relations
    pub fn with_policy(mut self, policy: UnpersistedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataProvider> {
        self.mapper.metadata()
    }

    /// Start a unit of work that batches writes until commit
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self)
    }

    fn engine(&self) -> AsyncCascadeEngine<'_> {
        AsyncCascadeEngine::new(
            self.executor.as_ref(),
            self.mapper.metadata().as_ref(),
            self.policy,
        )
    }

    async fn run(&self, query: &CypherQuery) -> OrmResult<QueryResult> {
        debug!(query = %query.text, "executing");
        self.executor.execute(&query.text, &query.params).await
    }

    /// Write the entity's node, then cascade through its relations.
    /// Returns the entity's identity.
    pub async fn save(&self, entity: &EntityRef) -> OrmResult<NodeId> {
        self.engine().save(entity).await
    }

    /// Save each entity in order, each with its own visit set
    pub async fn save_all(&self, entities: &[EntityRef]) -> OrmResult<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(entities.len());
        for entity in entities {
            ids.push(self.save(entity).await?);
        }
        Ok(ids)
    }

    /// Persist relations of an entity whose node is already stored. With
    /// `is_update`, existing edges of every present relation are deleted
    /// first.
    pub async fn cascade_save(&self, entity: &EntityRef, is_update: bool) -> OrmResult<()> {
        self.engine().cascade_save(entity, is_update).await
    }

    /// Install unloaded suspending proxies for every relation not already
    /// populated. Performs no I/O.
    pub fn attach_lazy(&self, entity: &EntityRef) -> OrmResult<()> {
        attach_lazy_async(entity, &self.executor, &self.mapper)
    }

    /// Load entities of `kind` (all of them when `ids` is `None`) together
    /// with the named relations, in one query. Relations not named get
    /// lazy proxies; an empty id list returns nothing without a query.
    pub async fn load_eager(
        &self,
        kind: &str,
        ids: Option<&[NodeId]>,
        relation_names: &[&str],
    ) -> OrmResult<Vec<EntityRef>> {
        let selector = match ids {
            None => IdSelector::All,
            Some([]) => return Ok(Vec::new()),
            Some([id]) => IdSelector::One(*id),
            Some(ids) => IdSelector::Many(ids.to_vec()),
        };
        self.load(kind, &selector, relation_names).await
    }

    async fn load(
        &self,
        kind: &str,
        selector: &IdSelector,
        names: &[&str],
    ) -> OrmResult<Vec<EntityRef>> {
        let plan = EagerPlan::build(
            self.mapper.metadata().as_ref(),
            &self.builder,
            kind,
            selector,
            names,
        )?;
        let result = self.run(&plan.query).await?;
        let load = plan.map(&result, &self.mapper)?;

        for entity in load.entities.iter().chain(&load.members) {
            self.attach_lazy(entity)?;
        }
        info!(
            kind = %kind,
            entities = load.entities.len(),
            fetched = plan.relations.len(),
            "loaded entities"
        );
        Ok(load.entities)
    }

    fn default_fetch(&self, kind: &str) -> OrmResult<Vec<String>> {
        let schema = self.mapper.metadata().require(kind)?;
        Ok(schema
            .eager_relations()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Entity by id; relations declared eager are fetched, the rest are lazy
    pub async fn find_by_id(&self, kind: &str, id: NodeId) -> OrmResult<Option<EntityRef>> {
        let fetch = self.default_fetch(kind)?;
        let fetch: Vec<&str> = fetch.iter().map(String::as_str).collect();
        self.find_by_id_with(kind, id, &fetch).await
    }

    /// Entity by id with the named relations fetched
    pub async fn find_by_id_with(
        &self,
        kind: &str,
        id: NodeId,
        fetch: &[&str],
    ) -> OrmResult<Option<EntityRef>> {
        Ok(self
            .load(kind, &IdSelector::One(id), fetch)
            .await?
            .into_iter()
            .next())
    }

    /// Like [`AsyncSession::find_by_id`], failing with `EntityNotFound`
    pub async fn get_by_id(&self, kind: &str, id: NodeId) -> OrmResult<EntityRef> {
        self.find_by_id(kind, id)
            .await?
            .ok_or_else(|| OrmError::EntityNotFound {
                kind: kind.to_string(),
                id,
            })
    }

    /// Every entity of the kind, with its eager relations
    pub async fn find_all(&self, kind: &str) -> OrmResult<Vec<EntityRef>> {
        let fetch = self.default_fetch(kind)?;
        let fetch: Vec<&str> = fetch.iter().map(String::as_str).collect();
        self.find_all_with(kind, &fetch).await
    }

    pub async fn find_all_with(&self, kind: &str, fetch: &[&str]) -> OrmResult<Vec<EntityRef>> {
        self.load(kind, &IdSelector::All, fetch).await
    }

    /// Entities with the given ids, in one query
    pub async fn find_all_by_id(&self, kind: &str, ids: &[NodeId]) -> OrmResult<Vec<EntityRef>> {
        let fetch = self.default_fetch(kind)?;
        let fetch: Vec<&str> = fetch.iter().map(String::as_str).collect();
        self.find_all_by_id_with(kind, ids, &fetch).await
    }

    pub async fn find_all_by_id_with(
        &self,
        kind: &str,
        ids: &[NodeId],
        fetch: &[&str],
    ) -> OrmResult<Vec<EntityRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.load(kind, &IdSelector::Many(ids.to_vec()), fetch).await
    }

    /// Number of stored entities of the kind
    pub async fn count(&self, kind: &str) -> OrmResult<u64> {
        let schema = self.mapper.metadata().require(kind)?;
        let result = self.run(&self.builder.count(&schema)).await?;
        let count = match result.first() {
            Some(row) => row.get_i64("count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    /// Sum of a numeric property over every entity of the kind; 0 when
    /// nothing matches
    pub async fn sum(&self, kind: &str, property: &str) -> OrmResult<f64> {
        let value = self.aggregate(kind, Aggregate::Sum, property).await?;
        numeric_aggregate(kind, property, value)
    }

    /// Average of a numeric property; 0 when nothing matches
    pub async fn avg(&self, kind: &str, property: &str) -> OrmResult<f64> {
        let value = self.aggregate(kind, Aggregate::Avg, property).await?;
        numeric_aggregate(kind, property, value)
    }

    /// Smallest value of a property, `None` when nothing matches
    pub async fn min(&self, kind: &str, property: &str) -> OrmResult<Option<PropertyValue>> {
        self.aggregate(kind, Aggregate::Min, property).await
    }

    /// Largest value of a property, `None` when nothing matches
    pub async fn max(&self, kind: &str, property: &str) -> OrmResult<Option<PropertyValue>> {
        self.aggregate(kind, Aggregate::Max, property).await
    }

    async fn aggregate(
        &self,
        kind: &str,
        aggregate: Aggregate,
        property: &str,
    ) -> OrmResult<Option<PropertyValue>> {
        let schema = self.mapper.metadata().require(kind)?;
        let result = self
            .run(&self.builder.aggregate(&schema, aggregate, property))
            .await?;
        aggregate_value(&result)
    }

    pub async fn exists_by_id(&self, kind: &str, id: NodeId) -> OrmResult<bool> {
        let schema = self.mapper.metadata().require(kind)?;
        let result = self.run(&self.builder.exists_by_id(&schema, id)?).await?;
        match result.first() {
            Some(row) => row.get_bool("exists"),
            None => Ok(false),
        }
    }

    /// Delete the entity's node and every edge touching it
    pub async fn delete(&self, entity: &EntityRef) -> OrmResult<()> {
        let kind = entity.kind();
        let id = entity.id().ok_or_else(|| {
            OrmError::Mapping(format!("cannot delete a {} that was never saved", kind))
        })?;
        self.delete_by_id(&kind, id).await
    }

    pub async fn delete_by_id(&self, kind: &str, id: NodeId) -> OrmResult<()> {
        let schema = self.mapper.metadata().require(kind)?;
        self.run(&self.builder.delete_nodes(&schema, &IdSelector::One(id))?)
            .await?;
        info!(kind = %kind, id = %id, "deleted entity");
        Ok(())
    }

    pub async fn delete_all(&self, kind: &str) -> OrmResult<()> {
        let schema = self.mapper.metadata().require(kind)?;
        self.run(&self.builder.delete_nodes(&schema, &IdSelector::All)?)
            .await?;
        info!(kind = %kind, "deleted all entities");
        Ok(())
    }
}

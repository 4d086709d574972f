//! Blocking session: the entry point for saving and loading entities
//!
//! A session owns nothing but handles: the executor, the metadata source
//! and the hydrator. It keeps no cache between calls; every save gets a
//! fresh visit set and every load builds fresh entities.

use crate::config::{OrmConfig, UnpersistedPolicy};
use crate::entity::EntityRef;
use crate::error::{OrmError, OrmResult};
use crate::executor::QueryExecutor;
use crate::graph::{NodeId, PropertyValue};
use crate::hydrate::{Hydrator, NodeHydrator};
use crate::query::{
    Aggregate, CypherQuery, IdSelector, QueryBuilder, QueryResult, AGGREGATE_COLUMN,
};
use crate::relation::lazy::attach_lazy;
use crate::relation::{CascadeEngine, EagerPlan, Mapper};
use crate::schema::MetadataProvider;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Session {
    executor: Arc<dyn QueryExecutor>,
    mapper: Mapper,
    builder: QueryBuilder,
    policy: UnpersistedPolicy,
}

impl Session {
    /// Session with the default node hydrator and skip policy
    pub fn new(executor: Arc<dyn QueryExecutor>, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            executor,
            mapper: Mapper::new(metadata, Arc::new(NodeHydrator)),
            builder: QueryBuilder::new(),
            policy: UnpersistedPolicy::default(),
        }
    }

    /// Session whose kinds and cascade policy come from configuration
    pub fn from_config(executor: Arc<dyn QueryExecutor>, config: &OrmConfig) -> OrmResult<Self> {
        let registry = config.registry()?;
        Ok(Self::new(executor, Arc::new(registry)).with_policy(config.cascade.on_unpersisted))
    }

    pub fn with_hydrator(mut self, hydrator: Arc<dyn Hydrator>) -> Self {
        self.mapper = Mapper::new(Arc::clone(self.mapper.metadata()), hydrator);
        self
    }

    pub fn with_policy(mut self, policy: UnpersistedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataProvider> {
        self.mapper.metadata()
    }

    fn engine(&self) -> CascadeEngine<'_> {
        CascadeEngine::new(
            self.executor.as_ref(),
            self.mapper.metadata().as_ref(),
            self.policy,
        )
    }

    fn run(&self, query: &CypherQuery) -> OrmResult<QueryResult> {
        debug!(query = %query.text, "executing");
        self.executor.execute(&query.text, &query.params)
    }

    // ---- persistence ----

    /// Write the entity's node, then cascade through its relations.
    /// Returns the entity's identity.
    pub fn save(&self, entity: &EntityRef) -> OrmResult<NodeId> {
        self.engine().save(entity)
    }

    /// Save each entity in order, each with its own visit set
    pub fn save_all(&self, entities: &[EntityRef]) -> OrmResult<Vec<NodeId>> {
        entities.iter().map(|e| self.save(e)).collect()
    }

    /// Persist relations of an entity whose node is already stored. With
    /// `is_update`, existing edges of every present relation are deleted
    /// first.
    pub fn cascade_save(&self, entity: &EntityRef, is_update: bool) -> OrmResult<()> {
        self.engine().cascade_save(entity, is_update)
    }

    // ---- loading ----

    /// Install unloaded proxies for every relation not already populated
    pub fn attach_lazy(&self, entity: &EntityRef) -> OrmResult<()> {
        attach_lazy(entity, &self.executor, &self.mapper)
    }

    /// Load entities of `kind` (all of them when `ids` is `None`) together
    /// with the named relations, in one query. Relations not named get
    /// lazy proxies.
    pub fn load_eager(
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
        self.load(kind, &selector, relation_names)
    }

    fn load(&self, kind: &str, selector: &IdSelector, names: &[&str]) -> OrmResult<Vec<EntityRef>> {
        let plan = EagerPlan::build(
            self.mapper.metadata().as_ref(),
            &self.builder,
            kind,
            selector,
            names,
        )?;
        let result = self.run(&plan.query)?;
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
    pub fn find_by_id(&self, kind: &str, id: NodeId) -> OrmResult<Option<EntityRef>> {
        let fetch = self.default_fetch(kind)?;
        let fetch: Vec<&str> = fetch.iter().map(String::as_str).collect();
        self.find_by_id_with(kind, id, &fetch)
    }

    /// Entity by id with the named relations fetched
    pub fn find_by_id_with(
        &self,
        kind: &str,
        id: NodeId,
        fetch: &[&str],
    ) -> OrmResult<Option<EntityRef>> {
        Ok(self
            .load(kind, &IdSelector::One(id), fetch)?
            .into_iter()
            .next())
    }

    /// Like [`Session::find_by_id`], failing with `EntityNotFound`
    pub fn get_by_id(&self, kind: &str, id: NodeId) -> OrmResult<EntityRef> {
        self.find_by_id(kind, id)?
            .ok_or_else(|| OrmError::EntityNotFound {
                kind: kind.to_string(),
                id,
            })
    }

    pub fn find_all(&self, kind: &str) -> OrmResult<Vec<EntityRef>> {
        let fetch = self.default_fetch(kind)?;
        let fetch: Vec<&str> = fetch.iter().map(String::as_str).collect();
        self.find_all_with(kind, &fetch)
    }

    pub fn find_all_with(&self, kind: &str, fetch: &[&str]) -> OrmResult<Vec<EntityRef>> {
        self.load(kind, &IdSelector::All, fetch)
    }

    /// Entities with the given ids, in one query
    pub fn find_all_by_id(&self, kind: &str, ids: &[NodeId]) -> OrmResult<Vec<EntityRef>> {
        let fetch = self.default_fetch(kind)?;
        let fetch: Vec<&str> = fetch.iter().map(String::as_str).collect();
        self.find_all_by_id_with(kind, ids, &fetch)
    }

    pub fn find_all_by_id_with(
        &self,
        kind: &str,
        ids: &[NodeId],
        fetch: &[&str],
    ) -> OrmResult<Vec<EntityRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.load(kind, &IdSelector::Many(ids.to_vec()), fetch)
    }

    // ---- utilities ----

    pub fn count(&self, kind: &str) -> OrmResult<u64> {
        let schema = self.mapper.metadata().require(kind)?;
        let result = self.run(&self.builder.count(&schema))?;
        let count = match result.first() {
            Some(row) => row.get_i64("count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    /// Sum of a numeric property over every entity of the kind; 0 when
    /// nothing matches
    pub fn sum(&self, kind: &str, property: &str) -> OrmResult<f64> {
        let value = self.aggregate(kind, Aggregate::Sum, property)?;
        numeric_aggregate(kind, property, value)
    }

    /// Average of a numeric property; 0 when nothing matches
    pub fn avg(&self, kind: &str, property: &str) -> OrmResult<f64> {
        let value = self.aggregate(kind, Aggregate::Avg, property)?;
        numeric_aggregate(kind, property, value)
    }

    /// Smallest value of a property, `None` when nothing matches
    pub fn min(&self, kind: &str, property: &str) -> OrmResult<Option<PropertyValue>> {
        self.aggregate(kind, Aggregate::Min, property)
    }

    /// Largest value of a property, `None` when nothing matches
    pub fn max(&self, kind: &str, property: &str) -> OrmResult<Option<PropertyValue>> {
        self.aggregate(kind, Aggregate::Max, property)
    }

    fn aggregate(
        &self,
        kind: &str,
        aggregate: Aggregate,
        property: &str,
    ) -> OrmResult<Option<PropertyValue>> {
        let schema = self.mapper.metadata().require(kind)?;
        let result = self.run(&self.builder.aggregate(&schema, aggregate, property))?;
        aggregate_value(&result)
    }

    pub fn exists_by_id(&self, kind: &str, id: NodeId) -> OrmResult<bool> {
        let schema = self.mapper.metadata().require(kind)?;
        let result = self.run(&self.builder.exists_by_id(&schema, id)?)?;
        match result.first() {
            Some(row) => row.get_bool("exists"),
            None => Ok(false),
        }
    }

    /// Delete the entity's node and every edge touching it
    pub fn delete(&self, entity: &EntityRef) -> OrmResult<()> {
        let kind = entity.kind();
        let id = entity.id().ok_or_else(|| {
            OrmError::Mapping(format!("cannot delete a {} that was never saved", kind))
        })?;
        self.delete_by_id(&kind, id)
    }

    pub fn delete_by_id(&self, kind: &str, id: NodeId) -> OrmResult<()> {
        let schema = self.mapper.metadata().require(kind)?;
        self.run(&self.builder.delete_nodes(&schema, &IdSelector::One(id))?)?;
        info!(kind = %kind, id = %id, "deleted entity");
        Ok(())
    }

    pub fn delete_all(&self, kind: &str) -> OrmResult<()> {
        let schema = self.mapper.metadata().require(kind)?;
        self.run(&self.builder.delete_nodes(&schema, &IdSelector::All)?)?;
        info!(kind = %kind, "deleted all entities");
        Ok(())
    }
}

/// The aggregate column of the first row; null and no rows both mean none
pub(crate) fn aggregate_value(result: &QueryResult) -> OrmResult<Option<PropertyValue>> {
    let Some(row) = result.first() else {
        return Ok(None);
    };
    let value = PropertyValue::from_json(row.require(AGGREGATE_COLUMN)?);
    Ok((!value.is_null()).then_some(value))
}

pub(crate) fn numeric_aggregate(
    kind: &str,
    property: &str,
    value: Option<PropertyValue>,
) -> OrmResult<f64> {
    match value {
        None => Ok(0.0),
        Some(PropertyValue::Integer(i)) => Ok(i as f64),
        Some(PropertyValue::Float(f)) => Ok(f),
        Some(other) => Err(OrmError::Mapping(format!(
            "{}.{} aggregated to a {}, expected a number",
            kind,
            property,
            other.type_name()
        ))),
    }
}

//! Blocking lazy relation proxy

use super::{require_owner, shape_related, Mapper};
use crate::entity::{EntityRef, LazyHandle, Related};
use crate::error::OrmResult;
use crate::executor::QueryExecutor;
use crate::graph::NodeId;
use crate::query::{QueryBuilder, TARGET_VAR};
use crate::schema::RelationDescriptor;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

enum LazyState {
    Unloaded,
    Loaded(Related),
}

struct LazyInner {
    relation: RelationDescriptor,
    owner_kind: String,
    owner_id: Option<NodeId>,
    executor: Arc<dyn QueryExecutor>,
    mapper: Mapper,
    state: Mutex<LazyState>,
}

/// Relation members fetched on first access and cached afterwards.
///
/// The mutex is held for the duration of the load, so the load query runs
/// at most once per proxy even if two threads race on the first access.
/// Clones share the cached state.
#[derive(Clone)]
pub struct LazyRelation {
    inner: Arc<LazyInner>,
}

impl LazyRelation {
    /// Create an unloaded proxy; performs no I/O
    pub fn new(
        relation: RelationDescriptor,
        owner_kind: impl Into<String>,
        owner_id: Option<NodeId>,
        executor: Arc<dyn QueryExecutor>,
        mapper: Mapper,
    ) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                relation,
                owner_kind: owner_kind.into(),
                owner_id,
                executor,
                mapper,
                state: Mutex::new(LazyState::Unloaded),
            }),
        }
    }

    pub fn relation(&self) -> &RelationDescriptor {
        &self.inner.relation
    }

    pub fn is_loaded(&self) -> bool {
        self.peek().is_some()
    }

    /// Cached value, if loaded
    pub fn peek(&self) -> Option<Related> {
        let state = self.inner.state.try_lock()?;
        match &*state {
            LazyState::Loaded(related) => Some(related.clone()),
            LazyState::Unloaded => None,
        }
    }

    /// Load on first call; later calls return the cached value
    pub fn get(&self) -> OrmResult<Related> {
        let mut state = self.inner.state.lock();
        if let LazyState::Loaded(related) = &*state {
            trace!(relation = %self.inner.relation.name, "lazy relation cache hit");
            return Ok(related.clone());
        }
        let related = self.load()?;
        *state = LazyState::Loaded(related.clone());
        Ok(related)
    }

    /// Single-valued view: the member, or none
    pub fn single(&self) -> OrmResult<Option<EntityRef>> {
        Ok(self.get()?.single())
    }

    /// Collection view
    pub fn members(&self) -> OrmResult<Vec<EntityRef>> {
        Ok(self.get()?.members())
    }

    fn load(&self) -> OrmResult<Related> {
        let inner = &self.inner;
        let owner_id = require_owner(&inner.owner_kind, &inner.relation.name, inner.owner_id)?;
        let target = inner
            .mapper
            .metadata()
            .resolve_target(&inner.owner_kind, &inner.relation)?;

        let query = QueryBuilder::new().relation_load(&inner.relation, owner_id, &target)?;
        debug!(
            kind = %inner.owner_kind,
            relation = %inner.relation.name,
            owner = %owner_id,
            "loading lazy relation"
        );
        let result = inner.executor.execute(&query.text, &query.params)?;

        let members = inner.mapper.hydrate_column(&result, TARGET_VAR, &target)?;
        for member in &members {
            attach_lazy(member, &inner.executor, &inner.mapper)?;
        }
        Ok(shape_related(&inner.relation, members))
    }
}

impl fmt::Debug for LazyRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRelation")
            .field("owner_kind", &self.inner.owner_kind)
            .field("relation", &self.inner.relation.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Install an unloaded proxy in every declared relation slot that is not
/// already populated. Performs no I/O.
pub fn attach_lazy(
    entity: &EntityRef,
    executor: &Arc<dyn QueryExecutor>,
    mapper: &Mapper,
) -> OrmResult<()> {
    let kind = entity.kind();
    let schema = mapper.metadata().require(&kind)?;

    let mut guard = entity.write();
    let owner_id = guard.id();
    for relation in &schema.relations {
        if guard.relation(&relation.name).is_some() {
            continue;
        }
        let proxy = LazyRelation::new(
            relation.clone(),
            kind.clone(),
            owner_id,
            Arc::clone(executor),
            mapper.clone(),
        );
        guard.set_lazy(relation.name.clone(), LazyHandle::Blocking(proxy));
    }
    Ok(())
}

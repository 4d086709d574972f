//! Suspending lazy relation proxy
//!
//! Same contract as [`super::LazyRelation`]; the state lives behind an
//! async mutex so the first access yields while the load query runs.

use super::{require_owner, shape_related, Mapper};
use crate::entity::{EntityRef, LazyHandle, Related};
use crate::error::OrmResult;
use crate::executor::AsyncQueryExecutor;
use crate::graph::NodeId;
use crate::query::{QueryBuilder, TARGET_VAR};
use crate::schema::RelationDescriptor;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

enum LazyState {
    Unloaded,
    Loaded(Related),
}

struct LazyInner {
    relation: RelationDescriptor,
    owner_kind: String,
    owner_id: Option<NodeId>,
    executor: Arc<dyn AsyncQueryExecutor>,
    mapper: Mapper,
    state: Mutex<LazyState>,
}

/// Deferred relation value whose first access suspends on the load query.
///
/// Clones share one state, so the relation is loaded at most once no
/// matter how many handles exist. Concurrent first accesses queue on the
/// async mutex and all observe the single load. A failed load leaves the
/// proxy unloaded and the next access retries.
#[derive(Clone)]
pub struct AsyncLazyRelation {
    inner: Arc<LazyInner>,
}

impl AsyncLazyRelation {
    /// Proxy for `relation` of the owner identified by `owner_kind` and
    /// `owner_id`. Construction performs no I/O.
    pub fn new(
        relation: RelationDescriptor,
        owner_kind: impl Into<String>,
        owner_id: Option<NodeId>,
        executor: Arc<dyn AsyncQueryExecutor>,
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

    /// Descriptor of the relation this proxy stands for
    pub fn relation(&self) -> &RelationDescriptor {
        &self.inner.relation
    }

    /// False while a load is in flight
    pub fn is_loaded(&self) -> bool {
        self.peek().is_some()
    }

    /// Cached value without loading. `None` while unloaded or while a
    /// load holds the lock.
    pub fn peek(&self) -> Option<Related> {
        let state = self.inner.state.try_lock().ok()?;
        match &*state {
            LazyState::Loaded(related) => Some(related.clone()),
            LazyState::Unloaded => None,
        }
    }

    /// Value of the relation, loading it on first access.
    ///
    /// Fails with `UnpersistedOwner` if the owner had no identity when the
    /// proxy was attached, and with `UnresolvedRelation` if the target kind
    /// is not registered.
    pub async fn get(&self) -> OrmResult<Related> {
        let mut state = self.inner.state.lock().await;
        if let LazyState::Loaded(related) = &*state {
            trace!(relation = %self.inner.relation.name, "lazy relation cache hit");
            return Ok(related.clone());
        }
        let related = self.load().await?;
        *state = LazyState::Loaded(related.clone());
        Ok(related)
    }

    /// The member of a single relation, loading on first access
    pub async fn single(&self) -> OrmResult<Option<EntityRef>> {
        Ok(self.get().await?.single())
    }

    /// All members, loading on first access
    pub async fn members(&self) -> OrmResult<Vec<EntityRef>> {
        Ok(self.get().await?.members())
    }

    async fn load(&self) -> OrmResult<Related> {
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
        let result = inner.executor.execute(&query.text, &query.params).await?;

        let members = inner.mapper.hydrate_column(&result, TARGET_VAR, &target)?;
        for member in &members {
            attach_lazy_async(member, &inner.executor, &inner.mapper)?;
        }
        Ok(shape_related(&inner.relation, members))
    }
}

impl fmt::Debug for AsyncLazyRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLazyRelation")
            .field("owner_kind", &self.inner.owner_kind)
            .field("relation", &self.inner.relation.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Suspending counterpart of [`super::lazy::attach_lazy`]. Installing a
/// proxy never touches the store, so this does not need to be async.
pub fn attach_lazy_async(
    entity: &EntityRef,
    executor: &Arc<dyn AsyncQueryExecutor>,
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
        let proxy = AsyncLazyRelation::new(
            relation.clone(),
            kind.clone(),
            owner_id,
            Arc::clone(executor),
            mapper.clone(),
        );
        guard.set_lazy(relation.name.clone(), LazyHandle::Suspending(proxy));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::error::OrmError;
    use crate::hydrate::NodeHydrator;
    use crate::schema::{EntitySchema, KindRegistry};
    use crate::testkit::{node_json, rows, RecordingExecutor};
    use serde_json::json;

    fn setup(owner: Entity) -> (EntityRef, Arc<RecordingExecutor>) {
        let registry = Arc::new(
            KindRegistry::new()
                .with(
                    EntitySchema::new("Employee")
                        .with_relation(RelationDescriptor::single("manager", "REPORTS_TO", "Self")),
                )
                .unwrap(),
        );
        let recording = Arc::new(RecordingExecutor::with_responder(|query, _| {
            query.contains("REPORTS_TO").then(|| {
                Ok(rows(
                    &["target"],
                    vec![vec![node_json(5, "Employee", json!({"name": "Boss"}))]],
                ))
            })
        }));
        let exec: Arc<dyn AsyncQueryExecutor> = recording.clone();
        let mapper = Mapper::new(registry, Arc::new(NodeHydrator));
        let owner = EntityRef::new(owner);
        attach_lazy_async(&owner, &exec, &mapper).unwrap();
        (owner, recording)
    }

    #[tokio::test]
    async fn test_async_load_once() {
        let (owner, recording) = setup(Entity::persisted("Employee", NodeId::new(1)));
        assert_eq!(recording.count(), 0);

        let manager = owner.related_async("manager").await.unwrap().unwrap();
        let boss = manager.single().unwrap();
        assert_eq!(boss.id(), Some(NodeId::new(5)));
        assert_eq!(boss.kind(), "Employee");
        assert_eq!(recording.count(), 1);

        owner.related_async("manager").await.unwrap();
        // once loaded, the blocking accessor can read the cache too
        assert!(owner.related("manager").unwrap().is_some());
        assert_eq!(recording.count(), 1);
    }

    #[tokio::test]
    async fn test_blocking_access_before_load_is_rejected() {
        let (owner, recording) = setup(Entity::persisted("Employee", NodeId::new(1)));
        assert!(matches!(owner.related("manager"), Err(OrmError::Config(_))));
        assert_eq!(recording.count(), 0);
    }

    #[tokio::test]
    async fn test_unpersisted_owner() {
        let (owner, recording) = setup(Entity::new("Employee"));
        assert!(matches!(
            owner.related_async("manager").await,
            Err(OrmError::UnpersistedOwner { .. })
        ));
        assert_eq!(recording.count(), 0);
    }
}

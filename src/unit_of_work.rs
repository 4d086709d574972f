//! Unit of work over an [`AsyncSession`]
//!
//! Changes are recorded in memory and written on [`UnitOfWork::flush`] or
//! [`UnitOfWork::commit`]. Entities read through [`UnitOfWork::get`] are
//! kept in an identity map and snapshotted, so property edits made to them
//! are detected and written without an explicit `add`.

use crate::async_session::AsyncSession;
use crate::entity::{EntityIdentity, EntityRef};
use crate::error::{OrmError, OrmResult};
use crate::graph::{NodeId, PropertyMap};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Lifecycle of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Accepting changes
    Active,
    /// Closed; every operation fails with `SessionClosed`
    Closed,
}

/// Pending inserts, updates and deletes against one session.
///
/// The store commits each statement on its own, so `commit` is a flush:
/// a failure part way leaves the entities that were not yet written
/// pending, and they are retried by the next flush.
///
/// # Example
///
/// ```rust,ignore
/// let mut work = session.begin();
/// let ada = work.get("Person", NodeId::new(1)).await?.unwrap();
/// ada.write().set_property("age", 37i64);
/// work.add(EntityRef::new(Entity::new("Person").with_property("name", "Bob")))?;
/// work.commit().await?; // one update, one create
/// ```
pub struct UnitOfWork<'s> {
    session: &'s AsyncSession,
    state: UnitState,
    identities: HashMap<(String, NodeId), EntityRef>,
    snapshots: HashMap<EntityIdentity, PropertyMap>,
    new: IndexMap<EntityIdentity, EntityRef>,
    dirty: IndexMap<EntityIdentity, EntityRef>,
    deleted: IndexMap<EntityIdentity, EntityRef>,
}

impl<'s> UnitOfWork<'s> {
    pub(crate) fn new(session: &'s AsyncSession) -> Self {
        debug!("unit of work started");
        Self {
            session,
            state: UnitState::Active,
            identities: HashMap::new(),
            snapshots: HashMap::new(),
            new: IndexMap::new(),
            dirty: IndexMap::new(),
            deleted: IndexMap::new(),
        }
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == UnitState::Active
    }

    /// Schedule an entity to be written.
    ///
    /// A transient entity is created on flush. A persisted one is saved on
    /// flush whether or not it changed, which also rebuilds its relations.
    /// Adding an entity scheduled for deletion cancels the delete.
    pub fn add(&mut self, entity: EntityRef) -> OrmResult<()> {
        self.ensure_active()?;
        let identity = entity.identity();
        if self.deleted.shift_remove(&identity).is_some() {
            self.dirty.insert(identity, entity);
            return Ok(());
        }
        if self.new.contains_key(&identity) || self.dirty.contains_key(&identity) {
            return Ok(());
        }
        if entity.id().is_some() {
            self.track(&entity);
            self.dirty.insert(identity, entity);
        } else {
            self.snapshot(&entity);
            self.new.insert(identity, entity);
        }
        Ok(())
    }

    /// Schedule an entity for deletion. An entity added in this unit of
    /// work and never flushed is simply dropped.
    pub fn delete(&mut self, entity: &EntityRef) -> OrmResult<()> {
        self.ensure_active()?;
        let identity = entity.identity();
        if self.new.shift_remove(&identity).is_some() {
            self.snapshots.remove(&identity);
            return Ok(());
        }
        self.dirty.shift_remove(&identity);
        if let Some(id) = entity.id() {
            self.identities.remove(&(entity.kind(), id));
            self.deleted.insert(identity, entity.clone());
        }
        Ok(())
    }

    /// Entity by id, from the identity map when already loaded here
    pub async fn get(&mut self, kind: &str, id: NodeId) -> OrmResult<Option<EntityRef>> {
        self.ensure_active()?;
        if let Some(entity) = self.identities.get(&(kind.to_string(), id)) {
            return Ok(Some(entity.clone()));
        }
        let found = self.session.find_by_id(kind, id).await?;
        if let Some(entity) = &found {
            self.track(entity);
        }
        Ok(found)
    }

    /// Whether the entity's properties differ from the last snapshot.
    /// Entities this unit of work has never seen count as modified.
    pub fn is_modified(&self, entity: &EntityRef) -> bool {
        match self.snapshots.get(&entity.identity()) {
            Some(snapshot) => entity.read().properties() != snapshot,
            None => true,
        }
    }

    /// Anything a flush would write
    pub fn has_pending_changes(&self) -> bool {
        !self.new.is_empty()
            || !self.dirty.is_empty()
            || !self.deleted.is_empty()
            || self.modified_tracked().next().is_some()
    }

    /// Write every pending change: creates, then updates, then deletes
    pub async fn flush(&mut self) -> OrmResult<()> {
        self.ensure_active()?;

        let new: Vec<EntityRef> = self.new.values().cloned().collect();
        for entity in new {
            self.session.save(&entity).await?;
            self.new.shift_remove(&entity.identity());
            self.track(&entity);
        }

        let mut updates: Vec<EntityRef> = self.dirty.values().cloned().collect();
        for entity in self.modified_tracked() {
            if !updates.iter().any(|e| e.ptr_eq(entity)) {
                updates.push(entity.clone());
            }
        }
        for entity in updates {
            self.session.save(&entity).await?;
            self.dirty.shift_remove(&entity.identity());
            self.snapshot(&entity);
        }

        let deleted: Vec<EntityRef> = self.deleted.values().cloned().collect();
        for entity in deleted {
            self.session.delete(&entity).await?;
            let identity = entity.identity();
            self.deleted.shift_remove(&identity);
            self.snapshots.remove(&identity);
        }
        Ok(())
    }

    pub async fn commit(&mut self) -> OrmResult<()> {
        self.flush().await?;
        info!(tracked = self.identities.len(), "unit of work committed");
        Ok(())
    }

    /// Drop pending changes and restore the properties of every tracked
    /// entity to their last snapshot. Nothing already flushed is undone.
    pub fn rollback(&mut self) -> OrmResult<()> {
        self.ensure_active()?;
        self.new.clear();
        self.dirty.clear();
        self.deleted.clear();
        for entity in self.identities.values() {
            if let Some(snapshot) = self.snapshots.get(&entity.identity()) {
                entity.write().set_properties(snapshot.clone());
            }
        }
        warn!("unit of work rolled back");
        Ok(())
    }

    /// Forget everything; later calls fail with `SessionClosed`
    pub fn close(&mut self) {
        if self.state == UnitState::Active && self.has_pending_changes() {
            warn!("unit of work closed with pending changes");
        }
        self.identities.clear();
        self.snapshots.clear();
        self.new.clear();
        self.dirty.clear();
        self.deleted.clear();
        self.state = UnitState::Closed;
    }

    fn ensure_active(&self) -> OrmResult<()> {
        match self.state {
            UnitState::Active => Ok(()),
            UnitState::Closed => Err(OrmError::SessionClosed),
        }
    }

    fn track(&mut self, entity: &EntityRef) {
        if let Some(id) = entity.id() {
            self.identities.insert((entity.kind(), id), entity.clone());
        }
        self.snapshot(entity);
    }

    fn snapshot(&mut self, entity: &EntityRef) {
        let properties = entity.read().properties().clone();
        self.snapshots.insert(entity.identity(), properties);
    }

    fn modified_tracked(&self) -> impl Iterator<Item = &EntityRef> + '_ {
        self.identities
            .values()
            .filter(|e| !self.deleted.contains_key(&e.identity()) && self.is_modified(e))
    }
}

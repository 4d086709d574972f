//! Entities and their relation slots
//!
//! An [`Entity`] is a kind name, an optional store identity, scalar
//! properties and one slot per relation. Entities are shared through
//! [`EntityRef`] so that in-memory object graphs may contain cycles; the
//! cascade engine tells instances apart by [`EntityIdentity`], the address
//! of the shared allocation, because unsaved entities have no id yet.

use crate::error::{OrmError, OrmResult};
use crate::graph::{NodeId, PropertyMap, PropertyValue};
use crate::relation::{AsyncLazyRelation, LazyRelation};
use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;

/// Object identity of an in-memory entity instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityIdentity(usize);

/// Resolved members of a relation
#[derive(Debug, Clone)]
pub enum Related {
    Single(Option<EntityRef>),
    Collection(Vec<EntityRef>),
}

impl Related {
    /// Members as a list; a single relation yields zero or one
    pub fn members(&self) -> Vec<EntityRef> {
        match self {
            Related::Single(one) => one.iter().cloned().collect(),
            Related::Collection(many) => many.clone(),
        }
    }

    pub fn single(&self) -> Option<EntityRef> {
        match self {
            Related::Single(one) => one.clone(),
            Related::Collection(many) => many.first().cloned(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::Single(one) => usize::from(one.is_some()),
            Related::Collection(many) => many.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deferred relation installed by a session of either flavour
#[derive(Clone)]
pub enum LazyHandle {
    Blocking(LazyRelation),
    Suspending(AsyncLazyRelation),
}

impl LazyHandle {
    pub fn is_loaded(&self) -> bool {
        match self {
            LazyHandle::Blocking(lazy) => lazy.is_loaded(),
            LazyHandle::Suspending(lazy) => lazy.is_loaded(),
        }
    }

    /// Cached value, without loading
    pub fn peek(&self) -> Option<Related> {
        match self {
            LazyHandle::Blocking(lazy) => lazy.peek(),
            LazyHandle::Suspending(lazy) => lazy.peek(),
        }
    }
}

impl fmt::Debug for LazyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flavour = match self {
            LazyHandle::Blocking(_) => "Blocking",
            LazyHandle::Suspending(_) => "Suspending",
        };
        if self.is_loaded() {
            write!(f, "Lazy::{}(loaded)", flavour)
        } else {
            write!(f, "Lazy::{}(<not loaded>)", flavour)
        }
    }
}

/// Content of a relation slot
#[derive(Debug, Clone)]
pub enum RelationValue {
    Resolved(Related),
    Lazy(LazyHandle),
}

/// A typed record mapped to a node in the graph
#[derive(Debug, Clone)]
pub struct Entity {
    kind: String,
    id: Option<NodeId>,
    properties: PropertyMap,
    relations: IndexMap<String, RelationValue>,
}

impl Entity {
    /// New transient entity (no identity yet)
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            properties: PropertyMap::new(),
            relations: IndexMap::new(),
        }
    }

    /// Entity already known to the store, as built by a hydrator
    pub fn persisted(kind: impl Into<String>, id: NodeId) -> Self {
        Self {
            id: Some(id),
            ..Self::new(kind)
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Record the store identity. An identity, once assigned, never changes.
    pub(crate) fn assign_id(&mut self, id: NodeId) -> OrmResult<()> {
        match self.id {
            None => {
                self.id = Some(id);
                Ok(())
            }
            Some(existing) if existing == id => Ok(()),
            Some(existing) => Err(OrmError::Mapping(format!(
                "{} already has identity {}, store returned {}",
                self.kind, existing, id
            ))),
        }
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Replace every property at once
    pub fn set_properties(&mut self, properties: PropertyMap) {
        self.properties = properties;
    }

    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.shift_remove(key)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    pub fn set_related(&mut self, name: impl Into<String>, related: Related) {
        self.relations
            .insert(name.into(), RelationValue::Resolved(related));
    }

    /// Set a single relation; `None` is an explicit clear
    pub fn set_single(&mut self, name: impl Into<String>, member: Option<EntityRef>) {
        self.set_related(name, Related::Single(member));
    }

    pub fn set_collection(&mut self, name: impl Into<String>, members: Vec<EntityRef>) {
        self.set_related(name, Related::Collection(members));
    }

    /// Append to a collection slot, resolving a lazy slot to its cached
    /// value first. Fails if the slot holds an unloaded proxy.
    pub fn push_member(&mut self, name: &str, member: EntityRef) -> OrmResult<()> {
        let mut members = match self.relations.get(name) {
            None => Vec::new(),
            Some(RelationValue::Resolved(related)) => related.members(),
            Some(RelationValue::Lazy(handle)) => match handle.peek() {
                Some(related) => related.members(),
                None => {
                    return Err(OrmError::Mapping(format!(
                        "{}.{} is not loaded; load it before modifying",
                        self.kind, name
                    )))
                }
            },
        };
        members.push(member);
        self.set_collection(name, members);
        Ok(())
    }

    /// Remove the slot entirely; the relation is then ignored on save
    pub fn unset_relation(&mut self, name: &str) -> Option<RelationValue> {
        self.relations.shift_remove(name)
    }

    pub(crate) fn set_lazy(&mut self, name: impl Into<String>, handle: LazyHandle) {
        self.relations.insert(name.into(), RelationValue::Lazy(handle));
    }

    /// JSON view: scalar properties plus one level of loaded relations.
    /// Unloaded proxies are left out.
    pub fn to_json(&self) -> serde_json::Value {
        let mut relations = serde_json::Map::new();
        for (name, value) in &self.relations {
            let related = match value {
                RelationValue::Resolved(related) => Some(related.clone()),
                RelationValue::Lazy(handle) => handle.peek(),
            };
            let Some(related) = related else { continue };
            let json = match related {
                Related::Single(None) => serde_json::Value::Null,
                Related::Single(Some(member)) => member.read().summary_json(),
                Related::Collection(members) => serde_json::Value::Array(
                    members.iter().map(|m| m.read().summary_json()).collect(),
                ),
            };
            relations.insert(name.clone(), json);
        }

        let mut json = self.summary_json();
        if let serde_json::Value::Object(map) = &mut json {
            map.insert("relations".to_string(), serde_json::Value::Object(relations));
        }
        json
    }

    fn summary_json(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::json!({
            "kind": self.kind,
            "id": self.id.map(|id| id.as_u64()),
            "properties": properties,
        })
    }
}

/// Shared handle to an entity instance
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        EntityRef(Arc::new(RwLock::new(entity)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Entity> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Entity> {
        self.0.write()
    }

    pub fn identity(&self) -> EntityIdentity {
        EntityIdentity(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn id(&self) -> Option<NodeId> {
        self.read().id()
    }

    pub fn kind(&self) -> String {
        self.read().kind().to_string()
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.read().property(key).cloned()
    }

    /// Members of a relation, loading a blocking proxy on first access.
    ///
    /// Returns `None` when the slot is unset.
    pub fn related(&self, name: &str) -> OrmResult<Option<Related>> {
        let value = self.read().relation(name).cloned();
        match value {
            None => Ok(None),
            Some(RelationValue::Resolved(related)) => Ok(Some(related)),
            Some(RelationValue::Lazy(LazyHandle::Blocking(lazy))) => lazy.get().map(Some),
            Some(RelationValue::Lazy(LazyHandle::Suspending(lazy))) => match lazy.peek() {
                Some(related) => Ok(Some(related)),
                None => Err(OrmError::Config(format!(
                    "relation '{}' was attached by an async session; use related_async",
                    name
                ))),
            },
        }
    }

    /// Members of a relation, awaiting a suspending proxy on first access.
    pub async fn related_async(&self, name: &str) -> OrmResult<Option<Related>> {
        let value = self.read().relation(name).cloned();
        match value {
            None => Ok(None),
            Some(RelationValue::Resolved(related)) => Ok(Some(related)),
            Some(RelationValue::Lazy(LazyHandle::Blocking(lazy))) => lazy.get().map(Some),
            Some(RelationValue::Lazy(LazyHandle::Suspending(lazy))) => lazy.get().await.map(Some),
        }
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::new(entity)
    }
}

// Prints kind and id only; following relations here could loop on cycles.
impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(entity) => match entity.id {
                Some(id) => write!(f, "EntityRef({}#{})", entity.kind, id.as_u64()),
                None => write!(f, "EntityRef({}#<new>)", entity.kind),
            },
            None => write!(f, "EntityRef(<locked>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_per_instance() {
        let a = EntityRef::new(Entity::new("Person").with_property("name", "A"));
        let a2 = a.clone();
        let b = EntityRef::new(Entity::new("Person").with_property("name", "A"));

        assert_eq!(a.identity(), a2.identity());
        assert_ne!(a.identity(), b.identity());
        assert!(a.ptr_eq(&a2));
    }

    #[test]
    fn test_assign_id_is_write_once() {
        let mut entity = Entity::new("Person");
        assert!(!entity.is_persisted());
        entity.assign_id(NodeId::new(3)).unwrap();
        entity.assign_id(NodeId::new(3)).unwrap();
        assert!(entity.assign_id(NodeId::new(4)).is_err());
        assert_eq!(entity.id(), Some(NodeId::new(3)));
    }

    #[test]
    fn test_related_members() {
        let b = EntityRef::new(Entity::new("Person"));
        let c = EntityRef::new(Entity::new("Person"));
        let related = Related::Collection(vec![b.clone(), c]);
        assert_eq!(related.len(), 2);
        assert!(related.single().unwrap().ptr_eq(&b));

        let none = Related::Single(None);
        assert!(none.is_empty());
        assert!(none.members().is_empty());
    }

    #[test]
    fn test_push_member_and_unset() {
        let mut owner = Entity::new("Person");
        owner
            .push_member("friends", EntityRef::new(Entity::new("Person")))
            .unwrap();
        owner
            .push_member("friends", EntityRef::new(Entity::new("Person")))
            .unwrap();
        match owner.relation("friends") {
            Some(RelationValue::Resolved(related)) => assert_eq!(related.len(), 2),
            other => panic!("unexpected slot {:?}", other),
        }
        assert!(owner.unset_relation("friends").is_some());
        assert!(owner.relation("friends").is_none());
    }

    #[test]
    fn test_to_json_handles_cycles() {
        let a = EntityRef::new(Entity::persisted("Person", NodeId::new(1)).with_property("name", "A"));
        let b = EntityRef::new(Entity::persisted("Person", NodeId::new(2)).with_property("name", "B"));
        a.write().set_collection("friends", vec![b.clone()]);
        b.write().set_collection("friends", vec![a.clone()]);

        let json = a.read().to_json();
        assert_eq!(json["id"], serde_json::json!(1));
        assert_eq!(json["properties"]["name"], serde_json::json!("A"));
        assert_eq!(json["relations"]["friends"][0]["id"], serde_json::json!(2));
        assert_eq!(format!("{:?}", a), "EntityRef(Person#1)");
    }

    #[test]
    fn test_related_on_resolved_and_unset_slots() {
        let owner = EntityRef::new(Entity::new("Person"));
        assert!(owner.related("friends").unwrap().is_none());
        owner.write().set_single("company", None);
        let company = owner.related("company").unwrap().unwrap();
        assert!(company.single().is_none());
    }
}

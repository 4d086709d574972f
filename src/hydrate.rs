//! Turning row values into entities
//!
//! The engine never interprets node values itself; every node column read
//! back from the store goes through a [`Hydrator`].

use crate::entity::Entity;
use crate::error::{OrmError, OrmResult};
use crate::graph::{NodeId, PropertyMap, PropertyValue};
use crate::schema::EntitySchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Converts one node value from a result row into an entity of a kind
pub trait Hydrator: Send + Sync {
    fn hydrate(&self, value: &serde_json::Value, schema: &EntitySchema) -> OrmResult<Entity>;
}

/// Node as the store serializes it inside result rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node ID; servers send it either as a number or a numeric string
    #[serde(deserialize_with = "node_id_lenient")]
    pub id: NodeId,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

fn node_id_lenient<'de, D>(deserializer: D) -> Result<NodeId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(NodeId::new(n)),
        RawId::Text(s) => s
            .parse::<u64>()
            .map(NodeId::new)
            .map_err(|_| serde::de::Error::custom(format!("invalid node id '{}'", s))),
    }
}

/// Default hydrator for `{"id", "labels", "properties"}` node values.
///
/// Property keys are applied in sorted order so entities built from the
/// same node always iterate identically.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeHydrator;

impl Hydrator for NodeHydrator {
    fn hydrate(&self, value: &serde_json::Value, schema: &EntitySchema) -> OrmResult<Entity> {
        let record = NodeRecord::deserialize(value).map_err(|e| {
            OrmError::Mapping(format!("cannot read {} node from {}: {}", schema.kind, value, e))
        })?;

        // The store may report more labels than the kind declares, never fewer.
        if !record.labels.is_empty() {
            if let Some(missing) = schema
                .labels
                .iter()
                .find(|l| !record.labels.iter().any(|r| r == l.as_str()))
            {
                return Err(OrmError::Mapping(format!(
                    "node {} lacks label '{}' required by kind {}",
                    record.id, missing, schema.kind
                )));
            }
        }

        let mut keys: Vec<&String> = record.properties.keys().collect();
        keys.sort();
        let properties: PropertyMap = keys
            .into_iter()
            .map(|k| (k.clone(), PropertyValue::from_json(&record.properties[k])))
            .collect();

        let mut entity = Entity::persisted(schema.kind.clone(), record.id);
        for (key, value) in properties {
            entity.set_property(key, value);
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hydrate_node() {
        let value = json!({
            "id": 7,
            "labels": ["Person"],
            "properties": {"name": "Alice", "age": 30, "tags": ["a", "b"]}
        });
        let entity = NodeHydrator.hydrate(&value, &EntitySchema::new("Person")).unwrap();
        assert_eq!(entity.kind(), "Person");
        assert_eq!(entity.id(), Some(NodeId::new(7)));
        assert_eq!(entity.property("name"), Some(&PropertyValue::from("Alice")));
        assert_eq!(entity.property("age"), Some(&PropertyValue::Integer(30)));
        let keys: Vec<&str> = entity.properties().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["age", "name", "tags"]);
    }

    #[test]
    fn test_string_id_and_missing_fields() {
        let entity = NodeHydrator
            .hydrate(&json!({"id": "12"}), &EntitySchema::new("Company"))
            .unwrap();
        assert_eq!(entity.id(), Some(NodeId::new(12)));
        assert!(entity.properties().is_empty());
    }

    #[test]
    fn test_rejects_bad_values() {
        let schema = EntitySchema::new("Person");
        assert!(matches!(
            NodeHydrator.hydrate(&json!(null), &schema),
            Err(OrmError::Mapping(_))
        ));
        assert!(NodeHydrator.hydrate(&json!({"id": "x"}), &schema).is_err());
        assert!(NodeHydrator
            .hydrate(&json!({"id": 1, "labels": ["Company"]}), &schema)
            .is_err());
    }

    #[test]
    fn test_extra_labels_accepted() {
        let entity = NodeHydrator
            .hydrate(
                &json!({"id": 1, "labels": ["Person", "Individual"]}),
                &EntitySchema::new("Person"),
            )
            .unwrap();
        assert_eq!(entity.id(), Some(NodeId::new(1)));
    }
}

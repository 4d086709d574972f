//! Entity kind metadata

use super::relation::{FetchMode, RelationDescriptor};
use crate::error::{OrmError, OrmResult};
use crate::graph::Label;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Metadata for one entity kind: its node labels and declared relations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub kind: String,
    /// Node labels; an empty list means the kind name is the only label
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

impl EntitySchema {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            labels: vec![Label::new(kind.clone())],
            kind,
            relations: Vec::new(),
        }
    }

    pub fn with_labels<I, L>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Label>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    /// Look up a declared relation by slot name
    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Names of relations whose default mode is eager
    pub fn eager_relations(&self) -> Vec<&str> {
        self.relations
            .iter()
            .filter(|r| r.mode == FetchMode::Eager)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Check the schema and fill in defaults before registration.
    ///
    /// Relation names must be plain identifiers and unique within the kind.
    pub(crate) fn normalized(mut self) -> OrmResult<Self> {
        if self.kind.is_empty() {
            return Err(OrmError::Config("entity kind name is empty".to_string()));
        }
        if self.labels.is_empty() {
            self.labels.push(Label::new(self.kind.clone()));
        }

        let mut seen = HashSet::new();
        for rel in &self.relations {
            if !is_identifier(&rel.name) {
                return Err(OrmError::Config(format!(
                    "{}: invalid relation name '{}'",
                    self.kind, rel.name
                )));
            }
            if !seen.insert(rel.name.as_str()) {
                return Err(OrmError::Config(format!(
                    "{}: relation '{}' declared twice",
                    self.kind, rel.name
                )));
            }
            if rel.edge.as_str().is_empty() {
                return Err(OrmError::Config(format!(
                    "{}.{}: empty edge label",
                    self.kind, rel.name
                )));
            }
        }
        Ok(self)
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

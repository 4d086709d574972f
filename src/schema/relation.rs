//! Relation descriptors: the declared shape of a navigable connection

use crate::graph::EdgeType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a relation as seen from the owning entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    /// Left and right arrow fragments around the relationship brackets.
    pub fn arrows(&self) -> (&'static str, &'static str) {
        match self {
            Direction::Outgoing => ("-", "->"),
            Direction::Incoming => ("<-", "-"),
            Direction::Both => ("-", "-"),
        }
    }

    /// Arrows used when creating an edge. A stored edge always has a
    /// direction, so `Both` is written as outgoing.
    pub fn create_arrows(&self) -> (&'static str, &'static str) {
        match self {
            Direction::Incoming => ("<-", "-"),
            Direction::Outgoing | Direction::Both => ("-", "->"),
        }
    }
}

/// Whether a relation holds at most one member or many
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Single,
    Collection,
}

/// Default loading mode when the caller gives no fetch hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Lazy,
    Eager,
}

/// Target kind of a relation, resolved by name when the relation is used.
///
/// Declaring by name lets mutually referencing kinds register in any order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetKind {
    Named(String),
    /// The kind that owns the relation
    SelfKind,
}

impl TargetKind {
    /// Kind name this target refers to, given the owning kind.
    pub fn resolve_name<'a>(&'a self, owner_kind: &'a str) -> &'a str {
        match self {
            TargetKind::Named(name) => name,
            TargetKind::SelfKind => owner_kind,
        }
    }
}

impl From<String> for TargetKind {
    fn from(s: String) -> Self {
        if s == "Self" {
            TargetKind::SelfKind
        } else {
            TargetKind::Named(s)
        }
    }
}

impl From<&str> for TargetKind {
    fn from(s: &str) -> Self {
        TargetKind::from(s.to_string())
    }
}

impl From<TargetKind> for String {
    fn from(target: TargetKind) -> Self {
        match target {
            TargetKind::Named(name) => name,
            TargetKind::SelfKind => "Self".to_string(),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Named(name) => write!(f, "{}", name),
            TargetKind::SelfKind => write!(f, "Self"),
        }
    }
}

/// Declared shape of a relation between two entity kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Slot name on the owning entity, also used as the eager fetch hint
    pub name: String,
    /// Edge label in the store
    pub edge: EdgeType,
    #[serde(default)]
    pub direction: Direction,
    pub target: TargetKind,
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Persist unsaved members as a side effect of saving the owner
    #[serde(default)]
    pub cascade: bool,
    #[serde(default)]
    pub mode: FetchMode,
}

impl RelationDescriptor {
    /// Outgoing, lazy, non-cascading relation holding at most one member.
    pub fn single(
        name: impl Into<String>,
        edge: impl Into<EdgeType>,
        target: impl Into<TargetKind>,
    ) -> Self {
        Self {
            name: name.into(),
            edge: edge.into(),
            direction: Direction::Outgoing,
            target: target.into(),
            cardinality: Cardinality::Single,
            cascade: false,
            mode: FetchMode::Lazy,
        }
    }

    /// Outgoing, lazy, non-cascading relation holding many members.
    pub fn collection(
        name: impl Into<String>,
        edge: impl Into<EdgeType>,
        target: impl Into<TargetKind>,
    ) -> Self {
        Self {
            cardinality: Cardinality::Collection,
            ..Self::single(name, edge, target)
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn eager(mut self) -> Self {
        self.mode = FetchMode::Eager;
        self
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Collection
    }
}

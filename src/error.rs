//! Error types for the mapping layer

use crate::graph::NodeId;
use thiserror::Error;

/// Errors that can occur while loading or persisting entities
#[derive(Error, Debug)]
pub enum OrmError {
    /// A relation's target kind is not registered
    #[error("Relation {kind}.{relation} targets unknown kind '{target}'")]
    UnresolvedRelation {
        kind: String,
        relation: String,
        target: String,
    },

    /// A related entity has no identity and its relation does not cascade.
    /// Only raised under `UnpersistedPolicy::Error`.
    #[error("Relation {kind}.{relation} references an unsaved entity and does not cascade")]
    UnpersistedCascade { kind: String, relation: String },

    /// Relation access or edge sync on an entity that was never persisted
    #[error("Entity of kind {kind} has no identity; cannot access relation '{relation}'")]
    UnpersistedOwner { kind: String, relation: String },

    /// Kind is not present in the registry
    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    /// Update of a node that no longer exists in the store
    #[error("{kind} with id {id} not found")]
    EntityNotFound { kind: String, id: NodeId },

    /// Raised by the query execution channel, passed through verbatim
    #[error("Query error: {0}")]
    QueryExecution(String),

    /// A row could not be turned into an entity
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Operation on a unit of work that was already closed
    #[error("Unit of work is closed")]
    SessionClosed,

    /// Invalid schema or configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type OrmResult<T> = Result<T, OrmError>;

//! Property-graph primitives used on both sides of the mapping
//!
//! Identifiers, labels and scalar property values. Nodes and edges
//! themselves live in the store; the mapper only ever sees them as rows.

pub mod property;
pub mod types;

// Re-export main types
pub use property::{PropertyMap, PropertyValue};
pub use types::{EdgeType, Label, NodeId};

//! Entity and relation metadata

pub mod kind;
pub mod registry;
pub mod relation;

pub use kind::EntitySchema;
pub use registry::{KindRegistry, MetadataProvider};
pub use relation::{Cardinality, Direction, FetchMode, RelationDescriptor, TargetKind};

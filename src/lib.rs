//! graphmap
//!
//! Object-graph mapping for OpenCypher property-graph stores. Application
//! code declares entity kinds and the relations between them; graphmap
//! persists and loads those relations through a query executor.
//!
//! # Components
//!
//! - **Metadata**: [`KindRegistry`] holds [`EntitySchema`]s with their
//!   [`RelationDescriptor`]s (edge label, direction, target kind,
//!   cardinality, cascade flag, default fetch mode).
//! - **Lazy relations**: loaded entities get proxies that run one query on
//!   first access and cache the result.
//! - **Eager loading**: any number of relations for any number of sources
//!   are fetched in a single statement.
//! - **Cascade saves**: saving an entity writes related entities first,
//!   then one edge per member. Cycles terminate; updates rebuild edges.
//!
//! Both a blocking [`Session`] and a suspending [`AsyncSession`] are
//! provided.
//!
//! ## Example Usage
//!
//! ```rust
//! use graphmap::{
//!     Entity, EntityRef, EntitySchema, KindRegistry, OrmResult, Params, QueryExecutor,
//!     QueryResult, RelationDescriptor, Session,
//! };
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! // Answers node creates with fresh ids, everything else with no rows
//! struct Store(AtomicU64);
//!
//! impl QueryExecutor for Store {
//!     fn execute(&self, query: &str, _params: &Params) -> OrmResult<QueryResult> {
//!         if query.starts_with("CREATE") {
//!             let id = self.0.fetch_add(1, Ordering::SeqCst);
//!             return Ok(QueryResult::new(vec!["node_id".into()], vec![vec![id.into()]]));
//!         }
//!         Ok(QueryResult::default())
//!     }
//! }
//!
//! let registry = KindRegistry::new()
//!     .with(
//!         EntitySchema::new("Person").with_relation(
//!             RelationDescriptor::collection("friends", "KNOWS", "Person").with_cascade(true),
//!         ),
//!     )
//!     .unwrap();
//! let session = Session::new(Arc::new(Store(AtomicU64::new(1))), Arc::new(registry));
//!
//! let alice = EntityRef::new(Entity::new("Person").with_property("name", "Alice"));
//! let bob = EntityRef::new(Entity::new("Person").with_property("name", "Bob"));
//! alice.write().set_collection("friends", vec![bob.clone()]);
//!
//! session.save(&alice).unwrap();
//! assert_eq!(alice.id().map(|id| id.as_u64()), Some(1));
//! assert_eq!(bob.id().map(|id| id.as_u64()), Some(2));
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod async_session;
pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hydrate;
pub mod query;
pub mod relation;
pub mod schema;
pub mod session;
pub mod unit_of_work;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

// Re-export main types for convenience
pub use async_session::AsyncSession;
pub use config::{CascadeConfig, OrmConfig, UnpersistedPolicy};
pub use entity::{Entity, EntityIdentity, EntityRef, LazyHandle, Related, RelationValue};
pub use error::{OrmError, OrmResult};
pub use executor::{AsyncQueryExecutor, HttpExecutor, QueryExecutor};
pub use graph::{EdgeType, Label, NodeId, PropertyMap, PropertyValue};
pub use hydrate::{Hydrator, NodeHydrator, NodeRecord};
pub use query::{Aggregate, CypherQuery, Params, QueryBuilder, QueryResult};
pub use relation::{
    AsyncCascadeEngine, AsyncLazyRelation, CascadeContext, CascadeEngine, EagerPlan, LazyRelation,
    Mapper,
};
pub use schema::{
    Cardinality, Direction, EntitySchema, FetchMode, KindRegistry, MetadataProvider,
    RelationDescriptor, TargetKind,
};
pub use session::Session;
pub use unit_of_work::{UnitOfWork, UnitState};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

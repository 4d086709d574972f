//! Query text generation and result access
//!
//! The mapper speaks OpenCypher to the store: [`QueryBuilder`] produces
//! parameterized statements, [`QueryResult`] carries rows back.

pub mod builder;
pub mod result;

// Re-export main types
pub use builder::{
    eager_column, Aggregate, IdSelector, QueryBuilder, AGGREGATE_COLUMN, NODE_ID_COLUMN, SOURCE_VAR,
    TARGET_VAR,
};
pub use result::{params_to_json, CypherQuery, Params, QueryResult, Row};

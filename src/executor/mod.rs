//! Query execution channel
//!
//! The engine never talks to a store directly; it submits parameterized
//! query text through one of these traits and reads named columns from
//! the rows that come back.
//!
//! - [`QueryExecutor`] — blocking; every submission blocks the caller.
//! - [`AsyncQueryExecutor`] — suspending; the caller yields until the
//!   result arrives.

pub mod remote;

use crate::error::OrmResult;
use crate::query::{Params, QueryResult};
use async_trait::async_trait;
use std::sync::Arc;

pub use remote::HttpExecutor;

/// Blocking query submission
pub trait QueryExecutor: Send + Sync {
    /// Execute a parameterized Cypher statement
    fn execute(&self, query: &str, params: &Params) -> OrmResult<QueryResult>;
}

/// Suspending query submission
#[async_trait]
pub trait AsyncQueryExecutor: Send + Sync {
    /// Execute a parameterized Cypher statement
    async fn execute(&self, query: &str, params: &Params) -> OrmResult<QueryResult>;
}

impl<T: QueryExecutor + ?Sized> QueryExecutor for Arc<T> {
    fn execute(&self, query: &str, params: &Params) -> OrmResult<QueryResult> {
        (**self).execute(query, params)
    }
}

#[async_trait]
impl<T: AsyncQueryExecutor + ?Sized> AsyncQueryExecutor for Arc<T> {
    async fn execute(&self, query: &str, params: &Params) -> OrmResult<QueryResult> {
        (**self).execute(query, params).await
    }
}

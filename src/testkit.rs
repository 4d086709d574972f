//! Test support: an in-memory executor that records every statement
//!
//! Compiled for unit tests and, through the `testkit` feature, for the
//! integration tests under `tests/`.

use crate::error::OrmResult;
use crate::executor::{AsyncQueryExecutor, QueryExecutor};
use crate::query::{Params, QueryResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

type Responder = Box<dyn Fn(&str, &Params) -> Option<OrmResult<QueryResult>> + Send + Sync>;

/// A statement as it reached the executor
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub text: String,
    pub params: Params,
}

/// Executor double.
///
/// Node creates get sequential ids starting at 1; node updates echo the
/// id they were given. Everything else is answered by the responder, or
/// with an empty result when it declines.
pub struct RecordingExecutor {
    log: Mutex<Vec<RecordedQuery>>,
    next_id: AtomicU64,
    responder: Option<Responder>,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            responder: None,
        }
    }

    /// Consult `responder` first; `None` falls back to the default answers
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &Params) -> Option<OrmResult<QueryResult>> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// First id handed out to created nodes
    pub fn starting_at(self, id: u64) -> Self {
        self.next_id.store(id, Ordering::SeqCst);
        self
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.log.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.log.lock().iter().map(|q| q.text.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.log.lock().len()
    }

    /// Number of statements starting with `prefix`
    pub fn count_matching(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|q| q.text.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn respond(&self, query: &str, params: &Params) -> OrmResult<QueryResult> {
        self.log.lock().push(RecordedQuery {
            text: query.to_string(),
            params: params.clone(),
        });

        if let Some(answer) = self.responder.as_ref().and_then(|r| r(query, params)) {
            return answer;
        }

        if query.starts_with("CREATE (n") {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            return Ok(written(id));
        }
        if query.starts_with("MATCH (n")
            && query.contains("WHERE id(n) = $id")
            && query.ends_with("RETURN n, id(n) AS node_id")
        {
            if let Some(id) = params.get("id").and_then(|v| v.as_integer()) {
                return Ok(written(id as u64));
            }
        }
        Ok(QueryResult::default())
    }
}

fn written(id: u64) -> QueryResult {
    rows(&["n", "node_id"], vec![vec![json!({ "id": id }), json!(id)]])
}

impl QueryExecutor for RecordingExecutor {
    fn execute(&self, query: &str, params: &Params) -> OrmResult<QueryResult> {
        self.respond(query, params)
    }
}

#[async_trait]
impl AsyncQueryExecutor for RecordingExecutor {
    async fn execute(&self, query: &str, params: &Params) -> OrmResult<QueryResult> {
        self.respond(query, params)
    }
}

/// Node value in the shape the default hydrator reads
pub fn node_json(id: u64, label: &str, properties: Value) -> Value {
    json!({
        "id": id,
        "labels": [label],
        "properties": properties,
    })
}

/// Result with the given columns and records
pub fn rows(columns: &[&str], records: Vec<Vec<Value>>) -> QueryResult {
    QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), records)
}

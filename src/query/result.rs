//! Query parameters and tabular results exchanged with the store

use crate::error::{OrmError, OrmResult};
use crate::graph::{NodeId, PropertyValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Named query parameters (`$name` in the query text)
pub type Params = IndexMap<String, PropertyValue>;

/// A parameterized query ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct CypherQuery {
    pub text: String,
    pub params: Params,
}

impl CypherQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Params::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Bind a node id, failing if it does not fit the wire integer type
    pub fn id_param(self, name: impl Into<String>, id: NodeId) -> OrmResult<Self> {
        Ok(self.param(name, PropertyValue::try_from(id)?))
    }
}

/// Parameters in wire form
pub fn params_to_json(params: &Params) -> serde_json::Map<String, serde_json::Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

/// Result of executing a Cypher query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Tabular result rows
    pub records: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, records: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, records }
    }

    /// Number of result records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the result is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.records.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn first(&self) -> Option<Row<'_>> {
        self.rows().next()
    }
}

/// Borrowed view of one record with by-name column access
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [serde_json::Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a serde_json::Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    /// Column value, or a mapping error naming the missing column
    pub fn require(&self, column: &str) -> OrmResult<&'a serde_json::Value> {
        self.get(column)
            .ok_or_else(|| OrmError::Mapping(format!("result has no column '{}'", column)))
    }

    pub fn get_i64(&self, column: &str) -> OrmResult<i64> {
        self.require(column)?
            .as_i64()
            .ok_or_else(|| OrmError::Mapping(format!("column '{}' is not an integer", column)))
    }

    pub fn get_bool(&self, column: &str) -> OrmResult<bool> {
        self.require(column)?
            .as_bool()
            .ok_or_else(|| OrmError::Mapping(format!("column '{}' is not a boolean", column)))
    }

    pub fn get_node_id(&self, column: &str) -> OrmResult<NodeId> {
        let raw = self.get_i64(column)?;
        u64::try_from(raw)
            .map(NodeId::new)
            .map_err(|_| OrmError::Mapping(format!("column '{}' holds negative id {}", column, raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_access_by_name() {
        let result = QueryResult::new(
            vec!["n".to_string(), "node_id".to_string()],
            vec![vec![json!({"id": 4}), json!(4)]],
        );
        assert_eq!(result.len(), 1);
        let row = result.first().unwrap();
        assert_eq!(row.get_node_id("node_id").unwrap(), NodeId::new(4));
        assert!(row.get("missing").is_none());
        assert!(matches!(row.require("missing"), Err(OrmError::Mapping(_))));
        assert!(row.get_bool("node_id").is_err());
    }

    #[test]
    fn test_negative_id_rejected() {
        let result = QueryResult::new(vec!["id".to_string()], vec![vec![json!(-1)]]);
        assert!(result.first().unwrap().get_node_id("id").is_err());
    }

    #[test]
    fn test_params_json() {
        let query = CypherQuery::new("MATCH (n) WHERE id(n) = $id RETURN n")
            .id_param("id", NodeId::new(9))
            .unwrap()
            .param("name", "Ada");
        let params = params_to_json(&query.params);
        assert_eq!(params["id"], json!(9));
        assert_eq!(params["name"], json!("Ada"));
    }

    #[test]
    fn test_id_param_out_of_range() {
        let err = CypherQuery::new("RETURN $id")
            .id_param("id", NodeId::new(u64::MAX))
            .unwrap_err();
        assert!(matches!(err, OrmError::Mapping(_)));
    }
}

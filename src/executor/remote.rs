//! HttpExecutor — submits queries to a graph server over HTTP
//!
//! Posts `{graph, query, params}` to `<endpoint>/api/query` and decodes a
//! `{columns, records}` body.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::AsyncQueryExecutor;
use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};
use crate::query::{params_to_json, Params, QueryResult};

/// Network executor for a running graph server.
pub struct HttpExecutor {
    http_base_url: String,
    graph: String,
    http_client: Client,
}

impl HttpExecutor {
    /// Create an executor for the given HTTP base URL and graph name.
    ///
    /// # Example
    /// ```no_run
    /// # use graphmap::executor::HttpExecutor;
    /// let executor = HttpExecutor::new("http://localhost:8080", "default");
    /// ```
    pub fn new(http_base_url: &str, graph: &str) -> Self {
        Self {
            http_base_url: http_base_url.trim_end_matches('/').to_string(),
            graph: graph.to_string(),
            http_client: Client::new(),
        }
    }

    /// Build from configuration; requires `endpoint` to be set.
    pub fn from_config(config: &OrmConfig) -> OrmResult<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| OrmError::Config("no endpoint configured".to_string()))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http_base_url: endpoint.trim_end_matches('/').to_string(),
            graph: config.graph.clone(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.http_base_url
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    /// Execute a POST request to /api/query
    async fn post_query(&self, query: &str, params: &Params) -> OrmResult<QueryResult> {
        let url = format!("{}/api/query", self.http_base_url);
        let body = serde_json::json!({
            "graph": self.graph,
            "query": query,
            "params": params_to_json(params),
        });

        debug!(%url, "posting query");
        let response = self.http_client.post(&url).json(&body).send().await?;

        if response.status().is_success() {
            let result: QueryResult = response.json().await?;
            Ok(result)
        } else {
            let error_body: serde_json::Value = response
                .json()
                .await
                .unwrap_or_else(|_| serde_json::json!({"error": "Unknown error"}));
            let msg = error_body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            Err(OrmError::QueryExecution(msg))
        }
    }
}

#[async_trait]
impl AsyncQueryExecutor for HttpExecutor {
    async fn execute(&self, query: &str, params: &Params) -> OrmResult<QueryResult> {
        self.post_query(query, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let executor = HttpExecutor::new("http://localhost:8080/", "social");
        assert_eq!(executor.base_url(), "http://localhost:8080");
        assert_eq!(executor.graph(), "social");
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let config = OrmConfig::default();
        assert!(matches!(
            HttpExecutor::from_config(&config),
            Err(OrmError::Config(_))
        ));

        let config = OrmConfig {
            endpoint: Some("http://graph:9000".to_string()),
            ..OrmConfig::default()
        };
        let executor = HttpExecutor::from_config(&config).unwrap();
        assert_eq!(executor.base_url(), "http://graph:9000");
        assert_eq!(executor.graph(), "default");
    }
}

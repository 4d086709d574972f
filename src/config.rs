//! Mapper configuration
//!
//! Loaded from YAML. Besides connection settings it may declare the entity
//! kinds themselves, which is how the CLI gets its schema:
//!
//! ```yaml
//! graph: social
//! endpoint: http://localhost:8080
//! cascade:
//!   on_unpersisted: skip
//! kinds:
//!   - kind: Person
//!     relations:
//!       - { name: friends, edge: KNOWS, target: Person, cardinality: collection, cascade: true }
//!       - { name: company, edge: WORKS_AT, target: Company }
//!   - kind: Company
//! ```

use crate::error::{OrmError, OrmResult};
use crate::schema::{EntitySchema, KindRegistry};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// What a save does with an unsaved member of a non-cascading relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnpersistedPolicy {
    /// Leave the edge out and carry on
    #[default]
    Skip,
    /// Abort the save with `UnpersistedCascade`
    Error,
}

/// Cascade behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CascadeConfig {
    #[serde(default)]
    pub on_unpersisted: UnpersistedPolicy,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrmConfig {
    /// Graph name sent with every query
    #[serde(default = "default_graph")]
    pub graph: String,
    /// HTTP base URL of the graph server (HttpExecutor only)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Transport timeout for HttpExecutor
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub cascade: CascadeConfig,
    /// Declarative entity kinds
    #[serde(default)]
    pub kinds: Vec<EntitySchema>,
}

fn default_graph() -> String {
    "default".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            graph: default_graph(),
            endpoint: None,
            request_timeout_secs: default_timeout(),
            cascade: CascadeConfig::default(),
            kinds: Vec::new(),
        }
    }
}

impl OrmConfig {
    pub fn from_yaml_str(yaml: &str) -> OrmResult<Self> {
        let config: OrmConfig = serde_yaml::from_str(yaml)?;
        if config.request_timeout_secs == 0 {
            return Err(OrmError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> OrmResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&text)?;
        info!(path = %path.display(), kinds = config.kinds.len(), "loaded mapper configuration");
        Ok(config)
    }

    /// Registry holding every declared kind
    pub fn registry(&self) -> OrmResult<KindRegistry> {
        let registry = KindRegistry::new();
        for schema in &self.kinds {
            if registry.contains(&schema.kind) {
                return Err(OrmError::Config(format!(
                    "kind '{}' declared twice",
                    schema.kind
                )));
            }
            registry.register(schema.clone())?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Cardinality, MetadataProvider};
    use std::io::Write;

    const SAMPLE: &str = r#"
graph: social
endpoint: http://localhost:8080
cascade:
  on_unpersisted: error
kinds:
  - kind: Person
    labels: [Person, Individual]
    relations:
      - { name: friends, edge: KNOWS, target: Person, cardinality: collection, cascade: true }
      - { name: company, edge: WORKS_AT, target: Company, mode: eager }
  - kind: Company
"#;

    #[test]
    fn test_defaults() {
        let config = OrmConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, OrmConfig::default());
        assert_eq!(config.graph, "default");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.cascade.on_unpersisted, UnpersistedPolicy::Skip);
    }

    #[test]
    fn test_sample_builds_registry() {
        let config = OrmConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.graph, "social");
        assert_eq!(config.cascade.on_unpersisted, UnpersistedPolicy::Error);

        let registry = config.registry().unwrap();
        assert_eq!(registry.kinds(), vec!["Company", "Person"]);
        let person = registry.require("Person").unwrap();
        assert_eq!(person.labels.len(), 2);
        assert_eq!(
            person.relation("friends").unwrap().cardinality,
            Cardinality::Collection
        );
        assert_eq!(person.eager_relations(), vec!["company"]);
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let yaml = "kinds:\n  - kind: Person\n  - kind: Person\n";
        let config = OrmConfig::from_yaml_str(yaml).unwrap();
        assert!(matches!(config.registry(), Err(OrmError::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(OrmConfig::from_yaml_str("request_timeout_secs: 0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = OrmConfig::load(file.path()).unwrap();
        assert_eq!(config.kinds.len(), 2);

        assert!(matches!(
            OrmConfig::load(file.path().with_extension("missing")),
            Err(OrmError::Io(_))
        ));
    }
}

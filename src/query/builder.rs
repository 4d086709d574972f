//! Cypher text generation for every statement the mapper submits
//!
//! All values travel as parameters; only labels, edge labels and property
//! keys are spliced into the text, quoted with backticks when they are not
//! plain identifiers or collide with a keyword. Relation names never reach
//! the text: eager columns are named by position.

use super::result::CypherQuery;
use crate::error::OrmResult;
use crate::graph::{NodeId, PropertyMap, PropertyValue};
use crate::schema::kind::is_identifier;
use crate::schema::{EntitySchema, RelationDescriptor};

/// Column holding the node id returned by node writes
pub const NODE_ID_COLUMN: &str = "node_id";
/// Variable bound to the source entity in reads
pub const SOURCE_VAR: &str = "n";
/// Variable bound to related entities in relation loads
pub const TARGET_VAR: &str = "target";
/// Column holding the result of an aggregation
pub const AGGREGATE_COLUMN: &str = "value";

/// Column of the `index`-th fetched relation in an eager load
pub fn eager_column(index: usize) -> String {
    format!("r{}", index)
}

/// Keywords that must be backticked even though they look like identifiers
const KEYWORDS: &[&str] = &[
    "all", "and", "as", "asc", "ascending", "by", "call", "case", "contains", "create",
    "delete", "desc", "descending", "detach", "distinct", "else", "end", "ends", "exists",
    "false", "in", "is", "limit", "match", "merge", "not", "null", "on", "optional", "or",
    "order", "remove", "return", "set", "skip", "starts", "then", "true", "union", "unwind",
    "when", "where", "with", "xor", "yield",
];

/// Which source entities a read selects
#[derive(Debug, Clone, PartialEq)]
pub enum IdSelector {
    All,
    One(NodeId),
    Many(Vec<NodeId>),
}

impl IdSelector {
    fn where_clause(&self) -> Option<&'static str> {
        match self {
            IdSelector::All => None,
            IdSelector::One(_) => Some("WHERE id(n) = $id"),
            IdSelector::Many(_) => Some("WHERE id(n) IN $ids"),
        }
    }

    fn bind(&self, query: CypherQuery) -> OrmResult<CypherQuery> {
        match self {
            IdSelector::All => Ok(query),
            IdSelector::One(id) => query.id_param("id", *id),
            IdSelector::Many(ids) => {
                let ids = ids
                    .iter()
                    .map(|id| PropertyValue::try_from(*id))
                    .collect::<OrmResult<Vec<_>>>()?;
                Ok(query.param("ids", PropertyValue::Array(ids)))
            }
        }
    }
}

/// Aggregation over one property of every entity of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    fn function(&self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }
}

/// Quote an identifier for splicing into query text
pub fn quote(ident: &str) -> String {
    if is_identifier(ident) && !KEYWORDS.contains(&ident.to_ascii_lowercase().as_str()) {
        ident.to_string()
    } else {
        format!("`{}`", ident.replace('`', "``"))
    }
}

/// `:A:B` label pattern of a kind
pub fn label_pattern(schema: &EntitySchema) -> String {
    schema
        .labels
        .iter()
        .map(|l| format!(":{}", quote(l.as_str())))
        .collect()
}

/// Relationship pattern between `(source)` and the target, e.g. `-[:KNOWS]->`
pub fn relation_pattern(relation: &RelationDescriptor, edge_var: &str) -> String {
    let (left, right) = relation.direction.arrows();
    format!("{}[{}:{}]{}", left, edge_var, quote(relation.edge.as_str()), right)
}

/// Generates Cypher for entity and relation operations
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    pub fn new() -> Self {
        QueryBuilder
    }

    /// `CREATE` a node for a transient entity and return its id
    pub fn create_node(&self, schema: &EntitySchema, properties: &PropertyMap) -> CypherQuery {
        let (set_clause, params) = set_clause(properties);
        let mut text = format!("CREATE (n{})", label_pattern(schema));
        if let Some(set) = set_clause {
            text.push_str(" SET ");
            text.push_str(&set);
        }
        text.push_str(&format!(" RETURN n, id(n) AS {}", NODE_ID_COLUMN));

        let mut query = CypherQuery::new(text);
        query.params = params;
        query
    }

    /// Overwrite the properties of an already persisted node
    pub fn update_node(
        &self,
        schema: &EntitySchema,
        id: NodeId,
        properties: &PropertyMap,
    ) -> OrmResult<CypherQuery> {
        let (set_clause, params) = set_clause(properties);
        let mut text = format!("MATCH (n{}) WHERE id(n) = $id", label_pattern(schema));
        if let Some(set) = set_clause {
            text.push_str(" SET ");
            text.push_str(&set);
        }
        text.push_str(&format!(" RETURN n, id(n) AS {}", NODE_ID_COLUMN));

        let mut query = CypherQuery::new(text);
        query.params = params;
        query.id_param("id", id)
    }

    /// Plain read of source entities, no relations
    pub fn match_nodes(
        &self,
        schema: &EntitySchema,
        selector: &IdSelector,
    ) -> OrmResult<CypherQuery> {
        let mut parts = vec![format!("MATCH (n{})", label_pattern(schema))];
        parts.extend(selector.where_clause().map(str::to_string));
        parts.push("RETURN n".to_string());
        selector.bind(CypherQuery::new(parts.join(" ")))
    }

    pub fn count(&self, schema: &EntitySchema) -> CypherQuery {
        CypherQuery::new(format!(
            "MATCH (n{}) RETURN count(n) AS count",
            label_pattern(schema)
        ))
    }

    /// `sum`/`avg`/`min`/`max` of a property, in the `value` column
    pub fn aggregate(
        &self,
        schema: &EntitySchema,
        aggregate: Aggregate,
        property: &str,
    ) -> CypherQuery {
        CypherQuery::new(format!(
            "MATCH (n{}) RETURN {}(n.{}) AS {}",
            label_pattern(schema),
            aggregate.function(),
            quote(property),
            AGGREGATE_COLUMN,
        ))
    }

    pub fn exists_by_id(&self, schema: &EntitySchema, id: NodeId) -> OrmResult<CypherQuery> {
        CypherQuery::new(format!(
            "MATCH (n{}) WHERE id(n) = $id RETURN count(n) > 0 AS exists",
            label_pattern(schema)
        ))
        .id_param("id", id)
    }

    pub fn delete_nodes(
        &self,
        schema: &EntitySchema,
        selector: &IdSelector,
    ) -> OrmResult<CypherQuery> {
        let mut parts = vec![format!("MATCH (n{})", label_pattern(schema))];
        parts.extend(selector.where_clause().map(str::to_string));
        parts.push("DETACH DELETE n".to_string());
        selector.bind(CypherQuery::new(parts.join(" ")))
    }

    /// Members of one relation of one source, used by lazy proxies
    pub fn relation_load(
        &self,
        relation: &RelationDescriptor,
        source_id: NodeId,
        target: &EntitySchema,
    ) -> OrmResult<CypherQuery> {
        CypherQuery::new(format!(
            "MATCH (source){}({}{})\nWHERE id(source) = $source_id\nRETURN DISTINCT {}",
            relation_pattern(relation, ""),
            TARGET_VAR,
            label_pattern(target),
            TARGET_VAR,
        ))
        .id_param("source_id", source_id)
    }

    /// Bind both endpoints by identity and create the typed edge
    pub fn relation_create(
        &self,
        relation: &RelationDescriptor,
        source_id: NodeId,
        target_id: NodeId,
    ) -> OrmResult<CypherQuery> {
        let (left, right) = relation.direction.create_arrows();
        CypherQuery::new(format!(
            "MATCH (source), (target)\nWHERE id(source) = $source_id AND id(target) = $target_id\nCREATE (source){}[:{}]{}(target)",
            left,
            quote(relation.edge.as_str()),
            right,
        ))
        .id_param("source_id", source_id)?
        .id_param("target_id", target_id)
    }

    /// Delete every edge of the relation's label and direction leaving the source
    pub fn relation_delete(
        &self,
        relation: &RelationDescriptor,
        source_id: NodeId,
    ) -> OrmResult<CypherQuery> {
        CypherQuery::new(format!(
            "MATCH (source){}()\nWHERE id(source) = $source_id\nDELETE r",
            relation_pattern(relation, "r"),
        ))
        .id_param("source_id", source_id)
    }

    /// One statement fetching the selected sources and, per relation, the
    /// distinct related nodes collected into a column. The `i`-th relation
    /// lands in column [`eager_column`]`(i)`.
    ///
    /// Each optional match is folded with `WITH` before the next one so
    /// relations do not multiply each other's rows.
    pub fn eager_load(
        &self,
        schema: &EntitySchema,
        selector: &IdSelector,
        relations: &[(&RelationDescriptor, &EntitySchema)],
    ) -> OrmResult<CypherQuery> {
        let mut parts = vec![format!("MATCH (n{})", label_pattern(schema))];
        parts.extend(selector.where_clause().map(str::to_string));

        let mut carried: Vec<String> = vec![SOURCE_VAR.to_string()];
        for (i, (relation, target)) in relations.iter().enumerate() {
            let alias = eager_column(i);
            let var = format!("{}_target", alias);
            parts.push(format!(
                "OPTIONAL MATCH (n){}({}{})",
                relation_pattern(relation, ""),
                var,
                label_pattern(target),
            ));
            parts.push(format!(
                "WITH {}, collect(DISTINCT {}) AS {}",
                carried.join(", "),
                var,
                alias,
            ));
            carried.push(alias);
        }
        parts.push(format!("RETURN {}", carried.join(", ")));

        selector.bind(CypherQuery::new(parts.join("\n")))
    }
}

fn set_clause(properties: &PropertyMap) -> (Option<String>, crate::query::Params) {
    let mut params = crate::query::Params::new();
    let mut assignments = Vec::with_capacity(properties.len());
    for (i, (key, value)) in properties.iter().enumerate() {
        let param = if is_identifier(key) {
            format!("prop_{}", key)
        } else {
            format!("prop_{}", i)
        };
        assignments.push(format!("n.{} = ${}", quote(key), param));
        params.insert(param, value.clone());
    }
    if assignments.is_empty() {
        (None, params)
    } else {
        (Some(assignments.join(", ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Direction, RelationDescriptor};

    fn person() -> EntitySchema {
        EntitySchema::new("Person")
    }

    #[test]
    fn test_create_node_with_properties() {
        let mut props = PropertyMap::new();
        props.insert("name".to_string(), "Alice".into());
        props.insert("first name".to_string(), "Al".into());
        let q = QueryBuilder::new().create_node(&person(), &props);
        assert_eq!(
            q.text,
            "CREATE (n:Person) SET n.name = $prop_name, n.`first name` = $prop_1 RETURN n, id(n) AS node_id"
        );
        assert_eq!(q.params["prop_name"], PropertyValue::from("Alice"));
        assert_eq!(q.params["prop_1"], PropertyValue::from("Al"));
    }

    #[test]
    fn test_create_node_without_properties_and_multiple_labels() {
        let schema = EntitySchema::new("Person").with_labels(["Person", "Individual"]);
        let q = QueryBuilder::new().create_node(&schema, &PropertyMap::new());
        assert_eq!(q.text, "CREATE (n:Person:Individual) RETURN n, id(n) AS node_id");
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_update_node_binds_id() {
        let mut props = PropertyMap::new();
        props.insert("age".to_string(), 31i64.into());
        let q = QueryBuilder::new()
            .update_node(&person(), NodeId::new(5), &props)
            .unwrap();
        assert_eq!(
            q.text,
            "MATCH (n:Person) WHERE id(n) = $id SET n.age = $prop_age RETURN n, id(n) AS node_id"
        );
        assert_eq!(q.params["id"], PropertyValue::Integer(5));
    }

    #[test]
    fn test_relation_patterns_by_direction() {
        let out = RelationDescriptor::collection("friends", "KNOWS", "Person");
        let inc = out.clone().with_direction(Direction::Incoming);
        let both = out.clone().with_direction(Direction::Both);
        assert_eq!(relation_pattern(&out, ""), "-[:KNOWS]->");
        assert_eq!(relation_pattern(&inc, "r"), "<-[r:KNOWS]-");
        assert_eq!(relation_pattern(&both, ""), "-[:KNOWS]-");
    }

    #[test]
    fn test_relation_load() {
        let rel = RelationDescriptor::single("company", "WORKS_AT", "Company");
        let q = QueryBuilder::new()
            .relation_load(&rel, NodeId::new(1), &EntitySchema::new("Company"))
            .unwrap();
        assert_eq!(
            q.text,
            "MATCH (source)-[:WORKS_AT]->(target:Company)\nWHERE id(source) = $source_id\nRETURN DISTINCT target"
        );
        assert_eq!(q.params["source_id"], PropertyValue::Integer(1));
    }

    #[test]
    fn test_relation_create_and_delete() {
        let rel = RelationDescriptor::collection("followers", "FOLLOWS", "Person")
            .with_direction(Direction::Incoming);
        let builder = QueryBuilder::new();

        let create = builder
            .relation_create(&rel, NodeId::new(1), NodeId::new(2))
            .unwrap();
        assert!(create.text.ends_with("CREATE (source)<-[:FOLLOWS]-(target)"));
        assert_eq!(create.params["target_id"], PropertyValue::Integer(2));

        let delete = builder.relation_delete(&rel, NodeId::new(1)).unwrap();
        assert_eq!(
            delete.text,
            "MATCH (source)<-[r:FOLLOWS]-()\nWHERE id(source) = $source_id\nDELETE r"
        );
    }

    #[test]
    fn test_eager_load_folds_each_relation() {
        let friends = RelationDescriptor::collection("friends", "KNOWS", "Person");
        let company = RelationDescriptor::single("company", "WORKS_AT", "Company");
        let company_schema = EntitySchema::new("Company");
        let person = person();
        let q = QueryBuilder::new()
            .eager_load(
                &person,
                &IdSelector::Many(vec![NodeId::new(1), NodeId::new(2)]),
                &[(&friends, &person), (&company, &company_schema)],
            )
            .unwrap();
        assert_eq!(
            q.text,
            [
                "MATCH (n:Person)",
                "WHERE id(n) IN $ids",
                "OPTIONAL MATCH (n)-[:KNOWS]->(r0_target:Person)",
                "WITH n, collect(DISTINCT r0_target) AS r0",
                "OPTIONAL MATCH (n)-[:WORKS_AT]->(r1_target:Company)",
                "WITH n, r0, collect(DISTINCT r1_target) AS r1",
                "RETURN n, r0, r1",
            ]
            .join("\n")
        );
        assert_eq!(
            q.params["ids"],
            PropertyValue::Array(vec![1i64.into(), 2i64.into()])
        );
    }

    #[test]
    fn test_eager_load_all_without_relations() {
        let q = QueryBuilder::new()
            .eager_load(&person(), &IdSelector::All, &[])
            .unwrap();
        assert_eq!(q.text, "MATCH (n:Person)\nRETURN n");
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_eager_load_ignores_relation_names() {
        // names that would clash with each other or with keywords as aliases
        let shadow = RelationDescriptor::collection("friends_target", "LIKES", "Person");
        let friends = RelationDescriptor::collection("friends", "KNOWS", "Person");
        let order = RelationDescriptor::single("order", "PLACED", "Person");
        let person = person();
        let q = QueryBuilder::new()
            .eager_load(
                &person,
                &IdSelector::All,
                &[(&shadow, &person), (&friends, &person), (&order, &person)],
            )
            .unwrap();
        assert!(!q.text.contains("friends"));
        assert!(!q.text.contains("order"));
        assert!(q.text.contains("WITH n, r0, collect(DISTINCT r1_target) AS r1"));
        assert!(q.text.ends_with("RETURN n, r0, r1, r2"));
    }

    #[test]
    fn test_ids_out_of_range_rejected() {
        let too_big = NodeId::new(i64::MAX as u64 + 1);
        let rel = RelationDescriptor::single("company", "WORKS_AT", "Company");
        let b = QueryBuilder::new();
        assert!(b.relation_create(&rel, NodeId::new(1), too_big).is_err());
        assert!(b.relation_delete(&rel, too_big).is_err());
        assert!(b
            .match_nodes(&person(), &IdSelector::Many(vec![NodeId::new(1), too_big]))
            .is_err());
    }

    #[test]
    fn test_aggregate() {
        let b = QueryBuilder::new();
        assert_eq!(
            b.aggregate(&person(), Aggregate::Avg, "age").text,
            "MATCH (n:Person) RETURN avg(n.age) AS value"
        );
        assert_eq!(
            b.aggregate(&person(), Aggregate::Max, "order").text,
            "MATCH (n:Person) RETURN max(n.`order`) AS value"
        );
    }

    #[test]
    fn test_utility_queries() {
        let b = QueryBuilder::new();
        assert_eq!(b.count(&person()).text, "MATCH (n:Person) RETURN count(n) AS count");
        assert_eq!(
            b.delete_nodes(&person(), &IdSelector::One(NodeId::new(3)))
                .unwrap()
                .text,
            "MATCH (n:Person) WHERE id(n) = $id DETACH DELETE n"
        );
        assert_eq!(
            b.match_nodes(&person(), &IdSelector::All).unwrap().text,
            "MATCH (n:Person) RETURN n"
        );
        assert!(b
            .exists_by_id(&person(), NodeId::new(3))
            .unwrap()
            .text
            .ends_with("RETURN count(n) > 0 AS exists"));
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("KNOWS"), "KNOWS");
        assert_eq!(quote("has space"), "`has space`");
        assert_eq!(quote("we`ird"), "`we``ird`");
        assert_eq!(quote("Order"), "`Order`");
        assert_eq!(quote("MATCH"), "`MATCH`");
    }
}

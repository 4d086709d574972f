//! Eager loading: several relations of many sources in one query

use super::{shape_related, IdentityMap, Mapper};
use crate::entity::EntityRef;
use crate::error::{OrmError, OrmResult};
use crate::query::{eager_column, CypherQuery, IdSelector, QueryBuilder, QueryResult, Row, SOURCE_VAR};
use crate::schema::{EntitySchema, MetadataProvider, RelationDescriptor};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A resolved eager load: the source kind, the relations to fetch with
/// their target kinds, and the single statement that fetches them.
#[derive(Debug, Clone)]
pub struct EagerPlan {
    pub source: Arc<EntitySchema>,
    pub relations: Vec<(RelationDescriptor, Arc<EntitySchema>)>,
    pub query: CypherQuery,
}

/// Entities produced by an eager load
#[derive(Debug, Default)]
pub struct EagerLoad {
    /// One per source row, in row order
    pub entities: Vec<EntityRef>,
    /// Distinct related instances that are not also sources
    pub members: Vec<EntityRef>,
}

impl EagerPlan {
    /// Resolve relation hints against the kind's metadata.
    ///
    /// Repeated names are fetched once; names that match no declared
    /// relation are ignored. A declared relation whose target kind is not
    /// registered fails the whole load.
    pub fn build(
        metadata: &dyn MetadataProvider,
        builder: &QueryBuilder,
        kind: &str,
        selector: &IdSelector,
        names: &[&str],
    ) -> OrmResult<Self> {
        let source = metadata.require(kind)?;

        let mut seen = HashSet::new();
        let mut relations = Vec::new();
        for &name in names {
            if !seen.insert(name) {
                continue;
            }
            let Some(relation) = source.relation(name) else {
                debug!(kind = %kind, relation = %name, "ignoring unknown relation hint");
                continue;
            };
            let target = metadata.resolve_target(kind, relation)?;
            relations.push((relation.clone(), target));
        }

        let pairs: Vec<(&RelationDescriptor, &EntitySchema)> = relations
            .iter()
            .map(|(relation, target)| (relation, target.as_ref()))
            .collect();
        let query = builder.eager_load(&source, selector, &pairs)?;

        Ok(Self {
            source,
            relations,
            query,
        })
    }

    /// Names of the relations this plan fetches
    pub fn fetched(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(|(r, _)| r.name.as_str())
    }

    /// Build entities from the rows of the plan's query. Every fetched
    /// relation is assigned as a resolved value.
    pub fn map(&self, result: &QueryResult, mapper: &Mapper) -> OrmResult<EagerLoad> {
        let mut identities = IdentityMap::default();

        let mut entities = Vec::with_capacity(result.len());
        for row in result.rows() {
            let source = mapper.hydrate(row.require(SOURCE_VAR)?, &self.source)?;
            let (source, _) = identities.intern(source);
            entities.push(source);
        }

        let mut members = Vec::new();
        for (row, source) in result.rows().zip(&entities) {
            for (i, (relation, target)) in self.relations.iter().enumerate() {
                let mut related = Vec::new();
                for value in column_nodes(&row, &eager_column(i), &relation.name)? {
                    let (member, new) = identities.intern(mapper.hydrate(value, target)?);
                    if new {
                        members.push(member.clone());
                    }
                    related.push(member);
                }
                source
                    .write()
                    .set_related(relation.name.clone(), shape_related(relation, related));
            }
        }

        Ok(EagerLoad { entities, members })
    }
}

/// Non-null node values collected in a relation column
fn column_nodes<'a>(
    row: &Row<'a>,
    column: &str,
    relation: &str,
) -> OrmResult<Vec<&'a serde_json::Value>> {
    match row.require(column)? {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(values) => Ok(values.iter().filter(|v| !v.is_null()).collect()),
        other => Err(OrmError::Mapping(format!(
            "column '{}' ({}) should hold a list of nodes, got {}",
            column, relation, other
        ))),
    }
}

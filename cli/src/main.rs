//! graphmap CLI — inspect mapped entities on a running graph server
//!
//! Reads entity kinds from a YAML config and loads entities through the
//! HTTP executor.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use graphmap::{AsyncSession, EntityRef, NodeId, OrmConfig, Related, RelationValue};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphmap", version, about = "graphmap object-graph mapper CLI")]
struct Cli {
    /// Mapper configuration (YAML)
    #[arg(long, global = true, env = "GRAPHMAP_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Server HTTP URL, overrides `endpoint` from the config
    #[arg(long, global = true, env = "GRAPHMAP_URL")]
    url: Option<String>,

    /// Graph name, overrides `graph` from the config
    #[arg(long, global = true)]
    graph: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configured kinds and their relations
    Schema,
    /// Load one entity by id
    Find {
        kind: String,
        id: u64,
        /// Relations to fetch eagerly (default: the kind's eager relations)
        #[arg(long, value_delimiter = ',')]
        fetch: Option<Vec<String>>,
    },
    /// Load all entities of a kind, or those with the given ids
    List {
        kind: String,
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<u64>>,
        #[arg(long, value_delimiter = ',')]
        fetch: Option<Vec<String>>,
    },
    /// Count entities of a kind
    Count { kind: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<OrmConfig> {
    let mut config = match &cli.config {
        Some(path) => OrmConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => OrmConfig::default(),
    };
    if let Some(url) = &cli.url {
        config.endpoint = Some(url.clone());
    }
    if let Some(graph) = &cli.graph {
        config.graph = graph.clone();
    }
    if config.endpoint.is_none() {
        config.endpoint = Some("http://localhost:8080".to_string());
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    if let Commands::Schema = cli.command {
        return print_schema(&config, &cli.format);
    }

    let session = AsyncSession::connect(&config)?;
    match &cli.command {
        Commands::Schema => Ok(()),
        Commands::Find { kind, id, fetch } => {
            let id = NodeId::new(*id);
            let entity = match fetch {
                Some(names) => {
                    let names: Vec<&str> = names.iter().map(String::as_str).collect();
                    session.find_by_id_with(kind, id, &names).await?
                }
                None => session.find_by_id(kind, id).await?,
            };
            match entity {
                Some(entity) => print_entities(&[entity], &cli.format),
                None => bail!("{} {} not found", kind, id),
            }
        }
        Commands::List { kind, ids, fetch } => {
            let names: Option<Vec<&str>> =
                fetch.as_ref().map(|f| f.iter().map(String::as_str).collect());
            let ids: Option<Vec<NodeId>> =
                ids.as_ref().map(|ids| ids.iter().copied().map(NodeId::new).collect());

            let entities = match (ids, names) {
                (Some(ids), Some(names)) => session.find_all_by_id_with(kind, &ids, &names).await?,
                (Some(ids), None) => session.find_all_by_id(kind, &ids).await?,
                (None, Some(names)) => session.find_all_with(kind, &names).await?,
                (None, None) => session.find_all(kind).await?,
            };
            print_entities(&entities, &cli.format)
        }
        Commands::Count { kind } => {
            let count = session.count(kind).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "kind": kind, "count": count })),
                _ => println!("{}", count),
            }
            Ok(())
        }
    }
}

fn print_schema(config: &OrmConfig, format: &OutputFormat) -> anyhow::Result<()> {
    // validates the declarations the same way a session would
    config.registry()?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config.kinds)?);
        }
        OutputFormat::Csv => {
            println!("kind,relation,edge,direction,target,cardinality,cascade,mode");
            for schema in &config.kinds {
                for r in &schema.relations {
                    println!(
                        "{},{},{},{:?},{},{:?},{},{:?}",
                        schema.kind, r.name, r.edge, r.direction, r.target, r.cardinality, r.cascade, r.mode
                    );
                }
            }
        }
        OutputFormat::Table => {
            if config.kinds.is_empty() {
                println!("(no kinds configured)");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec![
                "Kind", "Labels", "Relation", "Edge", "Direction", "Target", "Cardinality",
                "Cascade", "Mode",
            ]);
            for schema in &config.kinds {
                let labels: Vec<String> = schema.labels.iter().map(|l| l.to_string()).collect();
                if schema.relations.is_empty() {
                    table.add_row(vec![schema.kind.clone(), labels.join(":")]);
                    continue;
                }
                for r in &schema.relations {
                    table.add_row(vec![
                        schema.kind.clone(),
                        labels.join(":"),
                        r.name.clone(),
                        r.edge.to_string(),
                        format!("{:?}", r.direction),
                        r.target.to_string(),
                        format!("{:?}", r.cardinality),
                        r.cascade.to_string(),
                        format!("{:?}", r.mode),
                    ]);
                }
            }
            println!("{}", table);
        }
    }
    Ok(())
}

fn print_entities(entities: &[EntityRef], format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = entities.iter().map(|e| e.read().to_json()).collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Csv => {
            let (header, rows) = entity_rows(entities);
            println!("{}", header.join(","));
            for row in rows {
                let cells: Vec<String> = row.iter().map(|c| format_csv_value(c)).collect();
                println!("{}", cells.join(","));
            }
        }
        OutputFormat::Table => {
            if entities.is_empty() {
                println!("(no results)");
                return Ok(());
            }
            let (header, rows) = entity_rows(entities);
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(&header);
            for row in rows {
                table.add_row(row);
            }
            println!("{}", table);
            println!("{} entit{}", entities.len(), if entities.len() == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}

/// `id`, every property key seen, then every loaded relation as member ids
fn entity_rows(entities: &[EntityRef]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut props: Vec<String> = Vec::new();
    let mut relations: Vec<String> = Vec::new();
    for entity in entities {
        let entity = entity.read();
        for key in entity.properties().keys() {
            if !props.contains(key) {
                props.push(key.clone());
            }
        }
        for name in entity.relation_names() {
            if loaded(entity.relation(name)).is_some() && !relations.iter().any(|r| r == name) {
                relations.push(name.to_string());
            }
        }
    }

    let mut header = vec!["id".to_string()];
    header.extend(props.iter().cloned());
    header.extend(relations.iter().cloned());

    let rows = entities
        .iter()
        .map(|entity| {
            let entity = entity.read();
            let mut row = vec![entity.id().map(|id| id.as_u64().to_string()).unwrap_or_default()];
            for key in &props {
                row.push(entity.property(key).map(|v| v.to_string()).unwrap_or_default());
            }
            for name in &relations {
                let ids = loaded(entity.relation(name))
                    .map(|related| {
                        related
                            .members()
                            .iter()
                            .filter_map(|m| m.id())
                            .map(|id| id.as_u64().to_string())
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default();
                row.push(ids);
            }
            row
        })
        .collect();

    (header, rows)
}

fn loaded(value: Option<&RelationValue>) -> Option<Related> {
    match value? {
        RelationValue::Resolved(related) => Some(related.clone()),
        RelationValue::Lazy(handle) => handle.peek(),
    }
}

fn format_csv_value(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

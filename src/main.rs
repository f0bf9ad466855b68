//! AgentSense — administrative entry point.
//!
//! Each subcommand is a direct pass-through to one store or engine call; the
//! binary owns bootstrap (dotenv, logger, config) and formatting, nothing
//! else.
//!
//! Usage:
//!   agentsense search <query> [limit]
//!   agentsense entities [type]
//!   agentsense show <name>
//!   agentsense pending [limit]
//!   agentsense ingest <extraction.json> [session-key]
//!   agentsense recall <prompt...>
//!   agentsense stats
//!   agentsense clear
//!   agentsense export

use std::fs;

use agentsense::{
    AppError, EntityType, GraphStore,
    config, logger, recall,
    types::ExtractionResult,
};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        return Err(AppError::Config("missing subcommand (try: stats, search, recall)".into()));
    };

    if let Some(parent) = config.db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut store = GraphStore::new(&config.db_path);
    store.initialize()?;

    match command.as_str() {
        "search" => {
            let query = args
                .get(1)
                .ok_or_else(|| AppError::Config("search: missing query".into()))?;
            let limit = parse_count(args.get(2), 10)?;
            print_json(&store.search(query, limit)?)?;
        }
        "entities" => {
            let type_filter = args.get(1).map(|t| EntityType::parse_lossy(t));
            for node in store.get_all_nodes(type_filter)? {
                println!("{:<6} {:<14} {}", node.id, node.entity_type, node.name);
            }
        }
        "show" => {
            let name = args
                .get(1)
                .ok_or_else(|| AppError::Config("show: missing entity name".into()))?;
            match store.get_node_by_name(name)? {
                Some(node) => {
                    let neighbors = store.get_neighbors(node.id)?;
                    print_json(&(node, neighbors))?;
                }
                None => println!("no entity named '{name}'"),
            }
        }
        "pending" => {
            let limit = parse_count(args.get(1), 20)?;
            print_json(&store.get_pending_observations(limit)?)?;
        }
        "ingest" => {
            let path = args
                .get(1)
                .ok_or_else(|| AppError::Config("ingest: missing extraction file".into()))?;
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| AppError::Config(format!("ingest: malformed JSON in {path}: {e}")))?;
            let extraction = ExtractionResult::from_json_value(&value);
            let raw_text = value
                .get("raw_text")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(&raw);
            let session_key = args
                .get(2)
                .cloned()
                .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
            let report = store.ingest_extraction(&extraction, raw_text, &session_key)?;
            println!(
                "ingested: {} nodes, {} edges (session {session_key})",
                report.nodes_upserted, report.edges_upserted
            );
        }
        "recall" => {
            if args.len() < 2 {
                return Err(AppError::Config("recall: missing prompt".into()));
            }
            let prompt = args[1..].join(" ");
            print_json(&recall::recall_entities(&store, &prompt, config.recall_max_entities)?)?;
        }
        "stats" => {
            let stats = store.stats()?;
            println!(
                "nodes: {}  edges: {}  observations: {}",
                stats.nodes, stats.edges, stats.observations
            );
        }
        "clear" => {
            store.clear()?;
            println!("store cleared");
        }
        "export" => {
            print_json(&store.export()?)?;
        }
        other => {
            return Err(AppError::Config(format!("unknown subcommand: {other}")));
        }
    }

    store.close();
    Ok(())
}

fn parse_count(arg: Option<&String>, default: usize) -> Result<usize, AppError> {
    match arg {
        None => Ok(default),
        Some(s) => s
            .parse::<usize>()
            .map_err(|_| AppError::Config(format!("invalid count: '{s}'"))),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Config(format!("serialize output: {e}")))?;
    println!("{out}");
    Ok(())
}

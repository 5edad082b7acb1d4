//! Stratum maintenance CLI - inspect and operate on a file-backed store

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use stratum::config::Config;
use stratum::embedding::{EMBEDDING_DIMENSION, HashEmbedder};
use stratum::engine::{EngineStats, MemoryEngine};
use stratum::error::Result;
use stratum::memory::{DEFAULT_IMPORTANCE, MemoryItem};
use stratum::search::SearchQuery;
use stratum::storage::FileStorage;
use stratum::StratumError;

/// Stratum - tiered memory store with hybrid vector and keyword search
#[derive(Parser)]
#[command(name = "stratum")]
#[command(about = "Operate on a tiered memory store")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Override the storage directory from the config
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a new item
    Store {
        text: String,
        /// Base importance between 0 and 1
        #[arg(long, default_value_t = DEFAULT_IMPORTANCE)]
        importance: f32,
    },
    /// Print one item
    Get { id: Uuid },
    /// Hybrid search over stored items
    Search {
        query: String,
        #[arg(short = 'k', long, default_value_t = 10)]
        k: usize,
    },
    /// Delete an item
    Delete { id: Uuid },
    /// Run one migration sweep
    Sweep,
    /// Show tier, cache and index statistics
    Stats,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let mut config = load_config(cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    let engine = open_engine(config).await?;
    match cli.command {
        Command::Store { text, importance } => {
            let receipt = engine
                .store(MemoryItem::new(text).with_importance(importance))
                .await?;
            print_json(&receipt)
        }
        Command::Get { id } => match engine.retrieve(id).await? {
            Some(item) => print_json(&item),
            None => Err(StratumError::General(format!("No item with id {id}"))),
        },
        Command::Search { query, k } => {
            let hits = engine.search(SearchQuery::text(query, k)).await?;
            print_json(&hits)
        }
        Command::Delete { id } => match engine.delete(id).await? {
            Some(record) => print_json(&record),
            None => Err(StratumError::General(format!("No item with id {id}"))),
        },
        Command::Sweep => {
            let report = engine.run_migration_sweep().await?;
            print_json(&report)
        }
        Command::Stats => {
            let stats = engine.stats();
            match cli.format {
                OutputFormat::Json => print_json(&stats),
                OutputFormat::Table => {
                    print_stats_table(&stats);
                    Ok(())
                }
            }
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,stratum=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        tracing::info!("Loading config from: {}", path.display());
        return Config::from_file(&path);
    }

    for path in Config::default_paths() {
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return Config::from_file(&path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(Config::default())
}

async fn open_engine(config: Config) -> Result<MemoryEngine> {
    let data_dir = config.storage.data_dir.clone();
    tracing::info!("Opening storage at: {}", data_dir.display());
    let storage = FileStorage::open(data_dir).await?;

    let dimension = config.vector.dimension.unwrap_or(EMBEDDING_DIMENSION);
    let (engine, report) = MemoryEngine::builder(config)
        .storage(Arc::new(storage))
        .embedder(Arc::new(HashEmbedder::new(dimension)))
        .open()
        .await?;

    if !report.corrupt.is_empty() || !report.unreadable.is_empty() {
        tracing::warn!(
            corrupt = report.corrupt.len(),
            unreadable = report.unreadable.len(),
            "Some stored items were skipped"
        );
    }
    Ok(engine)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_stats_table(stats: &EngineStats) {
    println!("Stratum Statistics");
    println!("==================\n");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["Tier", "Items", "Bytes", "Status"]);
    for tier in &stats.tiers {
        table.add_row([
            tier.tier.to_string(),
            tier.items.to_string(),
            tier.bytes.to_string(),
            format!("{:?}", tier.status),
        ]);
    }
    println!("{table}\n");

    println!("Total: {} items", stats.total_items);
    println!(
        "Cache: {}/{} entries, {:.1}% hit rate ({} hits, {} misses, {} rejected)",
        stats.cache.len,
        stats.cache.capacity,
        stats.cache_hit_rate * 100.0,
        stats.cache.hits,
        stats.cache.misses,
        stats.cache.rejections
    );
    println!(
        "Index: {} vectors ({} tombstoned), {} documents, {} terms",
        stats.index.vector_live,
        stats.index.vector_tombstones,
        stats.index.lexical_documents,
        stats.index.lexical_terms
    );
}

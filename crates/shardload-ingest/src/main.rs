//! Shardload - bulk loader for gzip-compressed JSON shards

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use shardload_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use shardload_common::progress::format_count;
use shardload_ingest::decoder::{count_documents, ShardCount};
use shardload_ingest::{DocumentStore, ElasticsearchStore, IngestConfig, IngestPipeline};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "shardload")]
#[command(author, version, about = "Bulk-load gzip-compressed JSON shards into Elasticsearch")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "SHARDLOAD_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every shard in the data directory
    Ingest(IngestArgs),

    /// Check that the configured store is reachable
    Check,

    /// Count documents per shard without contacting the store
    Count {
        /// Override data_files.path
        #[arg(long)]
        data_path: Option<PathBuf>,

        /// Print counts as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Override data_files.path
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Override elasticsearch.index
    #[arg(long)]
    index: Option<String>,

    /// Operations per bulk request
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Bulk requests in flight at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Skip documents whose id already exists in the index
    #[arg(long)]
    dedup: bool,

    /// Count documents first so progress shows a total
    #[arg(long)]
    precount: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl IngestArgs {
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(path) = &self.data_path {
            config.data_files.path = path.clone();
        }
        if let Some(index) = &self.index {
            config.elasticsearch.index = index.clone();
        }
        if let Some(size) = self.chunk_size {
            config.ingest.chunk_size = size;
        }
        if let Some(width) = self.concurrency {
            config.ingest.concurrency = width;
        }
        if self.dedup {
            config.ingest.dedup = true;
        }
        if self.precount {
            config.ingest.precount = true;
        }
        if self.no_progress || self.json {
            config.ingest.progress = false;
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("shardload")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        }
    };

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // Flush buffered log lines before exiting
    drop(guard);
    process::exit(code);
}

async fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Ingest(args) => ingest(&cli.config, &args).await,
        Command::Check => check(&cli.config).await,
        Command::Count { data_path, json } => count(&cli.config, data_path, json).await,
    }
}

fn load_config(path: &Path) -> Result<IngestConfig> {
    IngestConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn ingest(config_path: &Path, args: &IngestArgs) -> Result<i32> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration after command-line overrides")?;

    let store = ElasticsearchStore::new(&config.elasticsearch)
        .context("Failed to create Elasticsearch client")?;
    let pipeline = IngestPipeline::new(config, Arc::new(store));

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight requests");
            token.cancel();
        }
    });

    let report = pipeline.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(report.exit_code())
}

async fn check(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let store = ElasticsearchStore::new(&config.elasticsearch)
        .context("Failed to create Elasticsearch client")?;

    store
        .health_check()
        .await
        .with_context(|| format!("Store at {} is not reachable", store.base_url()))?;

    info!(cluster_url = %store.base_url(), "Store is reachable");
    println!("Store at {} is reachable.", store.base_url());
    Ok(0)
}

#[derive(Debug, Serialize)]
struct ShardCountLine {
    shard: String,
    documents: u64,
    malformed: u64,
    error: Option<String>,
}

async fn count(config_path: &Path, data_path: Option<PathBuf>, json: bool) -> Result<i32> {
    let mut config = load_config(config_path)?;
    if let Some(path) = data_path {
        config.data_files.path = path;
    }

    let shards = config.scanner().scan()?;

    let lines = tokio::task::spawn_blocking(move || {
        shards
            .iter()
            .map(|shard| match count_documents(shard) {
                Ok(ShardCount { documents, malformed }) => ShardCountLine {
                    shard: shard.name.clone(),
                    documents,
                    malformed,
                    error: None,
                },
                Err(e) => ShardCountLine {
                    shard: shard.name.clone(),
                    documents: 0,
                    malformed: 0,
                    error: Some(e.to_string()),
                },
            })
            .collect::<Vec<_>>()
    })
    .await
    .context("Counting task failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        for line in &lines {
            match &line.error {
                Some(e) => println!("{}: unreadable ({})", line.shard, e),
                None => println!(
                    "{}: {} documents, {} malformed",
                    line.shard,
                    format_count(line.documents),
                    format_count(line.malformed)
                ),
            }
        }
        let total: u64 = lines.iter().map(|l| l.documents).sum();
        println!("Total: {} documents in {} shards.", format_count(total), lines.len());
    }

    let unreadable = lines.iter().any(|l| l.error.is_some());
    Ok(if unreadable { 2 } else { 0 })
}

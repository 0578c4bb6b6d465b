use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use distill::brief::{BriefPolicy, BriefRewriter, HttpLlmClient};
use distill::config::{self, Config};
use distill::ingest::{CircuitRegistry, HoldingQueue, Poller};
use distill::ingest::scheduler::PollerConfig;
use distill::pipeline::Newsroom;
use distill::storage::Database;

#[derive(Parser, Debug)]
#[command(
    name = "distill",
    about = "News feed ingestion and neutral brief generation pipeline"
)]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "distill.toml")]
    config: PathBuf,

    /// Source list file ([[sources]] entries)
    #[arg(long, value_name = "FILE", default_value = "sources.toml")]
    sources: PathBuf,

    /// Override the database path from the config file
    #[arg(long, value_name = "FILE")]
    db: Option<String>,

    /// Delete and recreate the database before starting
    #[arg(long)]
    reset_db: bool,

    /// Run one manual batch, print the result, and exit
    #[arg(long)]
    trigger_batch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config).context("Failed to load configuration")?;
    let db_path = args.db.unwrap_or_else(|| config.db_path.clone());

    if args.reset_db && std::path::Path::new(&db_path).exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let seeds = match config::load_sources(&args.sources) {
        Ok(seeds) if seeds.is_empty() => {
            eprintln!("Error: no sources defined in {}", args.sources.display());
            std::process::exit(1);
        }
        Ok(seeds) => seeds,
        Err(e) => {
            eprintln!("Error: could not load {}: {}", args.sources.display(), e);
            eprintln!();
            eprintln!("Create a sources file with [[sources]] entries, for example:");
            eprintln!();
            eprintln!("  [[sources]]");
            eprintln!("  id = \"federal-reserve\"");
            eprintln!("  name = \"Federal Reserve Press\"");
            eprintln!("  url = \"https://www.federalreserve.gov/feeds/press_all.xml\"");
            eprintln!("  category = \"FINANCE_MACRO\"");
            std::process::exit(1);
        }
    };

    let db = Database::open(&db_path)
        .await
        .context("Failed to open database")?;
    db.sync_sources(&seeds)
        .await
        .context("Failed to sync sources")?;
    tracing::info!(sources = seeds.len(), db = %db_path, "Sources synced");

    // One HTTP client shared by feed fetches and LLM calls
    let client = reqwest::Client::new();

    let (queue, preempt_rx) = HoldingQueue::new();
    let queue = Arc::new(queue);
    let breakers = Arc::new(CircuitRegistry::new());
    let shutdown = CancellationToken::new();

    let llm = HttpLlmClient::new(client.clone(), &config.llm);
    let rewriter = BriefRewriter::new(Arc::new(llm), BriefPolicy::from_config(&config));
    let newsroom = Arc::new(Newsroom::new(
        db.clone(),
        Arc::clone(&queue),
        Arc::clone(&breakers),
        rewriter,
        shutdown.clone(),
    ));

    if args.trigger_batch {
        let result = newsroom.trigger_manual_batch().await;
        println!(
            "Batch complete: success={} articles={} briefs={} tokens={} cost=${:.4} elapsed={}ms",
            result.success,
            result.articles_processed,
            result.briefs_generated,
            result.tokens_used,
            result.cost,
            result.processing_ms,
        );
        for error in &result.errors {
            eprintln!("  error: {}", error);
        }
        return Ok(());
    }

    let poller = Poller::new(
        db,
        client,
        Arc::clone(&queue),
        Arc::clone(&breakers),
        Arc::clone(&newsroom),
        PollerConfig::from_config(&config),
        shutdown.clone(),
    );
    let poller_handle = tokio::spawn(poller.run(preempt_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    poller_handle.await.context("Poller task panicked")?;

    println!("Goodbye!");
    Ok(())
}

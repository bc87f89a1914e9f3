use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use magpie_client::HttpContentSource;
use magpie_core::checkpoint::{CheckpointStore, JsonCheckpointFile};
use magpie_core::pipeline::HarvestPipeline;
use magpie_core::report::TracingReporter;
use magpie_core::{HarvestConfig, RunSummary};
use magpie_db::{Database, DatabaseConfig};

/// Topics harvested when none are given on the command line.
const DEFAULT_TOPICS: &[&str] = &[
    "tech-companies",
    "artificial-intelligence",
    "data-science",
    "programming",
    "devops",
    "charter-schools",
    "startup",
];

#[derive(Parser)]
#[command(name = "magpie", version, about = "Incremental author/post harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the harvest pipeline (resumes from the checkpoint document)
    Run {
        /// Topics to collect authors from
        #[arg(short, long, num_args = 1..)]
        topics: Vec<String>,

        /// Target number of unique authors
        #[arg(short = 'n', long, env = "MAGPIE_TARGET_AUTHORS", default_value_t = 100)]
        target_authors: usize,

        /// Remote API base URL
        #[arg(long, env = "MAGPIE_API_URL")]
        api_url: String,

        /// Path of the checkpoint document
        #[arg(long, env = "MAGPIE_CHECKPOINT", default_value = "harvest_progress.json")]
        checkpoint: PathBuf,

        /// Start from scratch: delete the checkpoint document first
        #[arg(long, default_value_t = false)]
        reset: bool,
    },

    /// Show checkpoint progress and database row counts
    Status {
        /// Path of the checkpoint document
        #[arg(long, env = "MAGPIE_CHECKPOINT", default_value = "harvest_progress.json")]
        checkpoint: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("magpie=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            topics,
            target_authors,
            api_url,
            checkpoint,
            reset,
        } => {
            let topics = if topics.is_empty() {
                DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect()
            } else {
                topics
            };
            cmd_run(&topics, target_authors, &api_url, checkpoint, reset).await
        }
        Commands::Status { checkpoint } => cmd_status(checkpoint).await,
    }
}

async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

async fn cmd_run(
    topics: &[String],
    target_authors: usize,
    api_url: &str,
    checkpoint: PathBuf,
    reset: bool,
) -> Result<()> {
    let checkpoints = JsonCheckpointFile::new(checkpoint);
    if reset {
        tracing::info!("Resetting previous progress");
        checkpoints.reset().map_err(|e| anyhow::anyhow!(e))?;
    }

    // Startup failures abort with a non-zero exit before any stage runs:
    // an unreachable source or an unreadable checkpoint document.
    let source = HttpContentSource::new(api_url).map_err(|e| anyhow::anyhow!(e))?;
    source
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Remote source unreachable at {api_url}"))?;
    checkpoints
        .load()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Checkpoint document unreadable")?;

    let db = connect_db().await?;

    let config = HarvestConfig::default().with_target_authors(target_authors);
    let pipeline = HarvestPipeline::new(source, db.profile_store(), checkpoints, config);

    // Ctrl-C stops the pipeline from starting new units; the in-flight
    // unit finishes or fails on its own.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing the in-flight unit");
            signal_cancel.cancel();
        }
    });

    let summary = pipeline
        .run(topics, cancel, &TracingReporter)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if summary.interrupted {
        println!("Harvest interrupted — progress saved, re-run to resume.");
    } else {
        println!("Harvest complete.");
    }
    println!(
        "  authors: {} selected, {} processed this run",
        summary.selected, summary.authors_processed
    );
    println!(
        "  stages:  {} completed, {} already done, {} deferred",
        summary.stages_completed,
        summary.stages_skipped,
        summary.deferred.len()
    );
    for deferred in &summary.deferred {
        println!(
            "    deferred {} for @{}: {}",
            deferred.stage, deferred.author, deferred.reason
        );
    }
}

async fn cmd_status(checkpoint: PathBuf) -> Result<()> {
    let checkpoints = JsonCheckpointFile::new(checkpoint);
    let state = checkpoints.load().map_err(|e| anyhow::anyhow!(e))?;

    println!("Checkpoint: {}", checkpoints.path().display());
    println!("  topics completed:   {}", state.completed_topics.len());
    println!("  authors selected:   {}", state.selected_authors.len());
    println!("  detailed:           {}", state.detailed_authors.len());
    println!("  listed:             {}", state.listed_authors.len());
    println!(
        "  content fetched:    {}",
        state.content_fetched_authors.len()
    );
    println!(
        "  followers fetched:  {}",
        state.follower_fetched_authors.len()
    );

    let db = connect_db().await?;
    let counts = db.profile_store().counts().await.map_err(|e| anyhow::anyhow!(e))?;
    println!("Database:");
    println!("  authors:            {}", counts.authors);
    println!(
        "  posts:              {} ({} with body)",
        counts.posts, counts.posts_with_body
    );
    println!("  follow edges:       {}", counts.follows);

    Ok(())
}

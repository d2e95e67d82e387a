mod cli;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sagashark::config::SagaConfig;

#[derive(Parser)]
#[command(name = "saga", version, about = "Hybrid search over development sagas")]
struct Cli {
    /// Config file (default: ~/.sagashark/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rank sagas against a free-text query
    Search {
        query: String,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
        /// Skip the vector index and rank lexically
        #[arg(long)]
        text_only: bool,
        /// Show the per-factor lexical breakdown
        #[arg(long)]
        explain: bool,
    },
    /// List the newest sagas
    List {
        /// Only sagas with a tag containing this text
        #[arg(short, long)]
        tag: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Maintain the vector index
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// List sagas whose embeddings are closest to a stored saga
    Similar {
        id: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Check the index against the record store
    Doctor,
    /// Score a change for significance
    Score {
        /// Commit message
        #[arg(short, long)]
        message: String,
        /// Changed file (repeatable)
        #[arg(short, long = "path")]
        paths: Vec<String>,
        #[arg(short, long, default_value = "")]
        branch: String,
        /// Lines added plus removed
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        diff_lines: i64,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Re-embed every saga and replace the index
    Rebuild,
    /// Embed one saga and append it to the index
    Add { id: String },
    /// Tombstone a saga's vector
    Remove { id: String },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.sagashark/models/
    Download,
}

/// Grace period for blocking work still running when a command finishes.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SagaConfig::load_from(path)?,
        None => SagaConfig::load()?,
    };

    // Log to stderr so stdout carries only results.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    block_on_detached(run(cli.command, config))?
}

/// Drive `future` on a fresh runtime, then shut it down without waiting on
/// blocking tasks past [`SHUTDOWN_GRACE`]. A query embedding abandoned after
/// its timeout would otherwise hold the process open.
fn block_on_detached<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(output)
}

async fn run(command: Command, config: SagaConfig) -> Result<()> {
    match command {
        Command::Search {
            query,
            limit,
            text_only,
            explain,
        } => {
            let options = cli::search::SearchOptions {
                limit: limit.unwrap_or(config.ranking.default_limit),
                text_only,
                explain,
            };
            cli::search::search(&config, &query, &options).await?;
        }
        Command::List { tag, limit } => cli::list::list(&config, tag.as_deref(), limit)?,
        Command::Index { action } => match action {
            IndexAction::Rebuild => cli::index::rebuild(&config).await?,
            IndexAction::Add { id } => cli::index::add(&config, &id)?,
            IndexAction::Remove { id } => cli::index::remove(&config, &id)?,
        },
        Command::Similar { id, limit } => {
            cli::similar::similar(&config, &id, limit.unwrap_or(config.ranking.default_limit))?;
        }
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Score {
            message,
            paths,
            branch,
            diff_lines,
        } => cli::score::score(&config, &message, paths, &branch, diff_lines)?,
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}

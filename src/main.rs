//! # docsync CLI
//!
//! ## Usage
//!
//! ```bash
//! docsync --config ./config/docsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsync init` | Create the vector store and collection |
//! | `docsync ingest` | Index new and changed files from the input directory |
//! | `docsync status` | Compare the input directory with the state file |
//! | `docsync query "<text>"` | Print the chunks closest to a question |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docsync::config;
use docsync::progress::ProgressMode;
use docsync::sqlite_store::SqliteVectorStore;
use docsync::{ingest, logging, query, status};

/// docsync: incremental document ingestion into a vector collection.
#[derive(Parser)]
#[command(
    name = "docsync",
    about = "Incremental document ingestion: change detection, conversion, chunking, embedding",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite store and the configured collection. Idempotent.
    Init,

    /// Index new and changed files.
    ///
    /// Unchanged files are skipped. Files that fail are left out of the
    /// state file and retried on the next run.
    Ingest {
        /// Show what would be processed without converting, indexing, or
        /// writing state.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal,
        /// otherwise `none`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show which files are indexed, changed, new, unsupported, or missing.
    Status,

    /// Embed a question and print the closest chunks.
    Query {
        text: String,

        /// Number of results.
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteVectorStore::open(&cfg.store).await?;
            println!(
                "Store initialized: {} (collection {})",
                cfg.store.path.display(),
                cfg.store.collection
            );
            store.close().await;
        }
        Commands::Ingest { dry_run, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, dry_run, mode).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Query { text, top_k } => {
            query::run_query(&cfg, &text, top_k).await?;
        }
    }

    Ok(())
}

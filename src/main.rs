//! # Scholar CLI (`scholar`)
//!
//! Ingest a directory of JSON documents and ask questions answered from it.
//!
//! ## Usage
//!
//! ```bash
//! scholar --config ./config/scholar.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scholar ingest` | Load, chunk and index the corpus (replaces the live snapshot) |
//! | `scholar ask "<question>"` | Retrieve passages and synthesize a cited answer |
//! | `scholar status` | Show index state, snapshot version and counts |
//! | `scholar reset` | Delete every index snapshot |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what an ingest would index
//! scholar ingest --dry-run
//!
//! # Build the index from a different corpus directory
//! scholar ingest --corpus ./scraped
//!
//! # Ask with more context passages, as JSON
//! scholar ask "Where is the Eiffel Tower?" --k 8 --json
//! ```
//!
//! Log verbosity is controlled with `RUST_LOG` (default `warn`); logs go to
//! stderr so command output on stdout stays clean.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use scholar_rag::config::{self, Config};
use scholar_rag::error::Error;
use scholar_rag::pipeline::{AskOptions, Pipeline};
use scholar_rag::report;

/// Scholar: question answering over a local JSON document corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/scholar.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "scholar",
    about = "Scholar: question answering over a local JSON document corpus",
    version,
    long_about = "Scholar loads JSON and JSON Lines documents, splits them into overlapping \
    chunks, indexes them for semantic search, and answers questions with a language model \
    grounded in the retrieved passages, citing its sources."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/scholar.toml`. When the default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

const DEFAULT_CONFIG: &str = "./config/scholar.toml";

#[derive(Subcommand)]
enum Commands {
    /// Load, chunk and index the corpus.
    ///
    /// Builds a complete new snapshot and swaps it in atomically. The
    /// previous snapshot stays live if anything fails.
    Ingest {
        /// Corpus directory (defaults to `corpus.root`).
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Dry run: show document and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask a question about the indexed documents.
    Ask {
        /// The question.
        query: String,

        /// Number of passages to retrieve (defaults to `retrieval.default_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Fail instead of returning passages when answer generation fails.
        #[arg(long)]
        strict: bool,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index state and counts.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete every index snapshot.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = read_config(&cli.config)?;

    let pipeline = match Pipeline::from_config(cfg).await {
        Ok(p) => p,
        Err(e) => fail(e),
    };

    match cli.command {
        Commands::Ingest {
            corpus,
            dry_run,
            json,
        } => {
            if dry_run {
                let preview = pipeline.preview(corpus.as_deref());
                if json {
                    println!("{}", serde_json::to_string_pretty(&preview)?);
                } else {
                    report::print_preview(&preview);
                }
                return Ok(());
            }
            match pipeline.ingest(corpus.as_deref()).await {
                Ok(r) if json => println!("{}", serde_json::to_string_pretty(&r)?),
                Ok(r) => report::print_ingest(&r),
                Err(e) => fail(e),
            }
        }
        Commands::Ask {
            query,
            k,
            strict,
            json,
        } => {
            let options = AskOptions {
                k,
                allow_degraded: if strict { Some(false) } else { None },
            };
            match pipeline.ask_with(&query, options).await {
                Ok(r) if json => println!("{}", serde_json::to_string_pretty(&r)?),
                Ok(r) => report::print_answer(&r),
                Err(e) => fail(e),
            }
        }
        Commands::Status { json } => {
            let status = pipeline.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                report::print_status(&status);
            }
        }
        Commands::Reset => match pipeline.reset() {
            Ok(()) => println!("Index reset."),
            Err(e) => fail(e),
        },
    }

    Ok(())
}

/// Load the config file; a missing default file means built-in defaults.
fn read_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        tracing::info!("no config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    Ok(config::load_config(path)?)
}

/// Print a pipeline error and exit: 2 when there is no data, 1 otherwise.
fn fail(err: Error) -> ! {
    if err.is_no_data() {
        println!("{}", report::NO_DATA_MESSAGE);
        eprintln!("{}", err);
        std::process::exit(2);
    }
    eprintln!("Error ({}): {}", err.user_status().as_str(), err);
    std::process::exit(1);
}

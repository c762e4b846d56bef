//! # askdocs CLI
//!
//! Ask questions about your documents.
//!
//! ## Usage
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs index <dir>` | Load a directory and rebuild the index |
//! | `askdocs sync <export.jsonl>` | Index documents exported by a source adapter |
//! | `askdocs ask "<question>"` | One-shot question against the index |
//! | `askdocs chat` | Interactive question loop |
//! | `askdocs status` | Show the published index generation |
//! | `askdocs serve` | Start the HTTP server |
//!
//! Logs go to stderr; set `RUST_LOG=askdocs=debug` for retrieval details.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use askdocs::{commands, config, server};

/// askdocs: retrieval-augmented question answering over local documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askdocs.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "askdocs", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdocs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every supported file under a directory and rebuild the index.
    ///
    /// The new generation replaces the old one atomically; on failure the
    /// previous index stays in place.
    Index {
        /// Directory to load.
        dir: PathBuf,
    },

    /// Index documents from a JSON-lines export.
    ///
    /// Each line is `{"source_uri", "full_text", "metadata"}` as written by
    /// a source adapter. An empty export leaves the index untouched.
    Sync {
        /// Path to the `.jsonl` export.
        export: PathBuf,
    },

    /// Ask a single question.
    Ask {
        question: String,
    },

    /// Interactive question loop. Type `exit` or `quit` to leave.
    Chat,

    /// Show the published index generation.
    Status,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    match cli.command {
        Commands::Index { dir } => commands::run_index(&cfg, &dir).await?,
        Commands::Sync { export } => commands::run_sync(&cfg, &export).await?,
        Commands::Ask { question } => commands::run_ask(&cfg, &question).await?,
        Commands::Chat => commands::run_chat(&cfg).await?,
        Commands::Status => commands::run_status(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

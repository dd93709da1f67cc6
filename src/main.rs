//! # RAG CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag serve` | Start the HTTP API |
//! | `rag ingest <FILE>...` | Add `.pdf`, `.txt` or `.md` files to the knowledge base |
//! | `rag query "<question>"` | Answer a question from the knowledge base |
//! | `rag status` | Show knowledge base and model status |
//! | `rag docs` | List stored chunks |
//! | `rag clear` | Remove every document |
//! | `rag reindex` | Re-embed stored chunks with the configured model |
//! | `rag config` | Print the effective configuration |
//!
//! ## Examples
//!
//! ```bash
//! rag ingest handbook.pdf notes.txt --chunk-size 256 --chunk-overlap 32
//! rag query "What is the refund policy?" --top-k 5
//! rag query "refund" --retrieve-only
//! GROQ_API_KEY=... rag serve
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use frameworkless_rag::config::{load_config, load_config_or_default, Config};
use frameworkless_rag::{ingest, logging, query, server, status};

const DEFAULT_CONFIG_PATH: &str = "./config/rag.toml";

/// Retrieval-augmented question answering over your own documents.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "Retrieval-augmented question answering over uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rag.toml`; when that file does not exist the
    /// built-in defaults are used. An explicitly given path must exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    ///
    /// Binds to `[server].bind`; the `PORT` environment variable overrides
    /// the port.
    Serve,

    /// Load documents into the knowledge base.
    ///
    /// Re-ingesting a file with the same name replaces its earlier chunks.
    Ingest {
        /// Files to ingest (`.pdf`, `.txt`, `.md`).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Words per chunk.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Words shared by consecutive chunks.
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Ask a question.
    Query {
        question: String,

        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the retrieved chunks without calling the LLM.
        #[arg(long)]
        retrieve_only: bool,
    },

    /// Show knowledge base and model status.
    Status,

    /// List stored chunks.
    Docs,

    /// Remove every document and the persisted index.
    Clear,

    /// Re-embed every stored chunk with the configured embedding model.
    ///
    /// Needed after `[embedding].model` changes; until then queries are
    /// refused because old and new vectors are not comparable.
    Reindex,

    /// Print the effective configuration as TOML.
    Config,
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => load_config_or_default(Path::new(DEFAULT_CONFIG_PATH)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest {
            files,
            chunk_size,
            chunk_overlap,
        } => {
            ingest::run_ingest(&cfg, &files, chunk_size, chunk_overlap).await?;
        }
        Commands::Query {
            question,
            top_k,
            retrieve_only,
        } => {
            query::run_query(&cfg, &question, top_k, retrieve_only).await?;
        }
        Commands::Status => {
            status::run_status(&cfg)?;
        }
        Commands::Docs => {
            status::run_docs(&cfg)?;
        }
        Commands::Clear => {
            status::run_clear(&cfg)?;
        }
        Commands::Reindex => {
            ingest::run_reindex(&cfg).await?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

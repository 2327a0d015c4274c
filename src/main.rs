//! # docforge CLI
//!
//! The `docforge` binary extracts Word documents into a corpus file,
//! inspects the retrieval index and generates answers, job descriptions
//! and case studies from the corpus.
//!
//! ## Usage
//!
//! ```bash
//! docforge --config ./config/docforge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docforge extract` | Convert `.docx` files into a flat corpus text file |
//! | `docforge index` | Load the corpus and build the index once |
//! | `docforge search "<query>"` | Show the passages retrieved for a query |
//! | `docforge generate --mode <mode> "<topic>"` | Generate one document |
//! | `docforge chat` | Interactive question loop |
//! | `docforge templates` | List generation modes and their templates |
//!
//! ## Examples
//!
//! ```bash
//! # Prepare the corpus from Word files
//! docforge extract --source word_docs --output docs/documents.txt
//!
//! # Keyword retrieval works without an API key
//! docforge search "warehouse" --mode keyword
//!
//! # Draft a job description
//! OPENAI_API_KEY=sk-... docforge generate --mode job-description "Backend Engineer"
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use docforge::config::{self, ApiKey, Config};
use docforge::index::{self, RetrievalMode};
use docforge::pipeline::Pipeline;
use docforge::prompt::{self, Mode, TemplateRegistry};
use docforge::{extract, logging, shell};

const DEFAULT_CONFIG: &str = "./config/docforge.toml";

/// docforge: retrieval-augmented generation over a local document folder.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docforge.example.toml` for every option.
#[derive(Parser)]
#[command(
    name = "docforge",
    about = "Generate answers, job descriptions and case studies from your own documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docforge.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text from Word documents into a corpus file.
    ///
    /// Every `.docx` in the source directory is written as a
    /// `=== <filename> ===` header followed by its paragraphs. The output
    /// file is truncated first, so re-running gives identical output.
    Extract {
        /// Directory containing `.docx` files (default: `[extract] source_dir`).
        #[arg(long)]
        source: Option<PathBuf>,

        /// Output file (default: `[extract] output`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load the corpus and build the index, reporting its size.
    Index,

    /// Show the passages retrieved for a query.
    Search {
        /// The search query string.
        query: String,

        /// Retrieval mode: `keyword`, `semantic`, or `hybrid`
        /// (default: `[retrieval] mode`).
        #[arg(long)]
        mode: Option<String>,

        /// Maximum number of passages (default: `[retrieval] top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Generate one document from a topic or answer one question.
    Generate {
        /// `question`, `job-description`, `case-study` or `case-study-assessment`.
        #[arg(long, default_value = "question")]
        mode: String,

        /// Job role, case study topic or question.
        topic: String,

        /// Print the response and retrieved passages as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask questions interactively until `exit`.
    Chat {
        #[arg(long, default_value = "question")]
        mode: String,
    },

    /// List generation modes and their templates.
    Templates,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let (config_path, explicit) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let cfg = config::load_config(&config_path, explicit)?;

    match cli.command {
        Commands::Extract { source, output } => {
            let source = source.unwrap_or_else(|| cfg.extract.source_dir.clone());
            let output = output.unwrap_or_else(|| cfg.extract.output.clone());
            extract::run_extract(&source, &output)?;
        }
        Commands::Index => {
            let key = retrieval_key(&cfg, None)?;
            index::run_index(&cfg, key.as_ref()).await?;
        }
        Commands::Search { query, mode, limit } => {
            let mode = mode
                .map(|m| m.parse::<RetrievalMode>())
                .transpose()?;
            let key = retrieval_key(&cfg, mode)?;
            index::run_search(&cfg, key.as_ref(), &query, mode, limit).await?;
        }
        Commands::Generate { mode, topic, json } => {
            let mode: Mode = mode.parse()?;
            let pipeline = build_pipeline(&cfg).await?;
            shell::run_generate(&pipeline, mode, &topic, json).await?;
        }
        Commands::Chat { mode } => {
            let mode: Mode = mode.parse()?;
            let pipeline = build_pipeline(&cfg).await?;
            shell::run_chat(&pipeline, mode).await?;
        }
        Commands::Templates => {
            let registry = TemplateRegistry::from_path(cfg.templates.path.as_deref())?;
            prompt::run_templates(&registry);
        }
    }

    Ok(())
}

/// Resolve the credential and build the index before accepting any input.
async fn build_pipeline(cfg: &Config) -> anyhow::Result<Pipeline> {
    let key = cfg.api_key()?;
    let pipeline = Pipeline::from_config(cfg, key).context("Failed to initialize pipeline")?;
    let stats = pipeline.ready().await.context("Failed to build index")?;
    info!(documents = stats.documents, chunks = stats.chunks, "pipeline ready");
    Ok(pipeline)
}

/// The credential is only needed when retrieval calls the OpenAI embedding API.
fn retrieval_key(cfg: &Config, mode: Option<RetrievalMode>) -> anyhow::Result<Option<ApiKey>> {
    let mode = match mode {
        Some(mode) => mode,
        None => cfg.retrieval.mode.parse()?,
    };
    if mode != RetrievalMode::Keyword && cfg.embedding.needs_credential() {
        Ok(Some(cfg.api_key()?))
    } else {
        Ok(None)
    }
}

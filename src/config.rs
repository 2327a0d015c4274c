//! TOML configuration parsing and validation.
//!
//! Every section is optional; an empty file yields a usable configuration
//! that reads `./docs`, embeds with OpenAI and completes with `gpt-4o`.
//!
//! ```toml
//! [corpus]
//! dir = "./docs"
//!
//! [retrieval]
//! mode = "semantic"
//! top_k = 2
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-ada-002"
//! dims = 1536
//!
//! [completion]
//! model = "gpt-4o"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::Error;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub exclude_hidden: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: default_corpus_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            recursive: false,
            exclude_hidden: true,
            follow_symlinks: false,
        }
    }
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./docs")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_extract_source")]
    pub source_dir: PathBuf,
    #[serde(default = "default_extract_output")]
    pub output: PathBuf,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            source_dir: default_extract_source(),
            output: default_extract_output(),
        }
    }
}

fn default_extract_source() -> PathBuf {
    PathBuf::from("word_docs")
}
fn default_extract_output() -> PathBuf {
    PathBuf::from("documents.txt")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// `"semantic"`, `"keyword"` or `"hybrid"`.
    #[serde(default = "default_retrieval_mode")]
    pub mode: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_retrieval_mode(),
            top_k: default_top_k(),
            hybrid_alpha: default_hybrid_alpha(),
            timeout_secs: default_retrieval_timeout(),
        }
    }
}

fn default_retrieval_mode() -> String {
    "semantic".to_string()
}
fn default_top_k() -> usize {
    2
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_retrieval_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Whether this provider authenticates with the shared API credential.
    pub fn needs_credential(&self) -> bool {
        self.provider == "openai"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_completion_model(),
            base_url: default_completion_base_url(),
            timeout_secs: default_completion_timeout(),
            max_retries: 0,
        }
    }
}

fn default_completion_model() -> String {
    "gpt-4o".to_string()
}
fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_completion_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TemplatesConfig {
    /// TOML file overriding some or all of the built-in prompt templates.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// API credential resolved from the environment at startup.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl Config {
    /// Read the API key named by `credentials.api_key_env`.
    ///
    /// Absence (or an empty value) is a fatal [`Error::Config`].
    pub fn api_key(&self) -> Result<ApiKey, Error> {
        let var = &self.credentials.api_key_env;
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Ok(ApiKey(v.trim().to_string())),
            _ => Err(Error::Config(format!(
                "{} environment variable not set",
                var
            ))),
        }
    }
}

/// Load the configuration file.
///
/// When `explicit` is false and the file does not exist, defaults are used;
/// an explicitly requested file must exist.
pub fn load_config(path: &Path, explicit: bool) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else if explicit {
        bail!("Config file not found: {}", path.display());
    } else {
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    if config.retrieval.timeout_secs == 0 || config.completion.timeout_secs == 0 {
        bail!("timeout_secs must be > 0");
    }

    match config.retrieval.mode.as_str() {
        "keyword" => {}
        "semantic" | "hybrid" => {
            if !config.embedding.is_enabled() {
                bail!(
                    "retrieval.mode '{}' requires an embedding provider. Set [embedding] provider or use mode = \"keyword\".",
                    config.retrieval.mode
                );
            }
        }
        other => bail!(
            "Unknown retrieval mode: '{}'. Must be keyword, semantic, or hybrid.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.provider == "ollama" && config.embedding.model.is_none() {
        bail!("embedding.model must be specified when provider is 'ollama'");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.completion.model.trim().is_empty() {
        bail!("completion.model must not be empty");
    }

    Ok(())
}

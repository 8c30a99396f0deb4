use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding `vectors.bin`, `chunks.json`, and `index_info.json`.
    pub dir: PathBuf,
    /// Directory scanned for source documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.docx".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.pdf".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL for Ollama, or the resource endpoint for Azure OpenAI.
    pub url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,
    #[serde(default = "default_init_retry_delay_secs")]
    pub init_retry_delay_secs: u64,
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_version() -> String {
    "2024-02-15-preview".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_init_attempts() -> u32 {
    3
}
fn default_init_retry_delay_secs() -> u64 {
    2
}

impl EmbeddingConfig {
    /// Providers that call a hosted model and need `model` and `dims`.
    pub fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "azure" | "ollama")
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_version: default_api_version(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            init_attempts: default_init_attempts(),
            init_retry_delay_secs: default_init_retry_delay_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `openai` or `azure`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Model name, or deployment name for Azure.
    #[serde(default = "default_llm_model")]
    pub model: String,
    pub url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

fn default_llm_provider() -> String {
    "azure".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    300
}
fn default_llm_max_retries() -> u32 {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            api_version: default_api_version(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    #[serde(default)]
    pub persist_tool_messages: bool,
    pub system_prompt: Option<String>,
}

fn default_max_tool_rounds() -> usize {
    5
}
fn default_turn_timeout_secs() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            turn_timeout_secs: default_turn_timeout_secs(),
            persist_tool_messages: false,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl Config {
    /// Defaults rooted at `dir`: index in `dir/index`, documents in `dir/data`,
    /// offline hashing embeddings.
    pub fn default_for(dir: &Path) -> Self {
        Self {
            index: IndexConfig {
                dir: dir.join("index"),
                data_dir: dir.join("data"),
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig {
                provider: "hashing".to_string(),
                dims: Some(384),
                ..EmbeddingConfig::default()
            },
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.agent.max_tool_rounds < 1 {
        anyhow::bail!("agent.max_tool_rounds must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "openai" | "azure" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, azure, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_remote() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.provider == "azure" && config.embedding.url.is_none() {
        anyhow::bail!("embedding.url (Azure resource endpoint) is required for provider 'azure'");
    }
    if config.embedding.init_attempts == 0 {
        anyhow::bail!("embedding.init_attempts must be >= 1");
    }

    match config.llm.provider.as_str() {
        "openai" | "azure" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be openai or azure.",
            other
        ),
    }

    Ok(())
}

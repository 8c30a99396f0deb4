//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`HashingEmbedder`]**: deterministic offline bag-of-words vectors.
//! - **[`OpenAIProvider`]**: OpenAI `/v1/embeddings`.
//! - **[`AzureOpenAIProvider`]**: Azure OpenAI deployment embeddings.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: fastembed models run in-process (feature
//!   `local-embeddings-fastembed`).
//!
//! Use [`create_provider`] to pick one from configuration, and
//! [`initialize_embeddings`] to probe it before a build.
//!
//! ```rust,no_run
//! # use sop_agent::config::EmbeddingConfig;
//! # use sop_agent::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::SopError;
use crate::retry::send_json_with_retry;

pub use sop_agent_core::embedding::{
    blob_to_vec, cosine_similarity, embed_query, vec_to_blob, EmbeddingProvider, HashingEmbedder,
};

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = send_json_with_retry("OpenAI API", self.max_retries, || {
            self.client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

// ============ Azure OpenAI Provider ============

/// Embedding provider using an Azure OpenAI embeddings deployment.
///
/// `embedding.url` is the resource endpoint, `embedding.model` the
/// deployment name. Requires `AZURE_OPENAI_API_KEY`.
pub struct AzureOpenAIProvider {
    deployment: String,
    dims: usize,
    endpoint: String,
    api_version: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl AzureOpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let deployment = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model (deployment) required for Azure provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Azure provider"))?;
        let endpoint = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.url required for Azure provider"))?;
        let api_key = std::env::var("AZURE_OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("AZURE_OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            deployment,
            dims,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl EmbeddingProvider for AzureOpenAIProvider {
    fn model_name(&self) -> &str {
        &self.deployment
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.url();
        let body = serde_json::json!({ "input": texts });
        let json = send_json_with_retry("Azure OpenAI API", self.max_retries, || {
            self.client
                .post(&url)
                .header("api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

/// Parse an OpenAI-shaped embeddings response, ordered by `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url);
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = send_json_with_retry("Ollama API", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// In-process embeddings via fastembed.
///
/// Models are downloaded from Hugging Face on first use and cached; after
/// that no network calls are made.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (fastembed_model, default_dims) = match model_name.as_str() {
            "all-minilm-l6-v2" => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
            "nomic-embed-text-v1.5" => (fastembed::EmbeddingModel::NomicEmbedTextV15, 768),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
                other
            ),
        };
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims: config.dims.unwrap_or(default_dims),
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hashing"` | [`HashingEmbedder`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"azure"` | [`AzureOpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (needs `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims.unwrap_or(384))?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "azure" => Ok(Arc::new(AzureOpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Probe the provider by embedding `"test"`, returning the detected
/// dimensionality.
///
/// Makes up to `attempts` attempts with a fixed `delay` between them, then
/// fails with [`SopError::EmbeddingInit`].
pub async fn initialize_embeddings(
    provider: &dyn EmbeddingProvider,
    attempts: u32,
    delay: Duration,
) -> Result<usize> {
    let attempts = attempts.max(1);
    let mut last_message = String::new();

    for attempt in 1..=attempts {
        match embed_query(provider, "test").await {
            Ok(vector) if !vector.is_empty() => {
                tracing::info!(
                    model = provider.model_name(),
                    dims = vector.len(),
                    attempt,
                    "embeddings initialized"
                );
                return Ok(vector.len());
            }
            Ok(_) => last_message = "provider returned an empty vector".to_string(),
            Err(e) => last_message = format!("{:#}", e),
        }

        tracing::warn!(attempt, attempts, error = %last_message, "embedding initialization failed");
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(SopError::EmbeddingInit {
        attempts,
        message: last_message,
    }
    .into())
}

/// Embed `texts` in batches of `batch_size`, preserving order.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = provider.embed(batch).await?;
        if embedded.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            );
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

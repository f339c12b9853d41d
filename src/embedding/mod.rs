//! Text embedding providers.
//!
//! The vector index builder and the retrieval engine see only the
//! [`EmbeddingProvider`] trait. Which backend sits behind it is decided once
//! at startup by [`create_provider`]:
//!
//! | `[embedding] provider` | Backend |
//! |------------------------|---------|
//! | `disabled` | [`DisabledProvider`]: every call fails with a config error |
//! | `openai` | [`OpenAIProvider`]: `POST /v1/embeddings`, needs `OPENAI_API_KEY` |
//! | `ollama` | [`OllamaProvider`]: `POST {url}/api/embed` |
//! | `local` | `LocalProvider`: fastembed models run in-process |
//!
//! ```rust,no_run
//! # use expertise_kb::config::EmbeddingConfig;
//! # use expertise_kb::embedding::create_provider;
//! let provider = create_provider(&EmbeddingConfig::default()).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! Remote providers retry 429, 5xx, and transport failures with exponential
//! backoff (1s doubling, capped at 32s) up to `max_retries` times. Other 4xx
//! responses fail at once.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{require_env, EmbeddingConfig};
use crate::error::{KbError, Service};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Text → fixed-size vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier stored next to each vector.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// Embed a batch, one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| KbError::upstream(Service::Embedding, "empty embedding response").into())
}

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// POST `body` as JSON and decode the JSON reply, retrying transient failures.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    provider: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(retry_delay(attempt)).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(provider, attempt, error = %e, "embedding request failed");
                last_err = Some(KbError::upstream(
                    Service::Embedding,
                    format!("{} unreachable at {}: {}", provider, url, e),
                ));
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let err = KbError::upstream(
            Service::Embedding,
            format!("{} returned {}: {}", provider, status, text),
        );
        if status.as_u16() == 429 || status.is_server_error() {
            warn!(provider, attempt, %status, "embedding request will be retried");
            last_err = Some(err);
            continue;
        }
        return Err(err.into());
    }

    Err(last_err
        .unwrap_or_else(|| KbError::upstream(Service::Embedding, "no attempt was made"))
        .into())
}

fn to_f32(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn required<T: Clone>(value: &Option<T>, key: &str, provider: &str) -> Result<T> {
    value.clone().ok_or_else(|| {
        KbError::Config(format!("embedding.{} required for the {} provider", key, provider)).into()
    })
}

// ============ Disabled ============

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
        Err(KbError::Config(
            "embedding provider is disabled; set [embedding] provider in the config".to_string(),
        )
        .into())
    }
}

// ============ OpenAI ============

pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Fails without `model`, `dims`, or `OPENAI_API_KEY`.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: required(&config.model, "model", "openai")?,
            dims: required(&config.dims, "dims", "openai")?,
            api_key: require_env("OPENAI_API_KEY")?,
            max_retries: config.max_retries,
            client: http_client(config)?,
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
        let body = json!({ "model": self.model, "input": texts });
        let reply = post_with_retry(
            &self.client,
            OPENAI_EMBEDDINGS_URL,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&reply)
    }
}

/// `data[].embedding`, reordered by `data[].index`.
fn parse_openai_response(reply: &Value) -> Result<Vec<Vec<f32>>> {
    let Some(data) = reply.get("data").and_then(Value::as_array) else {
        bail!("OpenAI embedding reply has no data array");
    };

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let Some(values) = item.get("embedding").and_then(Value::as_array) else {
            bail!("OpenAI embedding reply item {} has no embedding", position);
        };
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map_or(position, |i| i as usize);
        indexed.push((index, to_f32(values)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaProvider {
    model: String,
    dims: usize,
    endpoint: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
        Ok(Self {
            model: required(&config.model, "model", "ollama")?,
            dims: required(&config.dims, "dims", "ollama")?,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            max_retries: config.max_retries,
            client: http_client(config)?,
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
        let body = json!({ "model": self.model, "input": texts });
        let reply = post_with_retry(
            &self.client,
            &self.endpoint,
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&reply)
    }
}

fn parse_ollama_response(reply: &Value) -> Result<Vec<Vec<f32>>> {
    let Some(embeddings) = reply.get("embeddings").and_then(Value::as_array) else {
        bail!("Ollama embedding reply has no embeddings array");
    };
    embeddings
        .iter()
        .map(|e| match e.as_array() {
            Some(values) => Ok(to_f32(values)),
            None => bail!("Ollama embedding is not an array"),
        })
        .collect()
}

// ============ Local (fastembed) ============

/// Sentence-transformer inference in-process.
///
/// The model is fetched from Hugging Face on first use, loaded once, and
/// shared across calls; inference runs on the blocking pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

/// Supported local models: config name, fastembed model, dimensionality.
#[cfg(feature = "local-embeddings-fastembed")]
const LOCAL_MODELS: &[(&str, fastembed::EmbeddingModel, usize)] = &[
    ("all-minilm-l6-v2", fastembed::EmbeddingModel::AllMiniLML6V2, 384),
    ("bge-small-en-v1.5", fastembed::EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", fastembed::EmbeddingModel::BGEBaseENV15, 768),
    ("bge-large-en-v1.5", fastembed::EmbeddingModel::BGELargeENV15, 1024),
    ("nomic-embed-text-v1.5", fastembed::EmbeddingModel::NomicEmbedTextV15, 768),
];

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let name = config.model.as_deref().unwrap_or("all-minilm-l6-v2");
        let Some((_, variant, default_dims)) = LOCAL_MODELS.iter().find(|(n, _, _)| *n == name)
        else {
            let known: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _, _)| *n).collect();
            return Err(KbError::Config(format!(
                "unknown local embedding model '{}'; supported: {}",
                name,
                known.join(", ")
            ))
            .into());
        };

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(variant.clone()).with_show_download_progress(false),
        )
        .map_err(|e| {
            KbError::upstream(
                Service::Embedding,
                format!("failed to load local model {}: {}", name, e),
            )
        })?;

        Ok(Self {
            model_name: name.to_string(),
            dims: config.dims.unwrap_or(*default_dims),
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
                .map_err(|e| anyhow::Error::from(KbError::upstream(Service::Embedding, e)))
        })
        .await?
    }
}

pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("the local embedding provider needs the local-embeddings-fastembed feature"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

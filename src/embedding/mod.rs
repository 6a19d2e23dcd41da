//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//! - **[`HashProvider`]**: offline feature-hashing embedder, deterministic across runs.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use gated_context::config::EmbeddingConfig;
//! # use gated_context::embedding::create_provider;
//! # use gated_context_core::embedding::EmbeddingProvider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Only ingestion batches are retried. `embed_query` makes one attempt, so a
//! search surfaces quota and server errors immediately.
//!
//! Every failure surfaces as `GateError::ProviderError`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use gated_context_core::embedding::EmbeddingProvider;
use gated_context_core::error::{GateError, GateResult};

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the provider named by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hash" => Ok(Arc::new(HashProvider::new(config.dims.unwrap_or(256))?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn provider_err(msg: impl Into<String>) -> GateError {
    GateError::ProviderError(msg.into())
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> GateResult<Vec<Vec<f32>>> {
        Err(provider_err(
            "embedding provider is disabled; set [embedding] provider in the config",
        ))
    }
}

// ============ Hash Provider ============

/// Signed feature hashing over lowercase alphanumeric tokens.
///
/// Each token lands in one of `dims` buckets chosen by its SHA-256 digest,
/// with a sign bit from the same digest. The result is L2-normalized, so
/// texts sharing vocabulary score high under cosine similarity. Needs no
/// network and gives identical vectors on every run.
pub struct HashProvider {
    model: String,
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            bail!("hash provider needs dims > 0");
        }
        Ok(Self {
            model: "hash-v1".to_string(),
            dims,
        })
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> GateResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ HTTP retry loop ============

/// POST `body` to `url`, retrying 429/5xx and network errors.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> GateResult<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(key) = bearer {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| provider_err(format!("{} response: {}", label, e)));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = provider_err(format!("{} API error {}: {}", label, status, body_text));

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(provider_err(format!(
                    "{} connection error ({}): {}",
                    label, url, e
                )));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| provider_err(format!("{} embedding failed after retries", label))))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn json_vector(value: &serde_json::Value, what: &str) -> GateResult<Vec<f32>> {
    let arr = value
        .as_array()
        .ok_or_else(|| provider_err(format!("invalid {}: embedding is not an array", what)))?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| provider_err(format!("invalid {}: non-numeric component", what)))
        })
        .collect()
}

fn first_vector(mut vectors: Vec<Vec<f32>>) -> GateResult<Vec<f32>> {
    vectors
        .pop()
        .ok_or_else(|| provider_err("empty embedding response"))
}

fn check_shape(vectors: &[Vec<f32>], expected: usize, dims: usize) -> GateResult<()> {
    if vectors.len() != expected {
        return Err(provider_err(format!(
            "expected {} embeddings, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        return Err(provider_err(format!(
            "expected {} dimensions, got {}",
            dims,
            v.len()
        )));
    }
    Ok(())
}

// ============ OpenAI Provider ============

/// Calls `POST {url}/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
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
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

impl OpenAIProvider {
    async fn request(&self, texts: &[String], max_retries: u32) -> GateResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_with_retry(
            &self.client,
            &format!("{}/embeddings", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            max_retries,
            "OpenAI",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
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
    async fn embed_batch(&self, texts: &[String]) -> GateResult<Vec<Vec<f32>>> {
        self.request(texts, self.max_retries).await
    }
    async fn embed_query(&self, text: &str) -> GateResult<Vec<f32>> {
        first_vector(self.request(&[text.to_string()], 0).await?)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> GateResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| provider_err("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| provider_err("invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_vector(embedding, "OpenAI response")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Calls `POST {url}/api/embed` on a running Ollama instance.
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

        Ok(Self {
            model,
            dims,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

impl OllamaProvider {
    async fn request(&self, texts: &[String], max_retries: u32) -> GateResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url.trim_end_matches('/')),
            None,
            &body,
            max_retries,
            "Ollama",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
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
    async fn embed_batch(&self, texts: &[String]) -> GateResult<Vec<Vec<f32>>> {
        self.request(texts, self.max_retries).await
    }
    async fn embed_query(&self, text: &str) -> GateResult<Vec<f32>> {
        first_vector(self.request(&[text.to_string()], 0).await?)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> GateResult<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| provider_err("invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| json_vector(e, "Ollama response"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gated_context_core::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_hash_provider_is_deterministic() {
        let p = HashProvider::new(64).unwrap();
        let texts = vec!["Quarterly budget review".to_string()];
        let a = p.embed_batch(&texts).await.unwrap();
        let b = p.embed_batch(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[test]
    fn test_hash_provider_shared_vocabulary_scores_higher() {
        let p = HashProvider::new(256).unwrap();
        let q = p.embed_one("budget forecast");
        let near = p.embed_one("the budget forecast for next quarter");
        let far = p.embed_one("kubernetes deployment notes");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_hash_provider_rejects_zero_dims() {
        assert!(HashProvider::new(0).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let err = DisabledProvider
            .embed("anything")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ProviderError(_)));
    }

    #[test]
    fn test_create_provider_by_name() {
        let config = EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(32),
            ..Default::default()
        };
        let p = create_provider(&config).unwrap();
        assert_eq!(p.dims(), 32);
        assert_eq!(p.model_name(), "hash-v1");

        let config = EmbeddingConfig {
            provider: "nope".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.5]] });
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.5]]);

        let bad = serde_json::json!({ "embeddings": [["x"]] });
        assert!(parse_ollama_response(&bad).is_err());
    }

    /// Serves `/api/embed` with 429 on every call, counting the calls.
    async fn rate_limited_ollama() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use axum::{http::StatusCode, routing::post, Router};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/api/embed",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::TOO_MANY_REQUESTS, "quota exceeded")
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, calls)
    }

    fn ollama_at(url: &str) -> OllamaProvider {
        OllamaProvider::new(&EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(4),
            url: Some(url.to_string()),
            max_retries: 5,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_query_embedding_is_not_retried() {
        use std::sync::atomic::Ordering;

        let (url, calls) = rate_limited_ollama().await;
        let provider = ollama_at(&url);

        let started = std::time::Instant::now();
        let err = provider.embed_query("budget").await.unwrap_err();
        assert!(matches!(err, GateError::ProviderError(_)), "{:?}", err);
        assert!(err.to_string().contains("429"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_shape_mismatch_is_provider_error() {
        let err = check_shape(&[vec![1.0]], 1, 4).unwrap_err();
        assert!(matches!(err, GateError::ProviderError(_)));
    }
}

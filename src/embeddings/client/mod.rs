
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::http::{HttpClient, join_url};

/// Text to fixed-dimension vector. Implementations block on the network.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this embedder returns
    fn dimensions(&self) -> usize;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    dimensions: u32,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: u32,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    #[inline]
    pub fn new(config: &Config) -> Self {
        let http = HttpClient::new(config.http.timeout())
            .with_retry_attempts(config.http.retry_attempts)
            .with_bearer_token(&config.embedding.api_key);

        Self {
            base_url: config.embedding.base_url.clone(),
            model: config.embedding.model.clone(),
            dimensions: config.embedding.dimensions,
            http,
        }
    }

    #[inline]
    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate the embedding for a single text input
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!(
            "Generating embedding for text (length: {})",
            text.chars().count()
        );

        let request = EmbedRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimensions,
        };
        let url = join_url(&self.base_url, "embeddings");

        let response_text = self
            .http
            .post_json(&url, &request)
            .context("Failed to generate embedding")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .unwrap_or_default();

        if embedding.is_empty() {
            return Err(anyhow!("Embedding service returned an empty vector"));
        }

        if embedding.len() != self.dimensions as usize {
            return Err(anyhow!(
                "Embedding has {} dimensions, expected {}",
                embedding.len(),
                self.dimensions
            ));
        }

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }
}

impl Embedder for EmbeddingClient {
    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.generate_embedding(text)
    }

    #[inline]
    fn dimensions(&self) -> usize {
        self.dimensions as usize
    }
}

/// Cosine similarity of two vectors; 0.0 when either is zero or lengths differ.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

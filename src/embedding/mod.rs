//! Embedding collaborators used for similarity ranking.
//!
//! [`HttpEmbeddingClient`] talks to an OpenAI-compatible `/v1/embeddings` endpoint. It
//! sends one batched request per call until the endpoint proves it cannot handle list
//! input, at which point the shared [`TransportBreaker`] opens and every later call, from
//! any request, uses one HTTP request per text.

mod breaker;

pub use breaker::{BreakerState, TransportBreaker};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::Config;

/// Errors raised by embedding providers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one vector per input text, in input order.
    ///
    /// Items the provider fails on come back as zero vectors; an error means the batch as a
    /// whole is unusable.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Embedding client for OpenAI-compatible HTTP endpoints.
pub struct HttpEmbeddingClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    breaker: Arc<TransportBreaker>,
}

impl HttpEmbeddingClient {
    /// Build a client for `base_url` with a per-request timeout, sharing `breaker` with
    /// other clients.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
        breaker: Arc<TransportBreaker>,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("rusty-review/embedding")
            .timeout(timeout)
            .build()
            .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: embeddings_endpoint(base_url),
            api_key,
            model: model.into(),
            dimension,
            breaker,
        })
    }

    /// Build a client from configuration, or `None` when no endpoint is configured.
    pub fn from_config(
        config: &Config,
        breaker: Arc<TransportBreaker>,
    ) -> Result<Option<Self>, EmbeddingClientError> {
        config
            .embedding_api_endpoint
            .as_deref()
            .map(|base_url| {
                Self::new(
                    base_url,
                    config.embedding_api_key.clone(),
                    config.embedding_model.clone(),
                    config.embedding_dimension,
                    config.embedding_request_timeout,
                    breaker,
                )
            })
            .transpose()
    }

    async fn post(&self, input: serde_json::Value) -> Result<reqwest::Response, String> {
        let mut request = self.http.post(&self.endpoint).json(&json!({
            "model": self.model,
            "input": input,
            "encoding_format": "float",
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        request.send().await.map_err(|error| error.to_string())
    }

    async fn embed_batch(&self, texts: &[String]) -> BatchOutcome {
        let response = match self.post(json!(texts)).await {
            Ok(response) => response,
            Err(error) => return BatchOutcome::Unavailable(error),
        };

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return BatchOutcome::Rejected(format!("batch input rejected with {status}: {body}"));
        }
        if !status.is_success() {
            return BatchOutcome::Unavailable(format!("embedding endpoint returned {status}"));
        }

        match response.json::<EmbeddingResponse>().await {
            Ok(body) if body.data.len() == texts.len() => {
                BatchOutcome::Embedded(body.into_ordered_vectors())
            }
            Ok(body) => BatchOutcome::Rejected(format!(
                "batch returned {} vectors for {} inputs",
                body.data.len(),
                texts.len()
            )),
            Err(error) => BatchOutcome::Unavailable(format!("failed to decode embeddings: {error}")),
        }
    }

    async fn try_embed_one(&self, text: &str) -> Result<Vec<f32>, String> {
        let response = self.post(json!(text)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("embedding endpoint returned {status}"));
        }
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| format!("failed to decode embeddings: {error}"))?;
        body.into_ordered_vectors()
            .into_iter()
            .next()
            .ok_or_else(|| "empty embedding response".to_string())
    }

    async fn embed_one(&self, text: &str) -> Vec<f32> {
        match self.try_embed_one(text).await {
            Ok(vector) => vector,
            Err(error) => {
                tracing::warn!(error = %error, "Embedding failed; using zero vector");
                vec![0.0; self.dimension]
            }
        }
    }

    async fn embed_each(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await);
        }
        vectors
    }
}

enum BatchOutcome {
    Embedded(Vec<Vec<f32>>),
    Rejected(String),
    Unavailable(String),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_ordered_vectors(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|item| item.index);
        self.data.into_iter().map(|item| item.embedding).collect()
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".into(),
            ));
        }

        // Blank inputs never reach the provider.
        let pending: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(index, text)| (index, text.clone()))
            .collect();
        let inputs: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();

        let embedded = if inputs.is_empty() {
            Vec::new()
        } else if self.breaker.is_open() {
            self.embed_each(&inputs).await
        } else {
            match self.embed_batch(&inputs).await {
                BatchOutcome::Embedded(vectors) => vectors,
                BatchOutcome::Rejected(reason) => {
                    if self.breaker.trip(&reason) {
                        tracing::warn!(reason = %reason, "Embedding batch transport disabled");
                    }
                    self.embed_each(&inputs).await
                }
                BatchOutcome::Unavailable(reason) => {
                    tracing::warn!(reason = %reason, "Embedding batch failed; retrying per item");
                    self.embed_each(&inputs).await
                }
            }
        };

        let mut vectors = vec![vec![0.0; self.dimension]; texts.len()];
        for ((index, _), vector) in pending.into_iter().zip(embedded) {
            vectors[index] = vector;
        }

        tracing::debug!(
            count = texts.len(),
            transport = self.breaker.state().as_str(),
            "Generated embeddings"
        );
        Ok(vectors)
    }
}

fn embeddings_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/embeddings")
    } else {
        format!("{base}/v1/embeddings")
    }
}

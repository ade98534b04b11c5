use std::sync::Arc;

use thiserror::Error;

use super::orchestrator::{PipelineSettings, ReviewEvents, ReviewPipeline};
use super::source::{DocumentExtractor, PdfTextExtractor};
use super::types::ReviewRequest;
use crate::config::Config;
use crate::embedding::{
    EmbeddingClient, EmbeddingClientError, HttpEmbeddingClient, TransportBreaker,
};
use crate::inference::{InferenceClient, InferenceError, OpenAiCompatibleClient};
use crate::metrics::{MetricsSnapshot, ReviewMetrics};
use crate::retrieval::{RetrievalSettings, Retriever};
use crate::search::{OpenAlexClient, RecordSearch, SearchError, SemanticScholarClient};

/// Errors raised while wiring the service from configuration.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The inference client could not be built.
    #[error("Failed to initialize inference client: {0}")]
    Inference(#[from] InferenceError),
    /// The embedding client could not be built.
    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// A record-search client could not be built.
    #[error("Failed to initialize search client: {0}")]
    Search(#[from] SearchError),
}

/// External collaborators a review depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Text inference provider.
    pub inference: Arc<dyn InferenceClient>,
    /// Embedding provider; `None` disables similarity scoring.
    pub embedding: Option<Arc<dyn EmbeddingClient>>,
    /// Document text extractor.
    pub extractor: Arc<dyn DocumentExtractor>,
    /// Related-record retriever.
    pub retriever: Arc<Retriever>,
    /// Embedding transport latch, reported by metrics.
    pub breaker: Arc<TransportBreaker>,
}

/// Operations exposed to the HTTP surface.
pub trait ReviewApi: Send + Sync {
    /// Start a review and return its event stream.
    fn start_review(&self, request: ReviewRequest) -> ReviewEvents;

    /// Current counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Review entry point shared by every request.
///
/// Construct once at startup and share through an `Arc`; the collaborators are stateless
/// apart from the embedding transport breaker.
pub struct ReviewService {
    pipeline: Arc<ReviewPipeline>,
    metrics: Arc<ReviewMetrics>,
    breaker: Arc<TransportBreaker>,
}

impl ReviewService {
    /// Build the service with the bundled HTTP adapters.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let breaker = Arc::new(TransportBreaker::new());

        let inference: Arc<dyn InferenceClient> =
            Arc::new(OpenAiCompatibleClient::from_config(config)?);
        let embedding: Option<Arc<dyn EmbeddingClient>> =
            HttpEmbeddingClient::from_config(config, breaker.clone())?
                .map(|client| Arc::new(client) as Arc<dyn EmbeddingClient>);
        if embedding.is_none() {
            tracing::info!("No embedding endpoint configured; similarity ranking disabled");
        }

        let primary: Arc<dyn RecordSearch> = Arc::new(SemanticScholarClient::new(
            config.primary_search_url.clone(),
            config.primary_search_api_key.clone(),
            config.search_request_timeout,
        )?);
        let secondary: Arc<dyn RecordSearch> = Arc::new(OpenAlexClient::new(
            config.secondary_search_url.clone(),
            config.secondary_search_mailto.clone(),
            config.search_request_timeout,
        )?);
        let retriever = Arc::new(Retriever::new(
            primary,
            Some(secondary),
            embedding.clone(),
            RetrievalSettings::from_config(config),
        ));

        let collaborators = Collaborators {
            inference,
            embedding,
            extractor: Arc::new(PdfTextExtractor),
            retriever,
            breaker,
        };
        Ok(Self::with_collaborators(
            collaborators,
            PipelineSettings::from_config(config),
        ))
    }

    /// Build the service around caller-supplied collaborators.
    pub fn with_collaborators(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        let metrics = Arc::new(ReviewMetrics::new());
        let breaker = collaborators.breaker.clone();
        let pipeline = Arc::new(ReviewPipeline::new(collaborators, settings, metrics.clone()));
        Self {
            pipeline,
            metrics,
            breaker,
        }
    }
}

impl ReviewApi for ReviewService {
    fn start_review(&self, request: ReviewRequest) -> ReviewEvents {
        self.pipeline.start(request)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.breaker)
    }
}

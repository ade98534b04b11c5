//! Record-search providers used to find related literature.
//!
//! The primary provider (Semantic Scholar) supports recency, citation and relevance
//! ordering. The secondary provider (OpenAlex) is only consulted when a primary branch
//! fails over.

mod openalex;
mod semantic_scholar;

pub use openalex::OpenAlexClient;
pub use semantic_scholar::SemanticScholarClient;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by record-search providers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// Provider answered HTTP 429.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Request exceeded its timeout.
    #[error("search timed out: {0}")]
    Timeout(String),
    /// Network failure or unexpected status.
    #[error("search transport failure: {0}")]
    Transport(String),
    /// Provider answered with an unreadable payload.
    #[error("malformed search response: {0}")]
    MalformedResponse(String),
}

impl SearchError {
    /// Whether retrying the same provider is pointless.
    pub fn requires_failover(&self) -> bool {
        matches!(self, SearchError::RateLimited(_) | SearchError::Timeout(_))
    }

    pub(crate) fn from_reqwest(provider: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SearchError::Timeout(format!("{provider}: {error}"))
        } else {
            SearchError::Transport(format!("{provider}: {error}"))
        }
    }

    pub(crate) fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            SearchError::RateLimited(format!("{provider} returned {status}"))
        } else {
            SearchError::Transport(format!("{provider} returned {status}: {body}"))
        }
    }
}

/// Ordering requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// Newest first.
    Recency,
    /// Most cited first.
    Citations,
    /// Best textual match first.
    Relevance,
}

impl SortOrder {
    /// Fan-out order of the retrieval branches.
    pub const BRANCHES: [SortOrder; 3] = [SortOrder::Recency, SortOrder::Citations, SortOrder::Relevance];

    /// Closest ordering the secondary provider supports.
    pub const fn secondary_equivalent(self) -> SortOrder {
        match self {
            SortOrder::Recency => SortOrder::Recency,
            SortOrder::Citations | SortOrder::Relevance => SortOrder::Citations,
        }
    }

    /// Stable name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            SortOrder::Recency => "recency",
            SortOrder::Citations => "citations",
            SortOrder::Relevance => "relevance",
        }
    }
}

/// External record related to the reviewed document.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedRecord {
    /// Provider identifier, when one was returned.
    pub id: Option<String>,
    /// Record title.
    pub title: String,
    /// Record abstract, when available.
    pub abstract_text: Option<String>,
}

impl RelatedRecord {
    /// Build a record, dropping blank identifiers and abstracts.
    pub fn new(id: Option<String>, title: impl Into<String>, abstract_text: Option<String>) -> Self {
        Self {
            id: id.filter(|value| !value.trim().is_empty()),
            title: title.into().trim().to_string(),
            abstract_text: abstract_text.filter(|value| !value.trim().is_empty()),
        }
    }

    /// Identity used for deduplication: the identifier, else the case-folded title.
    pub fn dedup_key(&self) -> String {
        match &self.id {
            Some(id) => format!("id:{id}"),
            None => format!("title:{}", self.title.trim().to_lowercase()),
        }
    }

    /// Text embedded for similarity ranking.
    pub fn embedding_text(&self) -> String {
        match &self.abstract_text {
            Some(text) => format!("{} {}", self.title, text),
            None => self.title.clone(),
        }
    }
}

/// Interface implemented by record-search providers.
#[async_trait]
pub trait RecordSearch: Send + Sync {
    /// Provider name used in logs.
    fn name(&self) -> &'static str;

    /// Search for at most `page_size` records matching `query` in the given order.
    async fn search(
        &self,
        query: &str,
        order: SortOrder,
        page_size: usize,
    ) -> Result<Vec<RelatedRecord>, SearchError>;
}

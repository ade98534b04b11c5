//! Multi-source related-record retrieval.
//!
//! A retrieval fans out three searches against the primary provider, one per
//! [`SortOrder`]. Each branch retries with capped exponential backoff, fails over to the
//! secondary provider when the primary rate-limits, times out or runs out of attempts, and
//! is bounded by its own timeout. Branch results are fused in branch order and re-ranked by
//! embedding similarity to the query.

pub mod fusion;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::search::{RecordSearch, RelatedRecord, SortOrder};

/// Limits applied to one retrieval.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    /// Page size requested from each branch.
    pub per_branch: usize,
    /// Number of records returned after re-ranking.
    pub max_results: usize,
    /// Attempts against the primary provider per branch.
    pub max_attempts: u32,
    /// Base delay between primary attempts.
    pub backoff_base: Duration,
    /// Upper bound of the delay between primary attempts.
    pub backoff_cap: Duration,
    /// Budget of a whole branch, failover included.
    pub branch_timeout: Duration,
    /// Budget of the embedding re-rank; on expiry the fused order is kept.
    pub rerank_timeout: Duration,
}

impl RetrievalSettings {
    /// Settings taken from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            per_branch: config.max_candidates_per_branch,
            max_results: config.max_fused_candidates,
            max_attempts: config.search_max_attempts.max(1),
            backoff_base: config.search_backoff_base,
            backoff_cap: config.search_backoff_cap,
            branch_timeout: config.branch_timeout,
            rerank_timeout: config.embedding_request_timeout,
        }
    }

    /// Delay after the zero-based `attempt`: `min(base * 2^attempt, cap)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_cap, |delay| delay.min(self.backoff_cap))
    }
}

/// Related-record retriever over a primary and an optional secondary provider.
pub struct Retriever {
    primary: Arc<dyn RecordSearch>,
    secondary: Option<Arc<dyn RecordSearch>>,
    embedding: Option<Arc<dyn EmbeddingClient>>,
    settings: RetrievalSettings,
}

impl Retriever {
    /// Assemble a retriever from its collaborators.
    pub fn new(
        primary: Arc<dyn RecordSearch>,
        secondary: Option<Arc<dyn RecordSearch>>,
        embedding: Option<Arc<dyn EmbeddingClient>>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            primary,
            secondary,
            embedding,
            settings,
        }
    }

    /// Find records related to `query`, most similar first.
    ///
    /// Never fails: unusable branches contribute nothing.
    pub async fn retrieve(&self, query: &str) -> Vec<RelatedRecord> {
        let [recency, citations, relevance] = SortOrder::BRANCHES;
        let (first, second, third) = tokio::join!(
            self.run_branch(query, recency),
            self.run_branch(query, citations),
            self.run_branch(query, relevance),
        );

        let fused = fusion::fuse([first, second, third]);
        tracing::info!(candidates = fused.len(), "Fused related records");

        let mut ranked = self.rerank(query, fused).await;
        ranked.truncate(self.settings.max_results);
        ranked
    }

    async fn run_branch(&self, query: &str, order: SortOrder) -> Vec<RelatedRecord> {
        let branch = async {
            match self.search_primary(query, order).await {
                Some(records) => records,
                None => self.failover(query, order).await,
            }
        };

        match tokio::time::timeout(self.settings.branch_timeout, branch).await {
            Ok(records) => {
                tracing::debug!(order = order.as_str(), count = records.len(), "Branch finished");
                records
            }
            Err(_) => {
                tracing::warn!(
                    order = order.as_str(),
                    timeout_secs = self.settings.branch_timeout.as_secs(),
                    "Retrieval branch timed out"
                );
                Vec::new()
            }
        }
    }

    /// Primary attempts; `None` means the branch should fail over.
    async fn search_primary(&self, query: &str, order: SortOrder) -> Option<Vec<RelatedRecord>> {
        for attempt in 0..self.settings.max_attempts {
            match self
                .primary
                .search(query, order, self.settings.per_branch)
                .await
            {
                Ok(records) if !records.is_empty() => return Some(records),
                Ok(_) => {
                    tracing::debug!(order = order.as_str(), attempt, "Primary search returned nothing");
                }
                Err(error) if error.requires_failover() => {
                    tracing::warn!(
                        provider = self.primary.name(),
                        order = order.as_str(),
                        error = %error,
                        "Primary search unavailable; failing over"
                    );
                    return None;
                }
                Err(error) => {
                    tracing::warn!(
                        provider = self.primary.name(),
                        order = order.as_str(),
                        attempt,
                        error = %error,
                        "Primary search failed"
                    );
                }
            }

            if attempt + 1 < self.settings.max_attempts {
                tokio::time::sleep(self.settings.backoff(attempt)).await;
            }
        }
        None
    }

    async fn failover(&self, query: &str, order: SortOrder) -> Vec<RelatedRecord> {
        let Some(secondary) = &self.secondary else {
            return Vec::new();
        };

        let mapped = order.secondary_equivalent();
        match secondary.search(query, mapped, self.settings.per_branch).await {
            Ok(records) => {
                tracing::info!(
                    provider = secondary.name(),
                    order = order.as_str(),
                    mapped = mapped.as_str(),
                    count = records.len(),
                    "Secondary search answered"
                );
                records
            }
            Err(error) => {
                tracing::warn!(
                    provider = secondary.name(),
                    order = order.as_str(),
                    error = %error,
                    "Secondary search failed"
                );
                Vec::new()
            }
        }
    }

    async fn rerank(&self, query: &str, candidates: Vec<RelatedRecord>) -> Vec<RelatedRecord> {
        let Some(embedding) = &self.embedding else {
            return candidates;
        };
        if candidates.len() < 2 {
            return candidates;
        }

        let scoring = similarity_scores(embedding.as_ref(), query, &candidates);
        match tokio::time::timeout(self.settings.rerank_timeout, scoring).await {
            Ok(Ok((query_vector, vectors))) => {
                fusion::rank_by_similarity(candidates, &query_vector, &vectors)
                    .into_iter()
                    .map(|(record, _)| record)
                    .collect()
            }
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "Re-ranking unavailable; keeping fused order");
                candidates
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.rerank_timeout.as_secs(),
                    "Re-ranking timed out; keeping fused order"
                );
                candidates
            }
        }
    }
}

/// Embed `text` and every record, returning the text vector and the record vectors.
async fn similarity_scores(
    embedding: &dyn EmbeddingClient,
    text: &str,
    records: &[RelatedRecord],
) -> Result<(Vec<f32>, Vec<Vec<f32>>), EmbeddingClientError> {
    let inputs: Vec<String> = std::iter::once(text.to_string())
        .chain(records.iter().map(RelatedRecord::embedding_text))
        .collect();

    let mut vectors = embedding.embed(inputs).await?;
    if vectors.len() != records.len() + 1 {
        return Err(EmbeddingClientError::GenerationFailed(format!(
            "expected {} vectors, received {}",
            records.len() + 1,
            vectors.len()
        )));
    }
    let query_vector = vectors.remove(0);
    Ok((query_vector, vectors))
}

/// Score each record against `text`, most similar first.
pub async fn score_records(
    embedding: &dyn EmbeddingClient,
    text: &str,
    records: Vec<RelatedRecord>,
) -> Result<Vec<(RelatedRecord, f32)>, EmbeddingClientError> {
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let (query_vector, vectors) = similarity_scores(embedding, text, &records).await?;
    Ok(fusion::rank_by_similarity(records, &query_vector, &vectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Reply {
        Records(Vec<RelatedRecord>),
        Error(SearchError),
        Stall,
    }

    struct StubSearch {
        name: &'static str,
        replies: Mutex<HashMap<SortOrder, Vec<Reply>>>,
        calls: Mutex<Vec<SortOrder>>,
    }

    impl StubSearch {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                replies: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn reply(self, order: SortOrder, replies: Vec<Reply>) -> Self {
            self.replies.lock().expect("lock").insert(order, replies);
            self
        }

        fn calls(&self) -> Vec<SortOrder> {
            self.calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl RecordSearch for StubSearch {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn search(
            &self,
            _query: &str,
            order: SortOrder,
            _page_size: usize,
        ) -> Result<Vec<RelatedRecord>, SearchError> {
            self.calls.lock().expect("lock").push(order);
            let reply = {
                let mut replies = self.replies.lock().expect("lock");
                match replies.get_mut(&order) {
                    Some(queue) if queue.len() > 1 => queue.remove(0),
                    Some(queue) => queue.first().cloned().unwrap_or(Reply::Records(Vec::new())),
                    None => Reply::Records(Vec::new()),
                }
            };
            match reply {
                Reply::Records(records) => Ok(records),
                Reply::Error(error) => Err(error),
                Reply::Stall => {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    struct StubEmbedding(Result<Vec<Vec<f32>>, EmbeddingClientError>);

    #[async_trait]
    impl EmbeddingClient for StubEmbedding {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.0.clone()
        }
    }

    struct StalledEmbedding;

    #[async_trait]
    impl EmbeddingClient for StalledEmbedding {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            tokio::time::sleep(Duration::from_secs(100_000)).await;
            Ok(Vec::new())
        }
    }

    fn record(id: &str) -> RelatedRecord {
        RelatedRecord::new(Some(id.to_string()), id.to_uppercase(), None)
    }

    fn settings() -> RetrievalSettings {
        RetrievalSettings {
            per_branch: 5,
            max_results: 10,
            max_attempts: 2,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(5),
            branch_timeout: Duration::from_secs(120),
            rerank_timeout: Duration::from_secs(30),
        }
    }

    fn ids(records: &[RelatedRecord]) -> Vec<&str> {
        records
            .iter()
            .map(|record| record.id.as_deref().unwrap_or_default())
            .collect()
    }

    fn rate_limited() -> Reply {
        Reply::Error(SearchError::RateLimited("429".into()))
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let settings = settings();
        assert_eq!(settings.backoff(0), Duration::from_secs(1));
        assert_eq!(settings.backoff(1), Duration::from_secs(2));
        assert_eq!(settings.backoff(2), Duration::from_secs(4));
        assert_eq!(settings.backoff(3), Duration::from_secs(5));
        assert_eq!(settings.backoff(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn branches_fuse_in_submission_order_without_duplicates() {
        let primary = StubSearch::new("primary")
            .reply(SortOrder::Recency, vec![Reply::Records(vec![record("a"), record("b")])])
            .reply(SortOrder::Citations, vec![Reply::Records(vec![record("b"), record("c")])])
            .reply(SortOrder::Relevance, vec![Reply::Records(vec![record("d"), record("a")])]);
        let retriever = Retriever::new(Arc::new(primary), None, None, settings());

        let records = retriever.retrieve("graphs").await;

        assert_eq!(ids(&records), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_primary_fails_over_on_every_branch() {
        let primary = Arc::new(
            StubSearch::new("primary")
                .reply(SortOrder::Recency, vec![rate_limited()])
                .reply(SortOrder::Citations, vec![rate_limited()])
                .reply(SortOrder::Relevance, vec![rate_limited()]),
        );
        let secondary = Arc::new(
            StubSearch::new("secondary")
                .reply(SortOrder::Recency, vec![Reply::Records(vec![record("w1")])])
                .reply(SortOrder::Citations, vec![Reply::Records(vec![record("w2"), record("w1")])]),
        );
        let retriever = Retriever::new(primary.clone(), Some(secondary.clone()), None, settings());

        let records = retriever.retrieve("graphs").await;

        assert_eq!(primary.calls().len(), 3, "rate limits are not retried");
        let mut secondary_calls = secondary.calls();
        secondary_calls.sort_by_key(|order| order.as_str());
        assert_eq!(
            secondary_calls,
            vec![SortOrder::Citations, SortOrder::Citations, SortOrder::Recency]
        );
        assert_eq!(ids(&records), vec!["w1", "w2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_before_failover() {
        let primary = Arc::new(
            StubSearch::new("primary")
                .reply(
                    SortOrder::Recency,
                    vec![
                        Reply::Error(SearchError::Transport("reset".into())),
                        Reply::Records(vec![record("a")]),
                    ],
                )
                .reply(SortOrder::Citations, vec![Reply::Records(Vec::new())])
                .reply(SortOrder::Relevance, vec![Reply::Records(vec![record("b")])]),
        );
        let secondary = Arc::new(
            StubSearch::new("secondary")
                .reply(SortOrder::Citations, vec![Reply::Records(vec![record("c")])]),
        );
        let retriever = Retriever::new(primary.clone(), Some(secondary.clone()), None, settings());

        let records = retriever.retrieve("graphs").await;

        let calls = primary.calls();
        assert_eq!(calls.iter().filter(|o| **o == SortOrder::Recency).count(), 2);
        assert_eq!(calls.iter().filter(|o| **o == SortOrder::Citations).count(), 2);
        assert_eq!(secondary.calls(), vec![SortOrder::Citations]);
        assert_eq!(ids(&records), vec!["a", "c", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_branch_is_empty_without_failing_the_fan_out() {
        let primary = StubSearch::new("primary")
            .reply(SortOrder::Recency, vec![Reply::Stall])
            .reply(SortOrder::Citations, vec![Reply::Records(vec![record("c")])])
            .reply(SortOrder::Relevance, vec![Reply::Records(vec![record("r")])]);
        let retriever = Retriever::new(Arc::new(primary), None, None, settings());

        let records = retriever.retrieve("graphs").await;

        assert_eq!(ids(&records), vec!["c", "r"]);
    }

    #[tokio::test(start_paused = true)]
    async fn embeddings_reorder_candidates() {
        let primary = StubSearch::new("primary")
            .reply(SortOrder::Recency, vec![Reply::Records(vec![record("far"), record("near")])]);
        let embedding = StubEmbedding(Ok(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.1]]));
        let retriever = Retriever::new(
            Arc::new(primary),
            None,
            Some(Arc::new(embedding)),
            RetrievalSettings {
                max_attempts: 1,
                ..settings()
            },
        );

        let records = retriever.retrieve("graphs").await;

        assert_eq!(ids(&records), vec!["near", "far"]);
    }

    #[tokio::test(start_paused = true)]
    async fn embedding_failure_keeps_fused_order() {
        let primary = StubSearch::new("primary")
            .reply(SortOrder::Recency, vec![Reply::Records(vec![record("x"), record("y"), record("z")])]);
        let embedding = StubEmbedding(Err(EmbeddingClientError::GenerationFailed("down".into())));
        let retriever = Retriever::new(
            Arc::new(primary),
            None,
            Some(Arc::new(embedding)),
            RetrievalSettings {
                max_attempts: 1,
                ..settings()
            },
        );

        let records = retriever.retrieve("graphs").await;

        assert_eq!(ids(&records), vec!["x", "y", "z"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_embedding_keeps_fused_order_within_rerank_budget() {
        let primary = StubSearch::new("primary")
            .reply(SortOrder::Recency, vec![Reply::Records(vec![record("x"), record("y")])])
            .reply(SortOrder::Citations, vec![Reply::Records(vec![record("z")])]);
        let retriever = Retriever::new(
            Arc::new(primary),
            None,
            Some(Arc::new(StalledEmbedding)),
            RetrievalSettings {
                max_attempts: 1,
                ..settings()
            },
        );

        let started = tokio::time::Instant::now();
        let records = retriever.retrieve("graphs").await;

        assert_eq!(ids(&records), vec!["x", "y", "z"]);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_capped_after_ranking() {
        let many: Vec<RelatedRecord> = (0..8).map(|index| record(&format!("r{index}"))).collect();
        let primary = StubSearch::new("primary").reply(SortOrder::Recency, vec![Reply::Records(many)]);
        let retriever = Retriever::new(
            Arc::new(primary),
            None,
            None,
            RetrievalSettings {
                max_results: 3,
                max_attempts: 1,
                ..settings()
            },
        );

        let records = retriever.retrieve("graphs").await;

        assert_eq!(ids(&records), vec!["r0", "r1", "r2"]);
    }

    #[tokio::test]
    async fn records_are_scored_against_the_document() {
        let embedding = StubEmbedding(Ok(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]));
        let scored = score_records(&embedding, "document", vec![record("a"), record("b")])
            .await
            .expect("scores");

        assert_eq!(scored[0].0.id.as_deref(), Some("b"));
        assert!((scored[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(scored[1].1, 0.0);
    }
}

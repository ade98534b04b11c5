use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;

use super::*;
use crate::embedding::{EmbeddingClient, EmbeddingClientError, TransportBreaker};
use crate::inference::{InferenceClient, InferenceError, InferenceRequest, InferenceTask};
use crate::retrieval::{RetrievalSettings, Retriever};
use crate::search::{RecordSearch, RelatedRecord, SearchError, SortOrder};

const PARSED: &str = "Title: Efficient Graph Search\n\
Abstract: We prune graph search with learned bounds.\n\
Keywords: graph search, pruning\n\
Methodology: Bound estimation followed by best-first expansion.\n\
Results: Twice as fast on road networks.";

const DOCUMENT_TEXT: &str = "Efficient Graph Search\n\
We prune graph search with learned bounds and evaluate the approach on road networks, \
social graphs and synthetic grids, reporting consistent speedups over strong baselines.";

type Script = (Duration, Result<String, InferenceError>);

struct StubInference {
    scripts: HashMap<InferenceTask, Script>,
    calls: Mutex<Vec<InferenceTask>>,
}

impl StubInference {
    fn answering() -> Self {
        let scripts = [
            (InferenceTask::ParseDocument, PARSED),
            (InferenceTask::KeyTerms, "graph search, learned bounds"),
            (InferenceTask::Innovation, "The bound learner is new."),
            (InferenceTask::Evaluation, "Soundness: 8/10"),
            (InferenceTask::Report, "# Review\nAccept with minor revisions."),
        ]
        .into_iter()
        .map(|(task, answer)| (task, (Duration::ZERO, Ok(answer.to_string()))))
        .collect();
        Self {
            scripts,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(mut self, task: InferenceTask, delay: Duration, result: Result<&str, InferenceError>) -> Self {
        self.scripts
            .insert(task, (delay, result.map(str::to_string)));
        self
    }

    fn calls(&self) -> Vec<InferenceTask> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl InferenceClient for StubInference {
    async fn complete(&self, request: InferenceRequest) -> Result<String, InferenceError> {
        self.calls.lock().expect("lock").push(request.task);
        let (delay, result) = self
            .scripts
            .get(&request.task)
            .cloned()
            .unwrap_or((Duration::ZERO, Ok(String::new())));
        tokio::time::sleep(delay).await;
        result
    }
}

#[derive(Default)]
struct StubExtractor {
    unreadable: bool,
    calls: AtomicUsize,
}

impl StubExtractor {
    fn unreadable() -> Self {
        Self {
            unreadable: true,
            ..Self::default()
        }
    }
}

impl DocumentExtractor for StubExtractor {
    fn extract_text(&self, _bytes: &[u8]) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreadable {
            return Err(StageError::InvalidDocument("PDF extraction failed: no text layer".into()));
        }
        Ok(DOCUMENT_TEXT.to_string())
    }
}

struct StubSearch {
    per_branch: usize,
    delay: Duration,
    queries: Mutex<Vec<(String, SortOrder)>>,
}

impl StubSearch {
    fn returning(per_branch: usize) -> Self {
        Self {
            per_branch,
            delay: Duration::ZERO,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn stalled(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::returning(1)
        }
    }
}

#[async_trait]
impl RecordSearch for StubSearch {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn search(
        &self,
        query: &str,
        order: SortOrder,
        _page_size: usize,
    ) -> Result<Vec<RelatedRecord>, SearchError> {
        self.queries
            .lock()
            .expect("lock")
            .push((query.to_string(), order));
        tokio::time::sleep(self.delay).await;
        Ok((0..self.per_branch)
            .map(|index| {
                RelatedRecord::new(
                    Some(format!("paper-{}-{index}", order.as_str())),
                    format!("Related by {} #{index}", order.as_str()),
                    Some("Graph pruning study.".into()),
                )
            })
            .collect())
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

struct Harness {
    inference: Arc<StubInference>,
    extractor: Arc<StubExtractor>,
    search: Arc<StubSearch>,
    service: ReviewService,
}

struct Collaborating {
    extractor: StubExtractor,
    search: StubSearch,
    embedding: Option<Arc<dyn EmbeddingClient>>,
}

impl Default for Collaborating {
    fn default() -> Self {
        Self {
            extractor: StubExtractor::default(),
            search: StubSearch::returning(1),
            embedding: None,
        }
    }
}

fn harness(inference: StubInference, settings: PipelineSettings) -> Harness {
    harness_with(inference, settings, Collaborating::default())
}

fn harness_with(
    inference: StubInference,
    settings: PipelineSettings,
    parts: Collaborating,
) -> Harness {
    let inference = Arc::new(inference);
    let extractor = Arc::new(parts.extractor);
    let search = Arc::new(parts.search);
    let retriever = Retriever::new(
        search.clone(),
        None,
        parts.embedding.clone(),
        RetrievalSettings {
            per_branch: 5,
            max_results: 10,
            max_attempts: 1,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(5),
            branch_timeout: Duration::from_secs(120),
            rerank_timeout: Duration::from_secs(30),
        },
    );
    let collaborators = Collaborators {
        inference: inference.clone(),
        embedding: parts.embedding,
        extractor: extractor.clone(),
        retriever: Arc::new(retriever),
        breaker: Arc::new(TransportBreaker::new()),
    };
    Harness {
        inference,
        extractor,
        search,
        service: ReviewService::with_collaborators(collaborators, settings),
    }
}

fn request(query: &str) -> ReviewRequest {
    ReviewRequest {
        query: query.to_string(),
        document: format!(
            "data:application/pdf;base64,{}",
            STANDARD.encode(b"%PDF-1.4 test document")
        ),
    }
}

async fn run(harness: &Harness, query: &str) -> Vec<ReviewEvent> {
    harness
        .service
        .start_review(request(query))
        .collect()
        .await
}

fn text_of(events: &[ReviewEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ReviewEvent::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn heartbeats(events: &[ReviewEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ReviewEvent::Heartbeat))
        .count()
}

fn termination(events: &[ReviewEvent]) -> &Termination {
    let finished: Vec<&Termination> = events
        .iter()
        .filter_map(|event| match event {
            ReviewEvent::Finished(termination) => Some(termination),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 1, "exactly one terminal event");
    assert!(
        matches!(events.last(), Some(ReviewEvent::Finished(_))),
        "terminal event comes last"
    );
    finished[0]
}

#[tokio::test(start_paused = true)]
async fn completed_review_walks_every_stage_in_order() {
    let harness = harness(StubInference::answering(), PipelineSettings::default());

    let events = run(&harness, "Please review this paper").await;

    assert_eq!(termination(&events), &Termination::Completed);
    let text = text_of(&events);
    let positions: Vec<usize> = (1..=6)
        .map(|step| text.find(&format!("Step {step}/6")).expect("step heading"))
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(text.contains("key terms: graph search, learned bounds"));
    assert!(text.contains("Retrieved 3 related papers"));
    assert!(text.ends_with("# Review\nAccept with minor revisions.\n\n"));

    assert_eq!(
        harness.inference.calls(),
        vec![
            InferenceTask::ParseDocument,
            InferenceTask::KeyTerms,
            InferenceTask::Innovation,
            InferenceTask::Evaluation,
            InferenceTask::Report,
        ]
    );
    let queries = harness.search.queries.lock().expect("lock").clone();
    assert_eq!(queries.len(), 3);
    assert!(
        queries
            .iter()
            .all(|(query, _)| query == "\"graph search\" | \"learned bounds\"")
    );

    let snapshot = harness.service.metrics_snapshot();
    assert_eq!(snapshot.reviews_completed, 1);
    assert_eq!(snapshot.degraded_stages, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_stage_emits_heartbeats() {
    let inference = StubInference::answering().script(
        InferenceTask::Evaluation,
        Duration::from_secs(40),
        Ok("Soundness: 7/10"),
    );
    let harness = harness(inference, PipelineSettings::default());

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    assert_eq!(heartbeats(&events), 2);
}

#[tokio::test(start_paused = true)]
async fn global_deadline_stops_the_review_after_parsing() {
    let inference = StubInference::answering().script(
        InferenceTask::ParseDocument,
        Duration::from_secs(1205),
        Ok(PARSED),
    );
    let settings = PipelineSettings {
        global_deadline: Duration::from_secs(1200),
        parse_timeout: Duration::from_secs(1300),
        ..PipelineSettings::default()
    };
    let harness = harness(inference, settings);

    let events = run(&harness, "Please review").await;

    assert_eq!(
        termination(&events),
        &Termination::Aborted(AbortCause::GlobalTimeout {
            limit: Duration::from_secs(1200)
        })
    );
    assert_eq!(harness.inference.calls(), vec![InferenceTask::ParseDocument]);
    assert_eq!(
        text_of(&events),
        "## ❌ Timeout Error\n\nRequest processing exceeded 1200 seconds. Automatically terminated.\n\n"
    );
    assert!(heartbeats(&events) > 0);
    assert_eq!(harness.service.metrics_snapshot().global_timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn parse_timeout_falls_back_to_local_extraction() {
    let inference = StubInference::answering().script(
        InferenceTask::ParseDocument,
        Duration::from_secs(500),
        Ok(PARSED),
    );
    let settings = PipelineSettings {
        parse_timeout: Duration::from_secs(100),
        ..PipelineSettings::default()
    };
    let harness = harness(inference, settings);

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    let text = text_of(&events);
    assert!(text.contains("falling back to local text extraction"));
    assert!(text.contains("PDF parsing warning"));
    assert!(text.contains("PDF parsing was incomplete"));
    assert!(harness.search.queries.lock().expect("lock").is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreadable_document_fails_parsing_without_fallback() {
    let parts = Collaborating {
        extractor: StubExtractor::unreadable(),
        ..Collaborating::default()
    };
    let harness = harness_with(StubInference::answering(), PipelineSettings::default(), parts);

    let events = run(&harness, "Please review").await;

    assert!(matches!(
        termination(&events),
        Termination::Aborted(AbortCause::StageFailed {
            stage: Stage::Parsing,
            error: StageError::InvalidDocument(_),
        })
    ));
    let text = text_of(&events);
    assert!(!text.contains("falling back to local text extraction"));
    assert!(text.ends_with(
        "## ❌ PDF Parsing Error\n\nPDF parsing failed: invalid document: PDF extraction failed: no text layer\n\n"
    ));
    assert_eq!(harness.extractor.calls.load(Ordering::SeqCst), 1);
    assert!(harness.inference.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unstructured_parse_answer_skips_retrieval() {
    let inference = StubInference::answering().script(
        InferenceTask::ParseDocument,
        Duration::ZERO,
        Ok("Sorry, I could not read this document."),
    );
    let harness = harness(inference, PipelineSettings::default());

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    assert!(text_of(&events).contains("Skipped: PDF parsing was incomplete"));
    assert!(harness.search.queries.lock().expect("lock").is_empty());
    assert_eq!(harness.service.metrics_snapshot().skipped_stages, 1);
}

#[tokio::test(start_paused = true)]
async fn key_term_timeout_uses_heuristic_terms() {
    let inference = StubInference::answering().script(
        InferenceTask::KeyTerms,
        Duration::from_secs(600),
        Ok("never used"),
    );
    let harness = harness(inference, PipelineSettings::default());

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    let text = text_of(&events);
    assert!(text.contains("continuing with basic document information"));
    assert!(text.contains("key terms: graph search, pruning, efficient, graph"));
    let queries = harness.search.queries.lock().expect("lock").clone();
    assert!(
        queries
            .iter()
            .all(|(query, _)| query == "\"graph search\" | \"pruning\" | \"efficient\"")
    );
}

#[tokio::test(start_paused = true)]
async fn retrieval_timeout_skips_related_papers() {
    let settings = PipelineSettings {
        retrieval_timeout: Duration::from_secs(60),
        ..PipelineSettings::default()
    };
    let parts = Collaborating {
        search: StubSearch::stalled(Duration::from_secs(3_600)),
        ..Collaborating::default()
    };
    let harness = harness_with(StubInference::answering(), settings, parts);

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    let text = text_of(&events);
    assert!(text.contains("Related paper retrieval unavailable"));
    assert!(!text.contains("Retrieved"));
    assert_eq!(harness.search.queries.lock().expect("lock").len(), 3);
    assert!(harness.inference.calls().contains(&InferenceTask::Innovation));
    assert_eq!(harness.service.metrics_snapshot().skipped_stages, 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_embedding_keeps_retrieved_papers() {
    let parts = Collaborating {
        search: StubSearch::returning(2),
        embedding: Some(Arc::new(StalledEmbedding)),
        ..Collaborating::default()
    };
    let harness = harness_with(StubInference::answering(), PipelineSettings::default(), parts);

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    let text = text_of(&events);
    assert!(text.contains("Retrieved 6 related papers"));
    assert!(!text.contains("Related paper retrieval unavailable"));
    assert!(!text.contains("Completed with limited analysis"));
    assert_eq!(harness.service.metrics_snapshot().skipped_stages, 0);
}

#[tokio::test(start_paused = true)]
async fn analysis_timeout_uses_placeholder() {
    let inference = StubInference::answering().script(
        InferenceTask::Innovation,
        Duration::from_secs(600),
        Ok("never used"),
    );
    let harness = harness(inference, PipelineSettings::default());

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    assert!(text_of(&events).contains("Completed with limited analysis"));
    assert!(heartbeats(&events) > 0);
    assert_eq!(harness.service.metrics_snapshot().degraded_stages, 1);
    assert!(harness.inference.calls().ends_with(&[
        InferenceTask::Innovation,
        InferenceTask::Evaluation,
        InferenceTask::Report,
    ]));
}

#[tokio::test(start_paused = true)]
async fn failed_innovation_analysis_uses_placeholder() {
    let inference = StubInference::answering().script(
        InferenceTask::Innovation,
        Duration::ZERO,
        Err(InferenceError::Transport("503".into())),
    );
    let harness = harness(inference, PipelineSettings::default());

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    assert!(text_of(&events).contains("Completed with limited analysis"));
}

#[tokio::test(start_paused = true)]
async fn evaluation_failure_aborts_before_the_report() {
    let inference = StubInference::answering().script(
        InferenceTask::Evaluation,
        Duration::ZERO,
        Err(InferenceError::Transport("503".into())),
    );
    let harness = harness(inference, PipelineSettings::default());

    let events = run(&harness, "Please review").await;

    assert!(matches!(
        termination(&events),
        Termination::Aborted(AbortCause::StageFailed {
            stage: Stage::Evaluating,
            ..
        })
    ));
    assert!(!harness.inference.calls().contains(&InferenceTask::Report));
    let text = text_of(&events);
    assert!(text.ends_with("## ❌ Evaluation Error\n\nEvaluation failed: transport failure: 503\n\n"));
    assert!(!text.contains("Step 6/6"));
}

#[tokio::test(start_paused = true)]
async fn report_failure_aborts_with_report_error() {
    let inference = StubInference::answering().script(
        InferenceTask::Report,
        Duration::ZERO,
        Err(InferenceError::Transport("503".into())),
    );
    let harness = harness(inference, PipelineSettings::default());

    let events = run(&harness, "Please review").await;

    assert_eq!(
        termination(&events),
        &Termination::Aborted(AbortCause::StageFailed {
            stage: Stage::Reporting,
            error: StageError::Transport("503".into()),
        })
    );
    let reports = harness
        .inference
        .calls()
        .into_iter()
        .filter(|task| *task == InferenceTask::Report)
        .count();
    assert_eq!(reports, 3);
    assert!(text_of(&events).ends_with(
        "## ❌ Review Error\n\nReview report generation failed: transport failure: 503\n\n"
    ));
    assert_eq!(harness.service.metrics_snapshot().reviews_aborted, 1);
}

#[tokio::test(start_paused = true)]
async fn report_timeout_aborts_with_timeout_error() {
    let inference = StubInference::answering().script(
        InferenceTask::Report,
        Duration::from_secs(1_000),
        Ok("never used"),
    );
    let harness = harness(inference, PipelineSettings::default());

    let events = run(&harness, "Please review").await;

    assert!(matches!(
        termination(&events),
        Termination::Aborted(AbortCause::StageFailed {
            stage: Stage::Reporting,
            error: StageError::Timeout(_),
        })
    ));
    assert!(
        text_of(&events).ends_with("## ❌ Timeout Error\n\nReview report generation timed out.\n\n")
    );
}

#[tokio::test(start_paused = true)]
async fn disabled_retrieval_is_reported_and_skipped() {
    let settings = PipelineSettings {
        retrieval_enabled: false,
        ..PipelineSettings::default()
    };
    let harness = harness(StubInference::answering(), settings);

    let events = run(&harness, "Please review").await;

    assert_eq!(termination(&events), &Termination::Completed);
    assert!(text_of(&events).contains("related paper retrieval is disabled"));
    assert!(harness.search.queries.lock().expect("lock").is_empty());
}

#[tokio::test(start_paused = true)]
async fn chinese_instruction_produces_chinese_progress() {
    let harness = harness(StubInference::answering(), PipelineSettings::default());

    let events = run(&harness, "请评审这篇论文").await;

    assert_eq!(termination(&events), &Termination::Completed);
    assert!(text_of(&events).contains("步骤 1/6"));
}

#[tokio::test(start_paused = true)]
async fn dropped_stream_abandons_the_review() {
    let inference = StubInference::answering().script(
        InferenceTask::ParseDocument,
        Duration::from_secs(120),
        Ok(PARSED),
    );
    let harness = harness(inference, PipelineSettings::default());

    let mut events = harness.service.start_review(request("Please review"));
    assert_eq!(events.next().await, Some(ReviewEvent::Heartbeat));
    drop(events);

    for _ in 0..20 {
        if harness.service.metrics_snapshot().client_disconnects == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(15)).await;
    }

    let snapshot = harness.service.metrics_snapshot();
    assert_eq!(snapshot.client_disconnects, 1);
    assert_eq!(snapshot.reviews_completed, 0);
    assert_eq!(harness.inference.calls(), vec![InferenceTask::ParseDocument]);
}

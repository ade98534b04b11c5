//! Six-stage review pipeline driven under a global deadline.
//!
//! Each request runs on its own task. Stage work is offloaded and supervised by the
//! heartbeat runner; every heartbeat and stage result is checked against the request's
//! [`GlobalDeadline`]. Progress text, keep-alives and the terminal marker are pushed into a
//! bounded channel whose receiving half is the response stream. A closed channel means the
//! client went away and stops the pipeline at its next send.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_core::Stream;
use futures_util::{StreamExt, pin_mut};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::context::ReviewContext;
use super::messages;
use super::runner::{HeartbeatSettings, Offloaded, RunnerEvent, run_with_heartbeat};
use super::service::Collaborators;
use super::types::{
    AbortCause, PipelineState, ReviewEvent, ReviewRequest, Stage, StageError, Termination,
};
use crate::config::Config;
use crate::metrics::ReviewMetrics;

const EVENT_BUFFER: usize = 64;

/// Boxed stream of events produced by one review.
pub type ReviewEvents = Pin<Box<dyn Stream<Item = ReviewEvent> + Send>>;

/// Timing and feature switches of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Period between keep-alives while a stage is running.
    pub heartbeat_interval: Duration,
    /// Wall-clock budget of a whole review.
    pub global_deadline: Duration,
    /// Budget of the parse stage, and again of its local fallback.
    pub parse_timeout: Duration,
    /// Budget of key-term extraction.
    pub key_term_timeout: Duration,
    /// Budget of related-record retrieval.
    pub retrieval_timeout: Duration,
    /// Budget of innovation analysis.
    pub analysis_timeout: Duration,
    /// Budget of similarity scoring ahead of the analysis; capped by `analysis_timeout`.
    pub scoring_timeout: Duration,
    /// Budget of the evaluation stage.
    pub evaluation_timeout: Duration,
    /// Budget of report generation, retries included.
    pub report_timeout: Duration,
    /// Per-attempt timeout handed to the inference client.
    pub request_timeout: Duration,
    /// Whether related records are searched at all.
    pub retrieval_enabled: bool,
    /// Attempts at generating the report.
    pub report_attempts: u32,
    /// Base of the delay between report attempts; doubled for each attempt.
    pub report_retry_base: Duration,
}

impl PipelineSettings {
    /// Settings taken from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            global_deadline: config.global_deadline,
            parse_timeout: config.parse_timeout,
            key_term_timeout: config.key_term_timeout,
            retrieval_timeout: config.retrieval_timeout,
            analysis_timeout: config.analysis_timeout,
            scoring_timeout: config.embedding_request_timeout,
            evaluation_timeout: config.evaluation_timeout,
            report_timeout: config.report_timeout,
            request_timeout: config.llm_request_timeout,
            retrieval_enabled: config.retrieval_enabled,
            report_attempts: 3,
            report_retry_base: Duration::from_secs(2),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Wall-clock budget of one review, fixed when the review starts.
#[derive(Debug, Clone, Copy)]
pub struct GlobalDeadline {
    started: Instant,
    limit: Duration,
}

impl GlobalDeadline {
    /// Start the clock now.
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Time spent since the review started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    /// Whether the budget is used up.
    pub fn expired(&self) -> bool {
        self.elapsed() >= self.limit
    }

    /// Abort cause reported when the budget is used up.
    pub fn cause(&self) -> AbortCause {
        AbortCause::GlobalTimeout { limit: self.limit }
    }
}

/// Sending half of a review's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ReviewEvent>,
}

impl EventSink {
    async fn send(&self, event: ReviewEvent) -> Result<(), AbortCause> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AbortCause::ClientDisconnected)
    }

    /// Forward a keep-alive.
    pub async fn heartbeat(&self) -> Result<(), AbortCause> {
        self.send(ReviewEvent::Heartbeat).await
    }

    /// Append text to the response.
    pub async fn text(&self, text: impl Into<String>) -> Result<(), AbortCause> {
        self.send(ReviewEvent::Text(text.into())).await
    }

    /// Send the terminal event.
    pub async fn finish(&self, termination: Termination) -> Result<(), AbortCause> {
        self.send(ReviewEvent::Finished(termination)).await
    }
}

/// Runs reviews against a fixed set of collaborators.
pub struct ReviewPipeline {
    pub(super) collaborators: Collaborators,
    pub(super) settings: PipelineSettings,
    pub(super) metrics: Arc<ReviewMetrics>,
}

impl ReviewPipeline {
    /// Assemble a pipeline.
    pub fn new(
        collaborators: Collaborators,
        settings: PipelineSettings,
        metrics: Arc<ReviewMetrics>,
    ) -> Self {
        Self {
            collaborators,
            settings,
            metrics,
        }
    }

    /// Start a review on its own task and return its event stream.
    ///
    /// The stream always ends after a [`ReviewEvent::Finished`], or earlier if the pipeline
    /// task ended abnormally. Dropping the stream stops the pipeline at its next send.
    pub fn start(self: &Arc<Self>, request: ReviewRequest) -> ReviewEvents {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let pipeline = Arc::clone(self);
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("review", %request_id);

        tokio::spawn(
            async move { pipeline.run(request, EventSink { tx }).await }.instrument(span),
        );

        Box::pin(stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    async fn run(&self, request: ReviewRequest, sink: EventSink) {
        let ReviewRequest { query, document } = request;
        let deadline = GlobalDeadline::start(self.settings.global_deadline);
        let mut context = ReviewContext::new(query);
        self.metrics.record_started();
        tracing::info!(
            language = context.language.code(),
            document_len = document.len(),
            deadline_secs = self.settings.global_deadline.as_secs(),
            "Review started"
        );

        let mut state = PipelineState::Running(Stage::Parsing);
        let termination = loop {
            state = match state {
                PipelineState::Running(_) if deadline.expired() => {
                    PipelineState::Aborted(deadline.cause())
                }
                PipelineState::Running(stage) => {
                    let started = Instant::now();
                    match self
                        .advance(stage, &mut context, &document, &deadline, &sink)
                        .await
                    {
                        Ok(()) => {
                            tracing::info!(
                                stage = stage.as_str(),
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                total_ms = deadline.elapsed().as_millis() as u64,
                                "Stage resolved"
                            );
                            stage.next().map_or(PipelineState::Done, PipelineState::Running)
                        }
                        Err(cause) => PipelineState::Aborted(cause),
                    }
                }
                PipelineState::Done => break Termination::Completed,
                PipelineState::Aborted(cause) => break Termination::Aborted(cause),
            };
        };

        self.finish(termination, &context, &deadline, &sink).await;
    }

    async fn advance(
        &self,
        stage: Stage,
        context: &mut ReviewContext,
        document: &str,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) -> Result<(), AbortCause> {
        match stage {
            Stage::Parsing => self.parse(context, document, deadline, sink).await,
            Stage::ExtractingTerms => self.extract_terms(context, deadline, sink).await,
            Stage::Retrieving => self.retrieve(context, deadline, sink).await,
            Stage::Analyzing => self.analyze(context, deadline, sink).await,
            Stage::Evaluating => self.evaluate(context, deadline, sink).await,
            Stage::Reporting => self.report(context, deadline, sink).await,
        }
    }

    async fn finish(
        &self,
        termination: Termination,
        context: &ReviewContext,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) {
        let elapsed_ms = deadline.elapsed().as_millis() as u64;
        match termination {
            Termination::Completed => {
                self.metrics.record_completed();
                tracing::info!(elapsed_ms, "Review completed");
                if sink.finish(Termination::Completed).await.is_err() {
                    tracing::debug!("Client left before the terminal event");
                }
            }
            Termination::Aborted(AbortCause::ClientDisconnected) => {
                self.metrics.record_aborted(&AbortCause::ClientDisconnected);
                tracing::info!(elapsed_ms, "Client disconnected; review abandoned");
            }
            Termination::Aborted(cause) => {
                self.metrics.record_aborted(&cause);
                tracing::warn!(elapsed_ms, cause = %cause, "Review aborted");
                let message = messages::abort_message(context.language, &cause);
                let delivered = match sink.text(message).await {
                    Ok(()) => sink.finish(Termination::Aborted(cause)).await,
                    Err(error) => Err(error),
                };
                if delivered.is_err() {
                    tracing::debug!("Client left before the abort notice");
                }
            }
        }
    }

    /// Supervise `work`, forwarding keep-alives, under both the stage budget and the
    /// remaining global budget.
    ///
    /// The outer `Err` stops the pipeline: the deadline passed or the client left. The inner
    /// result is the work's own outcome, for the stage policy to resolve.
    pub(super) async fn drive<T>(
        &self,
        stage: Stage,
        budget: Duration,
        work: Offloaded<T>,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) -> Result<Result<T, StageError>, AbortCause>
    where
        T: Send + 'static,
    {
        let settings = HeartbeatSettings {
            interval: self.settings.heartbeat_interval,
            timeout: budget.min(deadline.remaining()),
        };
        let events = run_with_heartbeat(work, settings);
        pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                RunnerEvent::Heartbeat if deadline.expired() => return Err(deadline.cause()),
                RunnerEvent::Heartbeat => sink.heartbeat().await?,
                RunnerEvent::Finished(Err(StageError::Timeout(_))) if deadline.expired() => {
                    tracing::warn!(stage = stage.as_str(), "Stage cut short by the global deadline");
                    return Err(deadline.cause());
                }
                RunnerEvent::Finished(result) => {
                    if let Err(error) = &result {
                        tracing::warn!(stage = stage.as_str(), error = %error, "Stage work failed");
                    }
                    return Ok(result);
                }
            }
        }

        Ok(Err(StageError::Cancelled(
            "runner ended without a result".into(),
        )))
    }
}

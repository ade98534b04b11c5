//! Stage bodies of [`ReviewPipeline`].
//!
//! Every body offloads its collaborator work through [`ReviewPipeline::drive`], resolves the
//! result with the stage policy, stores what later stages need in the context and streams
//! its progress text. An `Err` return aborts the pipeline.

use std::sync::Arc;
use std::time::Duration;

use super::context::ReviewContext;
use super::document::DocumentRecord;
use super::language::Language;
use super::messages;
use super::orchestrator::{EventSink, GlobalDeadline, ReviewPipeline};
use super::policy::{self, StageOutcome};
use super::prompts;
use super::runner::Offloaded;
use super::source::{self, DocumentExtractor};
use super::terms;
use super::types::{AbortCause, Stage, StageError};
use crate::inference::{InferenceClient, InferenceRequest, InferenceTask, ModelTier};
use crate::retrieval;

const PARSE_TEMPERATURE: f32 = 0.3;
const KEY_TERM_TEMPERATURE: f32 = 0.3;
const NARRATIVE_TEMPERATURE: f32 = 0.5;
const INNOVATION_RELATED: usize = 5;

impl ReviewPipeline {
    pub(super) async fn parse(
        &self,
        context: &mut ReviewContext,
        document: &str,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) -> Result<(), AbortCause> {
        let stage = Stage::Parsing;
        let budget = self.settings.parse_timeout;
        let encoded: Arc<str> = Arc::from(document);

        let structured = self.structured_parse(Arc::clone(&encoded), context.language);
        let outcome = match self.drive(stage, budget, structured, deadline, sink).await? {
            Ok(record) => policy::classify_document(record),
            Err(error @ StageError::InvalidDocument(_)) => {
                tracing::warn!(error = %error, "Document unreadable; local extraction not attempted");
                StageOutcome::Failed(error)
            }
            Err(error) => {
                sink.text(messages::parse_fallback_notice(context.language))
                    .await?;
                let note = format!("structured parsing unavailable ({error})");
                let local = local_extraction(self.collaborators.extractor.clone(), encoded, note);
                let fallback = self.drive(stage, budget, local, deadline, sink).await?;
                policy::resolve(stage, Err(error), || fallback)
            }
        };

        self.metrics.record_outcome(&outcome);
        context.parse_degraded = outcome.is_degraded();
        tracing::info!(outcome = outcome.label(), "Parse stage resolved");

        let record = outcome.into_value(stage)?.unwrap_or_default();
        tracing::debug!(
            sections = record.section_count(),
            raw_chars = record.raw_text.chars().count(),
            degraded = context.parse_degraded,
            "Document record ready"
        );

        sink.text(messages::stage_completed(context.language, stage))
            .await?;
        if let Some(note) = &record.parse_error {
            sink.text(messages::parse_degraded_notice(context.language, note))
                .await?;
        }
        context.document = Some(Arc::new(record));
        Ok(())
    }

    fn structured_parse(&self, encoded: Arc<str>, language: Language) -> Offloaded<DocumentRecord> {
        let extractor = self.collaborators.extractor.clone();
        let inference = self.collaborators.inference.clone();
        let timeout = self.settings.request_timeout;

        Offloaded::spawn(async move {
            let text = Offloaded::spawn_blocking(move || extract(extractor.as_ref(), &encoded)).await?;
            let answer = inference
                .complete(InferenceRequest {
                    task: InferenceTask::ParseDocument,
                    prompt: prompts::parse_document(&text, language),
                    tier: ModelTier::Reasoning,
                    temperature: PARSE_TEMPERATURE,
                    timeout,
                })
                .await?;
            Ok::<_, StageError>(DocumentRecord::from_response(&answer, &text))
        })
    }

    pub(super) async fn extract_terms(
        &self,
        context: &mut ReviewContext,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) -> Result<(), AbortCause> {
        let stage = Stage::ExtractingTerms;
        let document = context.document();

        let work = self.infer(
            InferenceTask::KeyTerms,
            prompts::key_terms(&document),
            ModelTier::Standard,
            KEY_TERM_TEMPERATURE,
        );
        let result = self
            .drive(stage, self.settings.key_term_timeout, work, deadline, sink)
            .await?
            .and_then(|answer| {
                let terms = terms::parse_term_answer(&answer);
                if terms.is_empty() {
                    Err(StageError::MalformedResponse("answer listed no key terms".into()))
                } else {
                    Ok(terms)
                }
            });

        let outcome = policy::resolve(stage, result, || Ok(terms::heuristic_terms(&document)));
        self.metrics.record_outcome(&outcome);
        if outcome.is_degraded() {
            sink.text(messages::terms_fallback_notice(context.language))
                .await?;
        }

        let key_terms = outcome.into_value(stage)?.unwrap_or_default();
        context.search_query = terms::build_query(&key_terms, document.title());
        tracing::info!(
            terms = ?key_terms,
            query = context.search_query.as_deref().unwrap_or_default(),
            "Key terms resolved"
        );

        sink.text(messages::terms_completed(context.language, &key_terms))
            .await?;
        context.key_terms = key_terms;
        Ok(())
    }

    pub(super) async fn retrieve(
        &self,
        context: &mut ReviewContext,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) -> Result<(), AbortCause> {
        let stage = Stage::Retrieving;

        if let Some(reason) = policy::retrieval_skip_reason(
            self.settings.retrieval_enabled,
            context.parse_degraded,
            context.search_query.as_deref(),
        ) {
            tracing::info!(reason = %reason, "Retrieval skipped");
            self.metrics.record_skipped();
            return sink
                .text(messages::retrieval_skipped(context.language, &reason))
                .await;
        }

        let retriever = self.collaborators.retriever.clone();
        let query = context.search_query.clone().unwrap_or_default();
        let work = Offloaded::spawn(async move { Ok::<_, StageError>(retriever.retrieve(&query).await) });
        let result = self
            .drive(stage, self.settings.retrieval_timeout, work, deadline, sink)
            .await?;

        let outcome = policy::resolve(stage, result, || Ok(Vec::new()));
        self.metrics.record_outcome(&outcome);
        match outcome {
            StageOutcome::Skipped(reason) => {
                tracing::warn!(reason = %reason, "Retrieval unavailable");
                sink.text(messages::retrieval_skipped(context.language, &reason))
                    .await
            }
            other => {
                let related = other.into_value(stage)?.unwrap_or_default();
                tracing::info!(count = related.len(), "Related records retrieved");
                sink.text(messages::retrieval_completed(context.language, related.len()))
                    .await?;
                context.related = related;
                Ok(())
            }
        }
    }

    pub(super) async fn analyze(
        &self,
        context: &mut ReviewContext,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) -> Result<(), AbortCause> {
        let stage = Stage::Analyzing;
        let budget = self.settings.analysis_timeout;
        let scoring_budget = self.settings.scoring_timeout.min(budget);
        let document = context.document();

        let embedding = self
            .collaborators
            .embedding
            .clone()
            .filter(|_| !context.related.is_empty());
        if let Some(embedding) = embedding {
            let text = document.format_for_prompt();
            let records = context.related.clone();
            let work = Offloaded::spawn(async move {
                retrieval::score_records(embedding.as_ref(), &text, records)
                    .await
                    .map_err(|error| StageError::Transport(error.to_string()))
            });
            context.similarities = match self
                .drive(stage, scoring_budget, work, deadline, sink)
                .await?
            {
                Ok(scored) => scored,
                Err(error) => {
                    tracing::warn!(error = %error, "Similarity scoring unavailable; using zero scores");
                    context
                        .related
                        .iter()
                        .map(|record| (record.clone(), 0.0))
                        .collect()
                }
            };
        }

        let related = context.top_related(INNOVATION_RELATED);
        let work = self.infer(
            InferenceTask::Innovation,
            prompts::innovation(&document, &related, context.language),
            ModelTier::Reasoning,
            NARRATIVE_TEMPERATURE,
        );
        let result = self
            .drive(stage, budget, work, deadline, sink)
            .await?
            .and_then(require_content);

        let language = context.language;
        let outcome = policy::resolve(stage, result, || {
            Ok(messages::innovation_placeholder(language))
        });
        self.metrics.record_outcome(&outcome);
        let degraded = outcome.is_degraded();
        context.innovation = outcome.into_value(stage)?;

        sink.text(messages::analysis_completed(language, degraded))
            .await
    }

    pub(super) async fn evaluate(
        &self,
        context: &mut ReviewContext,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) -> Result<(), AbortCause> {
        let stage = Stage::Evaluating;
        let document = context.document();
        let innovation = context.innovation.clone().unwrap_or_default();

        let work = self.infer(
            InferenceTask::Evaluation,
            prompts::evaluation(&document, &innovation, &context.related, context.language),
            ModelTier::Reasoning,
            NARRATIVE_TEMPERATURE,
        );
        let result = self
            .drive(stage, self.settings.evaluation_timeout, work, deadline, sink)
            .await?
            .and_then(require_content);

        let outcome = policy::resolve(stage, result, no_substitute);
        self.metrics.record_outcome(&outcome);
        context.evaluation = outcome.into_value(stage)?;

        sink.text(messages::stage_completed(context.language, stage))
            .await
    }

    pub(super) async fn report(
        &self,
        context: &mut ReviewContext,
        deadline: &GlobalDeadline,
        sink: &EventSink,
    ) -> Result<(), AbortCause> {
        let stage = Stage::Reporting;
        sink.text(messages::report_started(context.language))
            .await?;

        let document = context.document();
        let request = InferenceRequest {
            task: InferenceTask::Report,
            prompt: prompts::report(
                &context.query,
                &document,
                context.innovation.as_deref().unwrap_or_default(),
                context.evaluation.as_deref().unwrap_or_default(),
                context.language,
            ),
            tier: ModelTier::Reasoning,
            temperature: NARRATIVE_TEMPERATURE,
            timeout: self.settings.request_timeout,
        };
        let work = Offloaded::spawn(generate_report(
            self.collaborators.inference.clone(),
            request,
            self.settings.report_attempts,
            self.settings.report_retry_base,
        ));
        let result = self
            .drive(stage, self.settings.report_timeout, work, deadline, sink)
            .await?;

        let outcome = policy::resolve(stage, result, no_substitute);
        self.metrics.record_outcome(&outcome);
        let report = outcome.into_value(stage)?.unwrap_or_default();

        sink.text(format!("{report}\n\n")).await?;
        context.report = Some(report);
        Ok(())
    }

    fn infer(
        &self,
        task: InferenceTask,
        prompt: String,
        tier: ModelTier,
        temperature: f32,
    ) -> Offloaded<String> {
        let inference = self.collaborators.inference.clone();
        let request = InferenceRequest {
            task,
            prompt,
            tier,
            temperature,
            timeout: self.settings.request_timeout,
        };
        Offloaded::spawn(async move { inference.complete(request).await.map_err(StageError::from) })
    }
}

fn extract(extractor: &dyn DocumentExtractor, encoded: &str) -> Result<String, StageError> {
    let bytes = source::decode_document(encoded)?;
    tracing::debug!(
        digest = %source::digest(&bytes),
        bytes = bytes.len(),
        "Decoded document"
    );
    extractor.extract_text(&bytes)
}

fn local_extraction(
    extractor: Arc<dyn DocumentExtractor>,
    encoded: Arc<str>,
    note: String,
) -> Offloaded<DocumentRecord> {
    Offloaded::spawn_blocking(move || {
        let text = extract(extractor.as_ref(), &encoded)?;
        Ok(DocumentRecord::from_text(&text, note))
    })
}

/// Generate the report, retrying failed or empty answers with doubling delays.
async fn generate_report(
    inference: Arc<dyn InferenceClient>,
    request: InferenceRequest,
    attempts: u32,
    retry_base: Duration,
) -> Result<String, StageError> {
    let mut attempt = 0;
    loop {
        let result = inference
            .complete(request.clone())
            .await
            .map_err(StageError::from)
            .and_then(require_content);

        match result {
            Ok(report) => return Ok(report),
            Err(error) if is_retryable(&error) && attempt + 1 < attempts => {
                let delay = retry_base * 2_u32.pow(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "Report generation failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn is_retryable(error: &StageError) -> bool {
    matches!(
        error,
        StageError::Transport(_)
            | StageError::RateLimited(_)
            | StageError::Timeout(_)
            | StageError::MalformedResponse(_)
    )
}

fn require_content(answer: String) -> Result<String, StageError> {
    if answer.trim().is_empty() {
        Err(StageError::MalformedResponse("empty answer".into()))
    } else {
        Ok(answer)
    }
}

fn no_substitute<T>() -> Result<T, StageError> {
    Err(StageError::MalformedResponse("stage has no substitute".into()))
}

//! Per-stage timeout and degradation rules.
//!
//! A stage that still leaves later stages something meaningful to work with degrades; a
//! stage whose failure leaves nothing downstream able to proceed aborts the pipeline.

use std::fmt;

use super::document::DocumentRecord;
use super::types::{AbortCause, Stage, StageError};

/// Recovery applied when a stage times out or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Best-effort local text extraction without inference.
    LocalExtraction,
    /// Deterministic key terms taken from the title and keywords.
    HeuristicTerms,
    /// Continue with an empty related-record set.
    SkipStage,
    /// Continue with a localized placeholder narrative.
    PlaceholderNarrative,
    /// Stop the pipeline.
    Abort,
}

/// Recovery rule of each stage.
pub const fn fallback_for(stage: Stage) -> Fallback {
    match stage {
        Stage::Parsing => Fallback::LocalExtraction,
        Stage::ExtractingTerms => Fallback::HeuristicTerms,
        Stage::Retrieving => Fallback::SkipStage,
        Stage::Analyzing => Fallback::PlaceholderNarrative,
        Stage::Evaluating | Stage::Reporting => Fallback::Abort,
    }
}

/// Why a stage did not run, or ran without effect.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Turned off by configuration.
    Disabled,
    /// Document parsing was degraded, so the query would be unreliable.
    DegradedParse,
    /// No usable query could be derived.
    NoQuery,
    /// The stage failed and its rule is to skip.
    Failed(StageError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => f.write_str("disabled"),
            SkipReason::DegradedParse => f.write_str("degraded parse"),
            SkipReason::NoQuery => f.write_str("no query"),
            SkipReason::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

/// Why a stage produced a substitute value.
#[derive(Debug, Clone, PartialEq)]
pub enum DegradeReason {
    /// The primary attempt failed or timed out.
    Failure(StageError),
    /// The value was produced but key content is missing.
    PartialExtraction(String),
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::Failure(error) => write!(f, "{error}"),
            DegradeReason::PartialExtraction(note) => write!(f, "partial extraction: {note}"),
        }
    }
}

/// Resolution of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// The stage produced its value.
    Completed(T),
    /// The stage produced a substitute value.
    Degraded(T, DegradeReason),
    /// The stage did not produce a value and the pipeline continues without it.
    Skipped(SkipReason),
    /// The stage failed and the pipeline must stop.
    Failed(StageError),
}

impl<T> StageOutcome<T> {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Completed(_) => "completed",
            StageOutcome::Degraded(..) => "degraded",
            StageOutcome::Skipped(_) => "skipped",
            StageOutcome::Failed(_) => "failed",
        }
    }

    /// Whether a substitute value was used.
    pub fn is_degraded(&self) -> bool {
        matches!(self, StageOutcome::Degraded(..))
    }

    /// Extract the carried value, turning `Failed` into the abort cause for `stage`.
    pub fn into_value(self, stage: Stage) -> Result<Option<T>, AbortCause> {
        match self {
            StageOutcome::Completed(value) | StageOutcome::Degraded(value, _) => Ok(Some(value)),
            StageOutcome::Skipped(_) => Ok(None),
            StageOutcome::Failed(error) => Err(AbortCause::StageFailed { stage, error }),
        }
    }
}

/// Resolve the primary result of `stage` according to its fallback rule.
///
/// `substitute` runs only when the primary attempt failed and the rule calls for a
/// substitute value; its own failure fails the stage.
pub fn resolve<T, F>(stage: Stage, result: Result<T, StageError>, substitute: F) -> StageOutcome<T>
where
    F: FnOnce() -> Result<T, StageError>,
{
    let error = match result {
        Ok(value) => return StageOutcome::Completed(value),
        Err(error) => error,
    };

    match fallback_for(stage) {
        Fallback::Abort => StageOutcome::Failed(error),
        Fallback::SkipStage => StageOutcome::Skipped(SkipReason::Failed(error)),
        Fallback::LocalExtraction | Fallback::HeuristicTerms | Fallback::PlaceholderNarrative => {
            match substitute() {
                Ok(value) => StageOutcome::Degraded(value, DegradeReason::Failure(error)),
                Err(fallback_error) => StageOutcome::Failed(fallback_error),
            }
        }
    }
}

/// Grade a parsed document: usable, degraded, or unusable.
pub fn classify_document(record: DocumentRecord) -> StageOutcome<DocumentRecord> {
    if record.raw_text.trim().is_empty() && !record.has_core_content() {
        return StageOutcome::Failed(StageError::InvalidDocument(
            "no text could be extracted from the document".into(),
        ));
    }

    if record.is_degraded() {
        let note = record
            .parse_error
            .clone()
            .unwrap_or_else(|| "no core sections found".into());
        return StageOutcome::Degraded(record, DegradeReason::PartialExtraction(note));
    }

    StageOutcome::Completed(record)
}

/// Decide whether retrieval must be skipped without issuing any call.
///
/// Checked in order: configuration switch, degraded parse, missing query.
pub fn retrieval_skip_reason(
    enabled: bool,
    parse_degraded: bool,
    query: Option<&str>,
) -> Option<SkipReason> {
    if !enabled {
        return Some(SkipReason::Disabled);
    }
    if parse_degraded {
        return Some(SkipReason::DegradedParse);
    }
    if query.is_none_or(|query| query.trim().is_empty()) {
        return Some(SkipReason::NoQuery);
    }
    None
}

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::inference::InferenceError;

/// One step of the review pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Decode the document and extract structured sections.
    Parsing,
    /// Derive key terms and the retrieval query.
    ExtractingTerms,
    /// Search external sources for related records.
    Retrieving,
    /// Score similarity and write the innovation narrative.
    Analyzing,
    /// Produce the evaluation narrative.
    Evaluating,
    /// Produce the final report text.
    Reporting,
}

impl Stage {
    /// Every stage in the order the orchestrator visits them.
    pub const ALL: [Stage; 6] = [
        Stage::Parsing,
        Stage::ExtractingTerms,
        Stage::Retrieving,
        Stage::Analyzing,
        Stage::Evaluating,
        Stage::Reporting,
    ];

    /// Stage that follows this one, `None` after reporting.
    pub const fn next(self) -> Option<Stage> {
        match self {
            Stage::Parsing => Some(Stage::ExtractingTerms),
            Stage::ExtractingTerms => Some(Stage::Retrieving),
            Stage::Retrieving => Some(Stage::Analyzing),
            Stage::Analyzing => Some(Stage::Evaluating),
            Stage::Evaluating => Some(Stage::Reporting),
            Stage::Reporting => None,
        }
    }

    /// One-based position used in progress messages.
    pub const fn ordinal(self) -> usize {
        match self {
            Stage::Parsing => 1,
            Stage::ExtractingTerms => 2,
            Stage::Retrieving => 3,
            Stage::Analyzing => 4,
            Stage::Evaluating => 5,
            Stage::Reporting => 6,
        }
    }

    /// Stable snake_case name used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Parsing => "parsing",
            Stage::ExtractingTerms => "extracting_terms",
            Stage::Retrieving => "retrieving",
            Stage::Analyzing => "analyzing",
            Stage::Evaluating => "evaluating",
            Stage::Reporting => "reporting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single stage body or of the offloaded work running it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// Network or upstream failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Upstream asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Work did not finish within its budget.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// Upstream answered with something unusable.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The submitted document could not be decoded or read.
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    /// Offloaded work panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// Offloaded work was cancelled before producing a result.
    #[error("task cancelled: {0}")]
    Cancelled(String),
}

impl From<InferenceError> for StageError {
    fn from(error: InferenceError) -> Self {
        match error {
            InferenceError::Timeout(after) => StageError::Timeout(after),
            InferenceError::Transport(message) => StageError::Transport(message),
            InferenceError::MalformedResponse(message) => StageError::MalformedResponse(message),
        }
    }
}

/// Why a pipeline stopped before producing a report.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortCause {
    /// The request exceeded its wall-clock budget.
    GlobalTimeout {
        /// Budget that was exceeded.
        limit: Duration,
    },
    /// A stage failed and its policy does not allow continuing.
    StageFailed {
        /// Stage that failed.
        stage: Stage,
        /// Error reported by the stage.
        error: StageError,
    },
    /// The consumer of the output stream went away.
    ClientDisconnected,
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::GlobalTimeout { limit } => {
                write!(f, "global deadline of {}s exceeded", limit.as_secs())
            }
            AbortCause::StageFailed { stage, error } => write!(f, "{stage} failed: {error}"),
            AbortCause::ClientDisconnected => f.write_str("client disconnected"),
        }
    }
}

/// Orchestrator state machine position.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    /// A stage is about to run or is running.
    Running(Stage),
    /// Every stage resolved and the report was emitted.
    Done,
    /// The pipeline stopped early.
    Aborted(AbortCause),
}

/// Item produced by a running review, consumed by the stream encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewEvent {
    /// Keep-alive with no payload.
    Heartbeat,
    /// Human-readable text to append to the output.
    Text(String),
    /// Final event; nothing follows it.
    Finished(Termination),
}

/// How a review ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// The report was produced.
    Completed,
    /// The pipeline aborted for the given reason.
    Aborted(AbortCause),
}

/// Validated input of one review request.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    /// Free-form instruction; also decides the output language.
    pub query: String,
    /// Base64 document, optionally prefixed with a data-URL header.
    pub document: String,
}

//! Streaming document review.
//!
//! A review decodes and parses the submitted document, derives key terms, looks up related
//! records, assesses novelty, evaluates the work and writes a report. [`ReviewService`]
//! starts reviews; each one yields a stream of [`ReviewEvent`] values that the HTTP layer
//! encodes into server-sent events.

mod context;
mod document;
mod language;
mod messages;
mod orchestrator;
mod policy;
mod prompts;
mod runner;
mod service;
mod source;
mod stages;
mod terms;
mod types;

pub use context::ReviewContext;
pub use document::{DocumentRecord, Section};
pub use language::Language;
pub use orchestrator::{GlobalDeadline, PipelineSettings, ReviewEvents, ReviewPipeline};
pub use policy::{DegradeReason, Fallback, SkipReason, StageOutcome, fallback_for};
pub use runner::{HeartbeatSettings, Offloaded, RunnerEvent, run_with_heartbeat};
pub use service::{Collaborators, ReviewApi, ReviewService, ServiceError};
pub use source::{DocumentExtractor, PdfTextExtractor, decode_document};
pub use terms::build_query;
pub use types::{
    AbortCause, PipelineState, ReviewEvent, ReviewRequest, Stage, StageError, Termination,
};

#[cfg(test)]
mod tests;

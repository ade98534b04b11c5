//! HTTP surface for Rusty Review.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /paper_review` – Review a base64 document and stream progress and the final report
//!   as server-sent chat-completion chunks, closed by a `[DONE]` frame.
//! - `GET /health` – Liveness probe with a timestamp.
//! - `GET /` – Service descriptor.
//! - `GET /metrics` – Review counters and the embedding transport in force.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::metrics::MetricsSnapshot;
use crate::review::{ReviewApi, ReviewRequest};
use crate::stream::encode;

const SERVICE_NAME: &str = "rusty-review";

/// Build the HTTP router exposing the review API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ReviewApi + 'static,
{
    Router::new()
        .route("/", get(describe_service))
        .route("/health", get(health))
        .route("/paper_review", post(paper_review::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for the `POST /paper_review` endpoint.
#[derive(Deserialize)]
struct PaperReviewRequest {
    /// Reviewer instruction; its language selects the output language.
    #[serde(default)]
    query: String,
    /// Base64 document, optionally prefixed with `data:...;base64,`.
    #[serde(default)]
    pdf_content: String,
}

/// Validate the request and stream the review.
///
/// Validation failures, unreadable bodies included, answer 400 before any streaming starts.
async fn paper_review<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<PaperReviewRequest>, JsonRejection>,
) -> Result<Response, RequestError>
where
    S: ReviewApi,
{
    let Json(PaperReviewRequest { query, pdf_content }) =
        payload.map_err(|rejection| RequestError::ClientInput(rejection.body_text()))?;
    if query.trim().is_empty() {
        return Err(RequestError::ClientInput("query must not be empty".into()));
    }
    if pdf_content.trim().is_empty() {
        return Err(RequestError::ClientInput(
            "pdf_content must not be empty".into(),
        ));
    }

    tracing::info!(
        query_chars = query.chars().count(),
        document_len = pdf_content.len(),
        "Review request accepted"
    );
    let events = service.start_review(ReviewRequest {
        query,
        document: pdf_content,
    });
    let frames = encode(events).map(|frame| Ok::<_, Infallible>(Event::default().data(frame.payload())));

    Ok(([("x-accel-buffering", "no")], Sse::new(frames)).into_response())
}

/// Response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    checked_at: Option<String>,
}

async fn health() -> Json<HealthResponse> {
    let now = OffsetDateTime::now_utc();
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        timestamp: now.unix_timestamp(),
        checked_at: now.format(&Rfc3339).ok(),
    })
}

async fn describe_service() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "endpoints": {
            "review": "/paper_review",
            "health": "/health",
            "metrics": "/metrics",
            "commands": "/commands",
        },
    }))
}

/// Return a snapshot of review counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: ReviewApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "paper_review",
                method: "POST",
                path: "/paper_review",
                description: "Review a base64-encoded PDF. Streams text/event-stream chat-completion chunks with progress, keep-alives and the final report, then `data: [DONE]`.",
                request_example: Some(json!({
                    "query": "Please review this paper with a focus on methodology.",
                    "pdf_content": "data:application/pdf;base64,JVBERi0xLjQK..."
                })),
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/health",
                description: "Liveness probe returning the service name and a timestamp.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return review counters and the embedding transport in force.",
                request_example: None,
            },
        ],
    })
}

/// Request rejected before a review starts.
#[derive(Debug, Error)]
enum RequestError {
    #[error("{0}")]
    ClientInput(String),
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let RequestError::ClientInput(message) = &self;
        tracing::warn!(error = %message, "Rejected review request");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "message": message,
                    "type": "invalid_request_error",
                }
            })),
        )
            .into_response()
    }
}

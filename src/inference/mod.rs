//! Text inference collaborators.
//!
//! The review pipeline only depends on [`InferenceClient`]. The bundled adapter speaks the
//! OpenAI-compatible chat completion protocol, picks the model by [`ModelTier`], and
//! retries timeouts and transport failures with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::Config;

/// Errors surfaced by inference providers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    /// The call did not finish within its timeout.
    #[error("inference timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// Network failure or an error status from the provider.
    #[error("inference transport failure: {0}")]
    Transport(String),
    /// The provider answered without usable content.
    #[error("malformed inference response: {0}")]
    MalformedResponse(String),
}

impl InferenceError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Timeout(_) | InferenceError::Transport(_))
    }
}

/// Model class requested for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Fast general-purpose model.
    Standard,
    /// Slower model for long-form reasoning.
    Reasoning,
}

/// Pipeline step issuing an inference call, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceTask {
    /// Structured section extraction.
    ParseDocument,
    /// Key-term extraction.
    KeyTerms,
    /// Innovation assessment.
    Innovation,
    /// Multi-dimensional evaluation.
    Evaluation,
    /// Final report.
    Report,
}

impl InferenceTask {
    /// Stable name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            InferenceTask::ParseDocument => "parse_document",
            InferenceTask::KeyTerms => "key_terms",
            InferenceTask::Innovation => "innovation",
            InferenceTask::Evaluation => "evaluation",
            InferenceTask::Report => "report",
        }
    }
}

/// One inference call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Step issuing the call.
    pub task: InferenceTask,
    /// Full prompt text.
    pub prompt: String,
    /// Model class.
    pub tier: ModelTier,
    /// Sampling temperature.
    pub temperature: f32,
    /// Budget of a single attempt.
    pub timeout: Duration,
}

/// Interface implemented by text inference providers.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Produce a completion for the request.
    async fn complete(&self, request: InferenceRequest) -> Result<String, InferenceError>;
}

/// Chat completion client for OpenAI-compatible endpoints.
pub struct OpenAiCompatibleClient {
    http: Client,
    endpoint: String,
    api_key: String,
    standard_model: String,
    reasoning_model: String,
    max_attempts: u32,
    retry_base: Duration,
}

impl OpenAiCompatibleClient {
    /// Build a client from configuration.
    pub fn from_config(config: &Config) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .user_agent("rusty-review/inference")
            .build()
            .map_err(|error| InferenceError::Transport(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.llm_api_endpoint.clone(),
            api_key: config.llm_api_key.clone(),
            standard_model: config.llm_model.clone(),
            reasoning_model: config.llm_reasoning_model.clone(),
            max_attempts: config.llm_max_retries.max(1),
            retry_base: Duration::from_secs(1),
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Standard => &self.standard_model,
            ModelTier::Reasoning => &self.reasoning_model,
        }
    }

    async fn attempt(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let payload = json!({
            "model": self.model(request.tier),
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
            "stream": false,
        });

        let response = self
            .http
            .post(self.url())
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    InferenceError::Timeout(request.timeout)
                } else {
                    InferenceError::Transport(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Transport(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: ChatCompletion = response.json().await.map_err(|error| {
            InferenceError::MalformedResponse(format!("failed to decode completion: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InferenceError::MalformedResponse("completion has no content".into()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl InferenceClient for OpenAiCompatibleClient {
    async fn complete(&self, request: InferenceRequest) -> Result<String, InferenceError> {
        let mut attempt = 0;
        loop {
            match self.attempt(&request).await {
                Ok(content) => return Ok(content),
                Err(error) if error.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.retry_base * 2_u32.pow(attempt);
                    tracing::warn!(
                        task = request.task.as_str(),
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        error = %error,
                        "Inference call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(task = request.task.as_str(), error = %error, "Inference call failed");
                    return Err(error);
                }
            }
        }
    }
}

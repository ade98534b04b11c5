use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_SEMANTIC_SCHOLAR_URL: &str = "https://api.semanticscholar.org/graph/v1";
const DEFAULT_OPENALEX_URL: &str = "https://api.openalex.org";
const SEARCH_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed or failed validation.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Rusty Review server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the OpenAI-compatible chat completion API.
    pub llm_api_endpoint: String,
    /// Bearer token sent to the chat completion API.
    pub llm_api_key: String,
    /// Model used for standard-tier inference calls.
    pub llm_model: String,
    /// Model used for reasoning-tier inference calls.
    pub llm_reasoning_model: String,
    /// Default per-request timeout for inference calls.
    pub llm_request_timeout: Duration,
    /// Maximum attempts per inference call on retryable failures.
    pub llm_max_retries: u32,
    /// Base URL of the embedding API; `None` disables re-ranking.
    pub embedding_api_endpoint: Option<String>,
    /// Optional bearer token for the embedding API.
    pub embedding_api_key: Option<String>,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors (used for zero-vector placeholders).
    pub embedding_dimension: usize,
    /// Per-request timeout for embedding calls.
    pub embedding_request_timeout: Duration,
    /// Base URL of the primary record-search provider.
    pub primary_search_url: String,
    /// Optional API key for the primary record-search provider.
    pub primary_search_api_key: Option<String>,
    /// Base URL of the secondary record-search provider.
    pub secondary_search_url: String,
    /// Optional contact address forwarded to the secondary provider.
    pub secondary_search_mailto: Option<String>,
    /// Per-request timeout for record-search calls.
    pub search_request_timeout: Duration,
    /// Budget of the document parse stage.
    pub parse_timeout: Duration,
    /// Budget of the key-term extraction stage.
    pub key_term_timeout: Duration,
    /// Budget of the retrieval stage as a whole.
    pub retrieval_timeout: Duration,
    /// Budget of a single retrieval branch including failover.
    pub branch_timeout: Duration,
    /// Budget of each call made by the analysis stage.
    pub analysis_timeout: Duration,
    /// Budget of the evaluation stage.
    pub evaluation_timeout: Duration,
    /// Budget of the report stage.
    pub report_timeout: Duration,
    /// Wall-clock budget of one whole review request.
    pub global_deadline: Duration,
    /// Period between keep-alive frames while a stage is running.
    pub heartbeat_interval: Duration,
    /// Page size requested from each retrieval branch.
    pub max_candidates_per_branch: usize,
    /// Number of fused candidates kept after re-ranking.
    pub max_fused_candidates: usize,
    /// Attempts made against the primary provider before failing over.
    pub search_max_attempts: u32,
    /// Base delay of the capped exponential search backoff.
    pub search_backoff_base: Duration,
    /// Upper bound of the search backoff.
    pub search_backoff_cap: Duration,
    /// Whether the related-record retrieval stage runs at all.
    pub retrieval_enabled: bool,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_endpoint: String::new(),
            llm_api_key: String::new(),
            llm_model: String::new(),
            llm_reasoning_model: String::new(),
            llm_request_timeout: Duration::from_secs(120),
            llm_max_retries: 3,
            embedding_api_endpoint: None,
            embedding_api_key: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: 1024,
            embedding_request_timeout: Duration::from_secs(30),
            primary_search_url: DEFAULT_SEMANTIC_SCHOLAR_URL.to_string(),
            primary_search_api_key: None,
            secondary_search_url: DEFAULT_OPENALEX_URL.to_string(),
            secondary_search_mailto: None,
            search_request_timeout: Duration::from_secs(30),
            parse_timeout: Duration::from_secs(360),
            key_term_timeout: Duration::from_secs(240),
            retrieval_timeout: Duration::from_secs(180),
            branch_timeout: Duration::from_secs(120),
            analysis_timeout: Duration::from_secs(120),
            evaluation_timeout: Duration::from_secs(480),
            report_timeout: Duration::from_secs(240),
            global_deadline: Duration::from_secs(1200),
            heartbeat_interval: Duration::from_secs(15),
            max_candidates_per_branch: 5,
            max_fused_candidates: 10,
            search_max_attempts: 2,
            search_backoff_base: Duration::from_millis(1000),
            search_backoff_cap: SEARCH_BACKOFF_CAP,
            retrieval_enabled: true,
            server_port: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Blank values are treated as absent. Legacy variable names are consulted when the
    /// preferred name is not set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Lookup(lookup);
        let defaults = Self::default();

        let llm_model = vars.required(&["SCI_LLM_MODEL", "LLM_MODEL"])?;
        let config = Self {
            llm_api_endpoint: vars.required(&["SCI_MODEL_BASE_URL", "LLM_API_ENDPOINT"])?,
            llm_api_key: vars.required(&["SCI_MODEL_API_KEY", "LLM_API_KEY"])?,
            llm_reasoning_model: vars
                .optional(&["SCI_LLM_REASONING_MODEL"])
                .unwrap_or_else(|| llm_model.clone()),
            llm_model,
            llm_request_timeout: vars
                .seconds("LLM_REQUEST_TIMEOUT")?
                .unwrap_or(defaults.llm_request_timeout),
            llm_max_retries: vars.parsed("MAX_RETRIES")?.unwrap_or(defaults.llm_max_retries),
            embedding_api_endpoint: vars
                .optional(&["SCI_EMBEDDING_BASE_URL", "EMBEDDING_API_ENDPOINT"]),
            embedding_api_key: vars.optional(&["SCI_EMBEDDING_API_KEY", "EMBEDDING_API_KEY"]),
            embedding_model: vars
                .optional(&["SCI_EMBEDDING_MODEL", "EMBEDDING_MODEL_NAME"])
                .unwrap_or(defaults.embedding_model),
            embedding_dimension: vars
                .parsed("EMBEDDING_DIMENSION")?
                .unwrap_or(defaults.embedding_dimension),
            embedding_request_timeout: vars
                .seconds("EMBEDDING_TIMEOUT")?
                .unwrap_or(defaults.embedding_request_timeout),
            primary_search_url: vars
                .optional(&["SEMANTIC_SCHOLAR_URL"])
                .unwrap_or(defaults.primary_search_url),
            primary_search_api_key: vars.optional(&["SEMANTIC_SCHOLAR_API_KEY"]),
            secondary_search_url: vars
                .optional(&["OPENALEX_URL"])
                .unwrap_or(defaults.secondary_search_url),
            secondary_search_mailto: vars.optional(&["OPENALEX_MAILTO"]),
            search_request_timeout: vars
                .seconds("SEMANTIC_SCHOLAR_TIMEOUT")?
                .unwrap_or(defaults.search_request_timeout),
            parse_timeout: vars
                .seconds("PDF_PARSE_TIMEOUT")?
                .unwrap_or(defaults.parse_timeout),
            key_term_timeout: vars
                .seconds("KEY_EXTRACTION_TIMEOUT")?
                .unwrap_or(defaults.key_term_timeout),
            retrieval_timeout: vars
                .seconds("RETRIEVAL_TIMEOUT")?
                .unwrap_or(defaults.retrieval_timeout),
            branch_timeout: vars
                .seconds("RETRIEVAL_BRANCH_TIMEOUT")?
                .unwrap_or(defaults.branch_timeout),
            analysis_timeout: vars
                .seconds("SEMANTIC_ANALYSIS_TIMEOUT")?
                .unwrap_or(defaults.analysis_timeout),
            evaluation_timeout: vars
                .seconds("EVALUATION_TIMEOUT")?
                .unwrap_or(defaults.evaluation_timeout),
            report_timeout: vars
                .seconds("REPORT_GENERATION_TIMEOUT")?
                .unwrap_or(defaults.report_timeout),
            global_deadline: vars
                .seconds("REVIEW_TIMEOUT")?
                .unwrap_or(defaults.global_deadline),
            heartbeat_interval: vars
                .seconds("HEARTBEAT_INTERVAL")?
                .unwrap_or(defaults.heartbeat_interval),
            max_candidates_per_branch: vars
                .parsed("MAX_PAPERS_PER_QUERY")?
                .unwrap_or(defaults.max_candidates_per_branch),
            max_fused_candidates: vars
                .parsed("MAX_TOTAL_PAPERS")?
                .unwrap_or(defaults.max_fused_candidates),
            search_max_attempts: vars
                .parsed("SEMANTIC_SCHOLAR_MAX_RETRIES")?
                .unwrap_or(defaults.search_max_attempts),
            search_backoff_base: vars
                .parsed::<u64>("SEARCH_BACKOFF_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.search_backoff_base),
            search_backoff_cap: defaults.search_backoff_cap,
            retrieval_enabled: vars
                .flag("REVIEW_RETRIEVAL_ENABLED")?
                .unwrap_or(defaults.retrieval_enabled),
            server_port: vars.parsed("SERVER_PORT")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make the pipeline unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("LLM_REQUEST_TIMEOUT", self.llm_request_timeout),
            ("EMBEDDING_TIMEOUT", self.embedding_request_timeout),
            ("SEMANTIC_SCHOLAR_TIMEOUT", self.search_request_timeout),
            ("PDF_PARSE_TIMEOUT", self.parse_timeout),
            ("KEY_EXTRACTION_TIMEOUT", self.key_term_timeout),
            ("RETRIEVAL_TIMEOUT", self.retrieval_timeout),
            ("RETRIEVAL_BRANCH_TIMEOUT", self.branch_timeout),
            ("SEMANTIC_ANALYSIS_TIMEOUT", self.analysis_timeout),
            ("EVALUATION_TIMEOUT", self.evaluation_timeout),
            ("REPORT_GENERATION_TIMEOUT", self.report_timeout),
            ("REVIEW_TIMEOUT", self.global_deadline),
            ("HEARTBEAT_INTERVAL", self.heartbeat_interval),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::InvalidValue(format!("{key} must be positive")));
        }

        if self.heartbeat_interval >= self.global_deadline {
            return Err(ConfigError::InvalidValue(
                "HEARTBEAT_INTERVAL must be shorter than REVIEW_TIMEOUT".into(),
            ));
        }
        if self.max_candidates_per_branch == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_PAPERS_PER_QUERY must be positive".into(),
            ));
        }
        if self.max_fused_candidates == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TOTAL_PAPERS must be positive".into(),
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue(
                "EMBEDDING_DIMENSION must be positive".into(),
            ));
        }
        if self.search_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "SEMANTIC_SCHOLAR_MAX_RETRIES must be positive".into(),
            ));
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|key| (self.0)(key).filter(|value| !value.trim().is_empty()))
            .map(|value| value.trim().to_string())
    }

    fn required(&self, keys: &[&str]) -> Result<String, ConfigError> {
        self.optional(keys)
            .ok_or_else(|| ConfigError::MissingVariable(keys.join(" or ")))
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional(&[key])
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
    }

    fn seconds(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_secs))
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.optional(&[key])
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue(key.to_string())),
            })
            .transpose()
    }
}

/// Global configuration cache populated during process start.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
///
/// Returns the installed configuration so callers can hand it to long-lived services.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        llm_api_endpoint = %config.llm_api_endpoint,
        llm_model = %config.llm_model,
        reasoning_model = %config.llm_reasoning_model,
        embedding_enabled = config.embedding_api_endpoint.is_some(),
        retrieval_enabled = config.retrieval_enabled,
        global_deadline_secs = config.global_deadline.as_secs(),
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

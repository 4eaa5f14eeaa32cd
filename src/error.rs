use thiserror::Error;

/// Errors from the calendar scraper.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to launch or drive browser: {0}")]
    Browser(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("bot challenge page served instead of the calendar")]
    BotChallenge,

    #[error("permanent HTTP error {0}")]
    PermanentHttp(u16),

    #[error("calendar page structure not recognized: {0}")]
    PageStructure(String),

    #[error("scrape cancelled")]
    Cancelled,
}

impl ScrapeError {
    /// Transient failures are retried with backoff; the rest abort the week.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::Navigation { .. } | ScrapeError::BotChallenge
        )
    }
}

/// Errors from the forum API client.
#[derive(Debug, Error)]
pub enum ForumError {
    #[error("forum authentication failed: {0}")]
    Auth(String),

    #[error("forum request failed: {0}")]
    Network(String),

    #[error("forum returned HTTP {0}")]
    Status(u16),

    #[error("could not decode forum response: {0}")]
    Decode(String),

    #[error("forum fetch cancelled")]
    Cancelled,
}

impl ForumError {
    pub fn is_transient(&self) -> bool {
        match self {
            ForumError::Network(_) => true,
            ForumError::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Errors from the LLM provider call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API key is not configured")]
    MissingApiKey,

    #[error("LLM rate limit exceeded")]
    RateLimited,

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM network error: {0}")]
    Network(String),

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM response could not be decoded: {0}")]
    InvalidResponse(String),

    #[error("LLM call cancelled")]
    Cancelled,
}

impl LlmError {
    /// Only quota-style failures are worth retrying; plain API errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited | LlmError::Timeout | LlmError::Network(_)
        )
    }
}

/// Errors from the image download path.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image download timed out")]
    Timeout,

    #[error("image fetch failed with HTTP {0}")]
    Permanent(u16),

    #[error("transient image fetch failure: {0}")]
    Transient(String),

    #[error("image download cancelled")]
    Cancelled,
}

impl ImageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ImageError::Timeout | ImageError::Transient(_))
    }
}

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("no dry-run transaction is active")]
    NoDryRun,
}

/// Errors from pair aggregation.
#[derive(Debug, Error)]
pub enum PairError {
    #[error("unsupported currency pair: {0}")]
    BadPair(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the backfill driver.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("checkpoint I/O failed: {0}")]
    Checkpoint(#[from] std::io::Error),

    #[error("checkpoint is not valid JSON: {0}")]
    CheckpointFormat(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),
}

/// Errors raised while assembling configuration at the process boundary.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidVar { var: &'static str, value: String },
}

//! Process-boundary configuration. All environment access happens here;
//! the rest of the crate receives plain structs.

use std::env;

use crate::error::ConfigError;

/// Channels harvested when the CLI does not override the list.
pub const DEFAULT_CHANNELS: &[&str] = &[
    "wallstreetbets",
    "stocks",
    "investing",
    "options",
    "Economics",
    "finance",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub llm: LlmConfig,
    pub forum: ForumConfig,
    pub scraper: ScraperConfig,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
    pub max_overflow: u32,
}

impl DbConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }

    /// Hard connection ceiling: steady pool plus burst overflow.
    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Checked at analyzer construction, not here, so non-analyze runs
    /// work without a key.
    pub api_key: Option<String>,
    pub model: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub image_timeout_secs: u64,
    pub image_max_attempts: u32,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct ForumConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub headless: bool,
    pub sandbox: bool,
    pub request_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_retries: u32,
    pub nav_timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            request_delay_ms: 1800,
            jitter_ms: 700,
            max_retries: 3,
            nav_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Build configuration from the environment (after `dotenvy` has run).
    pub fn from_env() -> Result<Self, ConfigError> {
        let db = DbConfig {
            host: optional("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parsed("DB_PORT", 5432)?,
            name: required("DB_NAME")?,
            user: required("DB_USER")?,
            password: required("DB_PASSWORD")?,
            pool_size: parsed("DB_POOL_SIZE", 5)?,
            max_overflow: parsed("DB_MAX_OVERFLOW", 5)?,
        };

        let llm = LlmConfig {
            api_key: optional("LLM_API_KEY"),
            model: optional("LLM_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            max_retries: 3,
            base_delay_ms: 1000,
            image_timeout_secs: 10,
            image_max_attempts: 3,
            batch_size: 4,
        };

        let forum = ForumConfig {
            client_id: optional("FORUM_CLIENT_ID"),
            client_secret: optional("FORUM_CLIENT_SECRET"),
            user_agent: optional("FORUM_USER_AGENT")
                .unwrap_or_else(|| "fx-sentinel/0.1 (sentiment research)".to_string()),
            requests_per_minute: 60,
        };

        let scraper = ScraperConfig {
            headless: parsed_bool("SCRAPER_HEADLESS", true)?,
            ..ScraperConfig::default()
        };

        Ok(Self {
            db,
            llm,
            forum,
            scraper,
        })
    }
}

fn optional(var: &'static str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.is_empty())
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    optional(var).ok_or(ConfigError::MissingVar(var))
}

fn parsed<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(var) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar { var, value: raw }),
    }
}

fn parsed_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(var) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidVar { var, value: raw }),
        },
    }
}

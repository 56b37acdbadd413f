//! Runtime configuration
//!
//! Everything is read once from the environment (after `.env` is loaded by
//! the binary) and handed to components explicitly.

use crate::error::CareError;
use crate::Result;
use std::env;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Text-analysis client settings
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    pub fn has_api_key(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && key != "your_gemini_api_key_here"
    }
}

/// Retry policy for transient classifier failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(10);
        self.backoff_base.saturating_mul(factor)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini: GeminiConfig,
    pub retry: RetryConfig,
    pub database_url: Option<String>,
    pub port: u16,
    pub job_queue_capacity: usize,
    pub job_max_attempts: u32,
    pub rollup_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut gemini = GeminiConfig::new(env::var("GEMINI_API_KEY").unwrap_or_default());
        if let Ok(model) = env::var("GEMINI_MODEL") {
            gemini.model = model;
        }
        if let Ok(base_url) = env::var("GEMINI_BASE_URL") {
            gemini.base_url = base_url;
        }
        gemini.timeout = Duration::from_secs(parse_var("GEMINI_TIMEOUT_SECS", 20)?);

        let retry = RetryConfig {
            max_retries: parse_var("CLASSIFIER_MAX_RETRIES", 3)?,
            backoff_base: Duration::from_millis(parse_var("CLASSIFIER_BACKOFF_MS", 500)?),
        };

        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("POSTGRES_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw
                .parse()
                .map_err(|e| CareError::Config(format!("PORT={}: {}", raw, e)))?,
            Err(_) => 8080,
        };

        Ok(Self {
            gemini,
            retry,
            database_url,
            port,
            job_queue_capacity: parse_var("JOB_QUEUE_CAPACITY", 256)?,
            job_max_attempts: parse_var("JOB_MAX_ATTEMPTS", 3)?,
            rollup_interval: Duration::from_secs(parse_var("ROLLUP_INTERVAL_SECS", 3600)?),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| CareError::Config(format!("{}={}: {}", name, raw, e))),
        _ => Ok(default),
    }
}

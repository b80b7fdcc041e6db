use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} has an unparsable value: {value:?}")]
    Unparsable { key: String, value: String },
    #[error("{0}")]
    Invalid(String),
}

/// Tunables for the escalation gates, judge calls and log persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum judged confidence for a generated answer to be auto-resolved.
    pub confidence_threshold: f64,
    /// Upper bound for every judge / retriever call.
    pub call_timeout: Duration,
    /// Upper bound for a single store insert.
    pub log_timeout: Duration,
    pub judge_max_retries: u32,
    /// Base of the `base * 2^attempt` backoff between judge retries.
    pub judge_backoff_base: Duration,
    pub log_max_retries: u32,
    /// Base of the `base * 2^attempt` backoff between log persistence retries.
    pub log_retry_base_delay: Duration,
    pub classifier_history_window: usize,
    pub generator_history_window: usize,
    pub max_query_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.68,
            call_timeout: Duration::from_secs(30),
            log_timeout: Duration::from_secs(30),
            judge_max_retries: 3,
            judge_backoff_base: Duration::from_secs(1),
            log_max_retries: 3,
            log_retry_base_delay: Duration::from_secs(5),
            classifier_history_window: 5,
            generator_history_window: 10,
            max_query_chars: 2000,
        }
    }
}

impl PipelineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "confidence_threshold must be in [0.0, 1.0]".into(),
            ));
        }
        if self.call_timeout.is_zero() || self.log_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be > 0".into()));
        }
        if self.judge_max_retries == 0 || self.log_max_retries == 0 {
            return Err(ConfigError::Invalid("retry caps must be > 0".into()));
        }
        if self.max_query_chars == 0 {
            return Err(ConfigError::Invalid("max_query_chars must be > 0".into()));
        }
        Ok(())
    }

    /// Load from process environment, falling back to defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_key::<f64, _>(&lookup, "CONFIDENCE_THRESHOLD")? {
            config.confidence_threshold = v;
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, "API_TIMEOUT")? {
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, "LOG_TIMEOUT")? {
            config.log_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_key::<u32, _>(&lookup, "JUDGE_MAX_RETRIES")? {
            config.judge_max_retries = n;
        }
        if let Some(n) = parse_key::<u32, _>(&lookup, "LOG_MAX_RETRIES")? {
            config.log_max_retries = n;
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, "LOG_RETRY_DELAY")? {
            config.log_retry_base_delay = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_key<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable {
                key: key.to_string(),
                value: raw,
            }),
    }
}

/// Connection settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl JudgeSettings {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            api_key: lookup("OPENAI_API_KEY").unwrap_or_default(),
            model: lookup("OPENAI_MODEL").unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Required keys that are absent.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_key.trim().is_empty() {
            missing.push("OPENAI_API_KEY");
        }
        missing
    }
}

/// Where the evidence retriever lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverSettings {
    pub url: Option<String>,
}

impl RetrieverSettings {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("RETRIEVER_URL").ok().filter(|u| !u.trim().is_empty()),
        }
    }
}

//! Configuration loading and representation.
//!
//! Everything is read from the environment once at start-up. Unset values
//! fall back to defaults; values that are set but malformed are errors.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::jobs::{DispatchConfig, RetryPolicy};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-instruct";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPS_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid {expected}: {value:?}")]
    Malformed {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Job queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQueueConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub lease: Option<Duration>,
    pub fail_fast_permanent: bool,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            batch_size: 10,
            max_retries: 3,
            lease: None,
            fail_fast_permanent: false,
        }
    }
}

impl JobQueueConfig {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            batch_size: self.batch_size,
            lease: self.lease,
            fail_fast_permanent: self.fail_fast_permanent,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

/// Text-generation API settings.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

// Keeps the key out of logs.
impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub jobs: JobQueueConfig,
    pub generator: GeneratorConfig,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub ops_addr: SocketAddr,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = JobQueueConfig::default();

        let jobs = JobQueueConfig {
            interval: get("KOTOBA_JOB_INTERVAL_SECS")
                .map(|v| parse_positive_secs("KOTOBA_JOB_INTERVAL_SECS", v))
                .transpose()?
                .unwrap_or(defaults.interval),
            batch_size: get("KOTOBA_JOB_BATCH_SIZE")
                .map(|v| parse_number("KOTOBA_JOB_BATCH_SIZE", v))
                .transpose()?
                .unwrap_or(defaults.batch_size),
            max_retries: get("KOTOBA_JOB_MAX_RETRIES")
                .map(|v| parse_number("KOTOBA_JOB_MAX_RETRIES", v))
                .transpose()?
                .unwrap_or(defaults.max_retries),
            lease: get("KOTOBA_JOB_LEASE_SECS")
                .map(|v| parse_secs("KOTOBA_JOB_LEASE_SECS", v))
                .transpose()?,
            fail_fast_permanent: get("KOTOBA_FAIL_FAST_PERMANENT")
                .map(|v| parse_flag("KOTOBA_FAIL_FAST_PERMANENT", v))
                .transpose()?
                .unwrap_or(defaults.fail_fast_permanent),
        };

        let api_key = get("OPENAI_API_KEY");
        if api_key.is_none() {
            warn!("OPENAI_API_KEY not set; generation jobs will fail and be retried");
        }
        let generator = GeneratorConfig {
            api_key,
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: get("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };

        let database_url = get("DATABASE_URL");
        if database_url.is_none() {
            warn!("DATABASE_URL not set; using the in-memory store (nothing is persisted)");
        }

        let ops_addr = match get("KOTOBA_OPS_ADDR") {
            Some(value) => value.parse().map_err(|_| ConfigError::Malformed {
                var: "KOTOBA_OPS_ADDR",
                expected: "socket address",
                value,
            })?,
            None => default_ops_addr(),
        };

        Ok(Self {
            jobs,
            generator,
            database_url,
            ops_addr,
        })
    }
}

fn default_ops_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Malformed {
        var,
        expected: "non-negative integer",
        value,
    })
}

fn parse_secs(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    parse_number::<u64>(var, value).map(Duration::from_secs)
}

fn parse_positive_secs(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Malformed {
            var,
            expected: "positive integer",
            value,
        }),
    }
}

fn parse_flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Malformed {
            var,
            expected: "boolean",
            value,
        }),
    }
}

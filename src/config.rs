//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// User-facing texts written into `externalStatusMsg` / `externalErrorReason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeMessages {
    /// Shown for retryable business errors.
    pub retry_guidance: String,
    /// Shown for terminal business errors.
    pub failure: String,
    /// Shown when CM could not be reached at all.
    pub connectivity_retry: String,
    /// Written into the error-reason mirror on connectivity failures.
    pub connectivity_reason: String,
}

impl Default for OutcomeMessages {
    fn default() -> Self {
        Self {
            retry_guidance: "CM could not process the request right now. Retry the submission \
                             without changes."
                .to_string(),
            failure: "CM rejected the request. Correct the record and raise a new application."
                .to_string(),
            connectivity_retry: "CM is temporarily unavailable. Please try again.".to_string(),
            connectivity_reason: "CM connectivity failure".to_string(),
        }
    }
}

/// Workflow engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single CM call; expiry counts as a connectivity failure.
    pub gateway_timeout: Duration,
    /// How many times an activity append is attempted before giving up.
    pub activity_append_attempts: u32,
    /// Pause between activity append attempts.
    pub activity_retry_backoff: Duration,
    /// Interval of the background translation table rebuild.
    pub translation_refresh_interval: Duration,
    /// Retryable CM error codes. `CODE` matches exactly, `PREFIX*` by prefix.
    pub retryable_codes: Vec<String>,
    /// Outcome texts.
    pub messages: OutcomeMessages,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(30),
            activity_append_attempts: 3,
            activity_retry_backoff: Duration::from_millis(200),
            translation_refresh_interval: Duration::from_secs(3600), // 1 hour
            retryable_codes: vec![
                "CMONB1".to_string(),
                "CMONB2".to_string(),
                "CMTMP*".to_string(),
            ],
            messages: OutcomeMessages::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let gateway_timeout = Duration::from_secs(env_or(
            "ONBOARD_GATEWAY_TIMEOUT_SECS",
            defaults.gateway_timeout.as_secs(),
        )?);
        let activity_append_attempts = env_or(
            "ONBOARD_ACTIVITY_APPEND_ATTEMPTS",
            defaults.activity_append_attempts,
        )?;
        if activity_append_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARD_ACTIVITY_APPEND_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let activity_retry_backoff = Duration::from_millis(env_or(
            "ONBOARD_ACTIVITY_RETRY_BACKOFF_MS",
            defaults.activity_retry_backoff.as_millis() as u64,
        )?);
        let translation_refresh_interval = Duration::from_secs(env_or(
            "ONBOARD_TRANSLATION_REFRESH_SECS",
            defaults.translation_refresh_interval.as_secs(),
        )?);

        let retryable_codes = match std::env::var("ONBOARD_RETRYABLE_CODES") {
            Ok(raw) => split_list(&raw),
            Err(_) => defaults.retryable_codes,
        };

        Ok(Self {
            gateway_timeout,
            activity_append_attempts,
            activity_retry_backoff,
            translation_refresh_interval,
            retryable_codes,
            messages: defaults.messages,
        })
    }
}

/// Read and parse an environment variable, using `default` when unset.
pub(crate) fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated list, dropping blanks.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

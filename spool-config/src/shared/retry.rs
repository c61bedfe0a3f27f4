use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Backoff settings used when a producer fails to enqueue an item.
///
/// A failed attempt is retried after `initial_backoff_ms`, doubling up to `max_backoff_ms`,
/// with `jitter_percent` of random spread. After `max_attempts` failures the producer
/// abandons the rest of its batch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EnqueueRetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Random spread applied to each backoff, in percent (0-100).
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u8,
}

impl EnqueueRetryConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 10;

    pub const DEFAULT_MAX_BACKOFF_MS: u64 = 1_000;

    pub const DEFAULT_JITTER_PERCENT: u8 = 25;

    /// Validates the retry settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::EnqueueRetry(
                "`max_attempts` must be greater than zero".to_string(),
            ));
        }

        if self.jitter_percent > 100 {
            return Err(ValidationError::EnqueueRetry(
                "`jitter_percent` must be <= 100".to_string(),
            ));
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ValidationError::EnqueueRetry(
                "`initial_backoff_ms` must be <= `max_backoff_ms`".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for EnqueueRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: Self::DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: Self::DEFAULT_MAX_BACKOFF_MS,
            jitter_percent: Self::DEFAULT_JITTER_PERCENT,
        }
    }
}

fn default_max_attempts() -> u32 {
    EnqueueRetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    EnqueueRetryConfig::DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    EnqueueRetryConfig::DEFAULT_MAX_BACKOFF_MS
}

fn default_jitter_percent() -> u8 {
    EnqueueRetryConfig::DEFAULT_JITTER_PERCENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EnqueueRetryConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = EnqueueRetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn initial_backoff_above_max_is_rejected() {
        let config = EnqueueRetryConfig {
            initial_backoff_ms: 5_000,
            max_backoff_ms: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{EnqueueRetryConfig, ValidationError};

/// A producer and the ordered batch of items it submits.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProducerConfig {
    /// Name used to address the producer in logs and completion reports.
    pub name: String,
    /// Item contents, submitted in this order.
    #[serde(default)]
    pub items: Vec<String>,
}

impl ProducerConfig {
    pub fn new<N, I, S>(name: N, items: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

/// Configuration of a coordination session: one consumer, N producers, one bounded queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Number of slots in the work queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Producers started when the session starts.
    #[serde(default)]
    pub producers: Vec<ProducerConfig>,
    /// Destroys the consumer once the last producer reaches the barrier.
    #[serde(default)]
    pub enable_teardown_after_drain: bool,
    /// Delay between the suspend request and the teardown request.
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
    /// Upper bound between two checks of a producer's outstanding completions.
    #[serde(default = "default_drain_poll_interval_ms")]
    pub drain_poll_interval_ms: u64,
    /// Maximum wait for the enqueue mutex and for a free slot. Waits forever when unset.
    #[serde(default)]
    pub enqueue_timeout_ms: Option<u64>,
    /// Storage budget for one producer's batch, in items. A larger batch fails with an
    /// allocation error and only that producer is affected. Unbounded when unset.
    #[serde(default)]
    pub max_batch_items: Option<usize>,
    #[serde(default)]
    pub enqueue_retry: EnqueueRetryConfig,
}

impl SessionConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

    pub const DEFAULT_TEARDOWN_GRACE_MS: u64 = 100;

    pub const DEFAULT_DRAIN_POLL_INTERVAL_MS: u64 = 10;

    /// Creates a configuration with default settings for the given producers.
    pub fn with_producers(producers: Vec<ProducerConfig>) -> Self {
        Self {
            producers,
            ..Self::default()
        }
    }

    /// The two-sender print job: `sender1` submits five items, `sender2` two.
    pub fn reference() -> Self {
        let sender1 = ProducerConfig::new(
            "sender1",
            ["First", "Second", "Third", "Forth", "Fifth"]
                .iter()
                .map(|ordinal| format!("{ordinal} task of sender1")),
        );
        let sender2 = ProducerConfig::new(
            "sender2",
            ["First", "Second"]
                .iter()
                .map(|ordinal| format!("{ordinal} task of sender2")),
        );

        Self::with_producers(vec![sender1, sender2])
    }

    /// Validates the session settings, including every producer.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.queue_capacity == 0 {
            return Err(ValidationError::QueueCapacityZero);
        }

        if self.drain_poll_interval_ms == 0 {
            return Err(ValidationError::DrainPollIntervalZero);
        }

        validate_producers(&self.producers)?;
        self.enqueue_retry.validate()?;

        Ok(())
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn enqueue_timeout(&self) -> Option<Duration> {
        self.enqueue_timeout_ms.map(Duration::from_millis)
    }
}

/// Checks a set of producers started together: non-empty, named, names unique.
pub fn validate_producers(producers: &[ProducerConfig]) -> Result<(), ValidationError> {
    if producers.is_empty() {
        return Err(ValidationError::NoProducers);
    }

    let mut seen = HashSet::with_capacity(producers.len());
    for (position, producer) in producers.iter().enumerate() {
        if producer.name.trim().is_empty() {
            return Err(ValidationError::EmptyProducerName(position));
        }

        if !seen.insert(producer.name.as_str()) {
            return Err(ValidationError::DuplicateProducerName(
                producer.name.clone(),
            ));
        }
    }

    Ok(())
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            producers: Vec::new(),
            enable_teardown_after_drain: false,
            teardown_grace_ms: default_teardown_grace_ms(),
            drain_poll_interval_ms: default_drain_poll_interval_ms(),
            enqueue_timeout_ms: None,
            max_batch_items: None,
            enqueue_retry: EnqueueRetryConfig::default(),
        }
    }
}

impl Config for SessionConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

fn default_queue_capacity() -> usize {
    SessionConfig::DEFAULT_QUEUE_CAPACITY
}

fn default_teardown_grace_ms() -> u64 {
    SessionConfig::DEFAULT_TEARDOWN_GRACE_MS
}

fn default_drain_poll_interval_ms() -> u64 {
    SessionConfig::DEFAULT_DRAIN_POLL_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_matches_two_sender_job() {
        let config = SessionConfig::reference();
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.producers.len(), 2);
        assert_eq!(config.producers[0].items.len(), 5);
        assert_eq!(config.producers[0].items[3], "Forth task of sender1");
        assert_eq!(config.producers[1].items.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = SessionConfig {
            queue_capacity: 0,
            ..SessionConfig::reference()
        };
        assert_eq!(config.validate(), Err(ValidationError::QueueCapacityZero));
    }

    #[test]
    fn empty_producer_list_is_rejected() {
        let config = SessionConfig::default();
        assert_eq!(config.validate(), Err(ValidationError::NoProducers));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let config = SessionConfig::with_producers(vec![
            ProducerConfig::new("a", ["x"]),
            ProducerConfig::new("a", ["y"]),
        ]);
        assert_eq!(
            config.validate(),
            Err(ValidationError::DuplicateProducerName("a".to_string()))
        );
    }

    #[test]
    fn empty_batch_is_valid() {
        let config =
            SessionConfig::with_producers(vec![ProducerConfig::new("idle", Vec::<String>::new())]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"producers": [{"name": "sender1", "items": ["hello"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.queue_capacity, SessionConfig::DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.enqueue_timeout(), None);
        assert_eq!(config.max_batch_items, None);
        assert_eq!(config.enqueue_retry, EnqueueRetryConfig::default());
        assert!(!config.enable_teardown_after_drain);
    }
}

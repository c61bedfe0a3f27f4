use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The work queue needs at least one slot.
    #[error("`queue_capacity` must be greater than zero")]
    QueueCapacityZero,
    /// A session needs at least one producer to ever reach its barrier.
    #[error("`producers` must contain at least one producer")]
    NoProducers,
    /// Producers are addressed by name when completions are logged.
    #[error("producer at position {0} has an empty `name`")]
    EmptyProducerName(usize),
    /// Two producers share the same name.
    #[error("producer name `{0}` is used more than once")]
    DuplicateProducerName(String),
    /// A zero poll interval would turn the drain wait into a busy spin.
    #[error("`drain_poll_interval_ms` must be greater than zero")]
    DrainPollIntervalZero,
    /// Invalid enqueue retry configuration.
    #[error("invalid enqueue retry config: {0}")]
    EnqueueRetry(String),
}

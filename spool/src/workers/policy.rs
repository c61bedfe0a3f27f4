use crate::error::{ErrorKind, SpoolError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The operation can be retried after a backoff chosen by the worker.
    Timed,
    /// The operation must not be retried.
    NoRetry,
}

/// Policy describing how a [`SpoolError`] should be handled by workers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an operator-facing hint, if there is one.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds the [`ErrorHandlingPolicy`] for `error`.
pub fn build_error_handling_policy(error: &SpoolError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Contention on the mutex or a full queue clears up on its own.
        ErrorKind::EnqueueFailed => ErrorHandlingPolicy::new(RetryDirective::Timed, None),

        ErrorKind::AllocationError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Reduce the size of the producer's batch."),
        ),
        ErrorKind::UnknownWorker => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Start a new session, the consumer of this one no longer exists."),
        ),
        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the session configuration and start again."),
        ),

        _ => ErrorHandlingPolicy::new(RetryDirective::NoRetry, None),
    }
}

//! Shared configuration types for spool sessions.

mod base;
mod retry;
mod session;

pub use base::ValidationError;
pub use retry::EnqueueRetryConfig;
pub use session::{ProducerConfig, SessionConfig, validate_producers};

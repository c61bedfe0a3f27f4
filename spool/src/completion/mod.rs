//! Routing of per-item completions back to the producer that owns the item.

pub mod dispatcher;
pub mod tracker;

pub use dispatcher::{CompletionDispatcher, Mailbox};
pub use tracker::ProducerProgress;

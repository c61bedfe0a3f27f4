//! Outward reporting of producer progress and terminal producer errors.

mod base;
pub mod memory;

pub use base::CompletionSink;

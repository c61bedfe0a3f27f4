//! The side-effecting action the consumer performs on every item.
//!
//! The core treats printing as opaque. A failing or panicking [`Printer`] is logged and
//! counted by the consumer, and the item still completes.

mod base;
pub mod memory;

pub use base::Printer;

use std::future::Future;

use crate::error::SpoolResult;
use crate::types::Item;

/// Performs the work the queue exists for.
///
/// The consumer calls [`Printer::print`] for one item at a time, in global enqueue order.
/// The item is only borrowed: the consumer drops it right after the call returns and before
/// the owning producer is notified, so implementations must copy out anything they keep.
pub trait Printer {
    /// Returns the name of the printer, used in logs.
    fn name() -> &'static str;

    fn print(&self, item: &Item) -> impl Future<Output = SpoolResult<()>> + Send;
}

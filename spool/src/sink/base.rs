use std::future::Future;

use crate::error::{SpoolError, SpoolResult};
use crate::types::Completion;

/// Receives what producers learn about their batches.
///
/// [`CompletionSink::on_completion`] is called once per processed item, from the owning
/// producer's completion handler, before the producer's outstanding count is decremented.
/// Calls for different producers may run concurrently. Terminal producer errors (an
/// abandoned batch, a failed allocation, a destroyed consumer) are always reported through
/// [`CompletionSink::on_error`] before the producer reaches the barrier.
///
/// A failing sink is logged and does not affect the coordination protocol.
pub trait CompletionSink {
    fn on_completion(
        &self,
        producer: &str,
        completion: &Completion,
    ) -> impl Future<Output = SpoolResult<()>> + Send;

    fn on_error(
        &self,
        producer: &str,
        error: &SpoolError,
    ) -> impl Future<Output = SpoolResult<()>> + Send;
}

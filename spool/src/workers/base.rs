use std::future::Future;

use crate::error::SpoolResult;

/// A background worker that can be started once.
///
/// `H` is the handle returned when the worker starts and `S` the state observable
/// through it.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type returned when worker startup fails.
    type Error;

    /// Spawns the worker and returns immediately with its handle.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle to a running worker.
///
/// The handle stays valid after the worker finishes, so its final state can still be read.
pub trait WorkerHandle<S> {
    /// What the worker returns when it finishes.
    type Output;

    /// Returns a snapshot of the worker's state.
    fn state(&self) -> S;

    /// Waits for the worker to finish. Panics inside the worker are returned as errors.
    fn wait(self) -> impl Future<Output = SpoolResult<Self::Output>> + Send;
}

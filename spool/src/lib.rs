//! Coordination core for a bounded print queue shared by many producers and one consumer.
//!
//! Producers submit ordered batches through a fixed-capacity [`concurrency::queue::WorkQueue`]
//! guarded by a pair of slot semaphores and an [`concurrency::enqueue::EnqueueMutex`]. The
//! single consumer drains the queue, hands every item to a [`printer::Printer`] and routes a
//! completion back to the producer that owns the item. Once every producer of a round has
//! drained its batch the shared [`concurrency::barrier::Barrier`] releases and the consumer
//! is suspended (and optionally torn down) through the [`concurrency::lifecycle`] authority.

pub mod completion;
pub mod concurrency;
pub mod error;
mod macros;
pub mod metrics;
pub mod printer;
pub mod session;
pub mod sink;
pub mod types;
pub mod workers;

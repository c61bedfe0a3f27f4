//! Synchronization primitives shared by the producers and the consumer.
//!
//! # Coordination Patterns
//!
//! ## Bounded admission
//!
//! The [`queue`] module holds the fixed-capacity FIFO together with its two slot
//! semaphores. A producer can only publish into a slot it reserved, and the consumer can
//! only pop an item whose slot was signalled filled, so the queue never overflows and never
//! yields an empty read.
//!
//! ## Serialized enqueue
//!
//! The [`enqueue`] module wraps reserve, publish and signal in one critical section, which
//! gives every item a single position in the global enqueue order.
//!
//! ## Round completion
//!
//! The [`barrier`] counts producers that finished draining their batch, and the
//! [`lifecycle`] authority decides whether the consumer may be suspended or destroyed when
//! the count reaches zero.

pub mod barrier;
pub mod enqueue;
pub mod lifecycle;
pub mod queue;

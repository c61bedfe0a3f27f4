//! The consumer and producer workers and the pool that tracks producers.

pub mod base;
pub mod consumer;
pub mod policy;
pub mod pool;
pub mod producer;

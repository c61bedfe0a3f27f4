use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};

/// Result of a producer arriving at the [`Barrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierArrival {
    /// Other producers have not arrived yet.
    Waiting { remaining: usize },
    /// This arrival brought the barrier to zero. Happens exactly once per barrier.
    Released,
}

/// Countdown shared by the producers of one round.
///
/// Starts at the number of producers and is decremented once by each of them after its
/// batch is drained. It never goes below zero and is never incremented.
#[derive(Debug)]
pub struct Barrier {
    remaining: AtomicUsize,
}

impl Barrier {
    pub fn new(parties: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(parties),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Decrements the barrier.
    ///
    /// Fails with [`ErrorKind::InvalidState`] if every party already arrived.
    pub fn arrive(&self) -> SpoolResult<BarrierArrival> {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            });

        match previous {
            Ok(1) => Ok(BarrierArrival::Released),
            Ok(previous) => Ok(BarrierArrival::Waiting {
                remaining: previous - 1,
            }),
            Err(_) => bail!(
                ErrorKind::InvalidState,
                "Barrier decremented more times than it has parties"
            ),
        }
    }
}

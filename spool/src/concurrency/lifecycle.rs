//! Single authority over the consumer's lifecycle.
//!
//! The lifecycle lives in one `watch` channel value and every transition is a
//! compare-and-set performed inside [`watch::Sender::send_if_modified`], so checking the
//! current state and changing it is one atomic step. Producers never flip the state
//! directly: they hold a [`LifecycleLease`] while they have work in the queue, and a
//! suspend or teardown request is only honoured when no lease is outstanding. A terminal
//! producer's late suspend can therefore never park a consumer that another producer has
//! just resumed.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};
use crate::metrics::{SPOOL_CONSUMER_TRANSITIONS_TOTAL, STATE_LABEL};
use crate::types::ProducerId;

/// State of the consumer worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerState {
    Active,
    Suspended,
    Destroyed,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Active => "active",
            ConsumerState::Suspended => "suspended",
            ConsumerState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value guarded by the lifecycle authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    pub state: ConsumerState,
    /// Producers currently holding a lease.
    pub leases: usize,
    pub suspensions: u64,
    pub resumptions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendOutcome {
    Suspended,
    AlreadySuspended,
    /// Producers still hold leases; the consumer stays active.
    Deferred { leases: usize },
    AlreadyDestroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Destroyed,
    AlreadyDestroyed,
    /// Teardown is only valid from an unleased, suspended consumer.
    Rejected {
        state: ConsumerState,
        leases: usize,
    },
}

/// Handle to the lifecycle authority. Clones share the same state.
#[derive(Debug, Clone)]
pub struct ConsumerLifecycle {
    tx: Arc<watch::Sender<LifecycleSnapshot>>,
}

impl ConsumerLifecycle {
    /// Creates the authority with an active consumer.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleSnapshot {
            state: ConsumerState::Active,
            leases: 0,
            suspensions: 0,
            resumptions: 0,
        });

        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        *self.tx.borrow()
    }

    pub fn state(&self) -> ConsumerState {
        self.tx.borrow().state
    }

    /// Subscribes the consumer to state changes.
    pub fn subscribe(&self) -> LifecycleRx {
        LifecycleRx(self.tx.subscribe())
    }

    /// Registers `producer` as having work in flight, resuming a suspended consumer.
    ///
    /// Fails with [`ErrorKind::UnknownWorker`] once the consumer is destroyed.
    pub fn acquire_lease(
        &self,
        producer: ProducerId,
    ) -> SpoolResult<(LifecycleLease, ResumeOutcome)> {
        let outcome = self.resume_with(|snapshot| snapshot.leases += 1)?;
        debug!(%producer, ?outcome, "lifecycle lease acquired");

        Ok((
            LifecycleLease {
                lifecycle: self.clone(),
                producer,
            },
            outcome,
        ))
    }

    /// Resumes a suspended consumer without taking a lease.
    pub fn resume(&self) -> SpoolResult<ResumeOutcome> {
        self.resume_with(|_| {})
    }

    /// Asks the consumer to park once its current item is done.
    ///
    /// Idempotent, and ignored while any producer holds a lease.
    pub fn request_suspend(&self) -> SuspendOutcome {
        let mut outcome = SuspendOutcome::AlreadyDestroyed;
        self.tx.send_if_modified(|snapshot| {
            outcome = match snapshot.state {
                ConsumerState::Destroyed => SuspendOutcome::AlreadyDestroyed,
                ConsumerState::Suspended => SuspendOutcome::AlreadySuspended,
                ConsumerState::Active if snapshot.leases > 0 => SuspendOutcome::Deferred {
                    leases: snapshot.leases,
                },
                ConsumerState::Active => {
                    snapshot.state = ConsumerState::Suspended;
                    snapshot.suspensions += 1;
                    SuspendOutcome::Suspended
                }
            };

            outcome == SuspendOutcome::Suspended
        });

        match outcome {
            SuspendOutcome::Suspended => record_transition(ConsumerState::Suspended),
            SuspendOutcome::Deferred { leases } => {
                info!(leases, "suspend request deferred, producers still hold leases")
            }
            _ => debug!(?outcome, "suspend request had no effect"),
        }

        outcome
    }

    /// Destroys a suspended consumer that no producer holds a lease on.
    pub fn request_teardown(&self) -> TeardownOutcome {
        let mut outcome = TeardownOutcome::AlreadyDestroyed;
        self.tx.send_if_modified(|snapshot| {
            outcome = match (snapshot.state, snapshot.leases) {
                (ConsumerState::Destroyed, _) => TeardownOutcome::AlreadyDestroyed,
                (ConsumerState::Suspended, 0) => {
                    snapshot.state = ConsumerState::Destroyed;
                    TeardownOutcome::Destroyed
                }
                (state, leases) => TeardownOutcome::Rejected { state, leases },
            };

            outcome == TeardownOutcome::Destroyed
        });

        match outcome {
            TeardownOutcome::Destroyed => record_transition(ConsumerState::Destroyed),
            TeardownOutcome::Rejected { state, leases } => {
                warn!(%state, leases, "teardown request rejected")
            }
            TeardownOutcome::AlreadyDestroyed => debug!("consumer already destroyed"),
        }

        outcome
    }

    /// Destroys the consumer from any state. Returns whether this call destroyed it.
    pub(crate) fn force_destroy(&self) -> bool {
        let destroyed = self.tx.send_if_modified(|snapshot| {
            if snapshot.state == ConsumerState::Destroyed {
                return false;
            }
            snapshot.state = ConsumerState::Destroyed;
            true
        });

        if destroyed {
            record_transition(ConsumerState::Destroyed);
        }

        destroyed
    }

    fn resume_with(
        &self,
        on_success: impl FnOnce(&mut LifecycleSnapshot),
    ) -> SpoolResult<ResumeOutcome> {
        let mut result = None;
        self.tx.send_if_modified(|snapshot| match snapshot.state {
            ConsumerState::Destroyed => false,
            ConsumerState::Active => {
                on_success(snapshot);
                result = Some(ResumeOutcome::AlreadyActive);
                false
            }
            ConsumerState::Suspended => {
                snapshot.state = ConsumerState::Active;
                snapshot.resumptions += 1;
                on_success(snapshot);
                result = Some(ResumeOutcome::Resumed);
                true
            }
        });

        match result {
            Some(ResumeOutcome::Resumed) => {
                record_transition(ConsumerState::Active);
                Ok(ResumeOutcome::Resumed)
            }
            Some(outcome) => Ok(outcome),
            None => bail!(
                ErrorKind::UnknownWorker,
                "The consumer worker has been destroyed"
            ),
        }
    }

    fn release_lease(&self, producer: ProducerId) {
        // Lease counts are read only inside transitions, so the consumer is not woken.
        self.tx.send_if_modified(|snapshot| {
            snapshot.leases = snapshot.leases.saturating_sub(1);
            false
        });
        debug!(%producer, "lifecycle lease released");
    }
}

impl Default for ConsumerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

fn record_transition(state: ConsumerState) {
    info!(%state, "consumer lifecycle transition");
    counter!(SPOOL_CONSUMER_TRANSITIONS_TOTAL, STATE_LABEL => state.as_str()).increment(1);
}

/// Held by a producer from before its first enqueue until its batch is drained.
///
/// Released on drop.
#[derive(Debug)]
pub struct LifecycleLease {
    lifecycle: ConsumerLifecycle,
    producer: ProducerId,
}

impl LifecycleLease {
    pub fn release(self) {}
}

impl Drop for LifecycleLease {
    fn drop(&mut self) {
        self.lifecycle.release_lease(self.producer);
    }
}

/// Consumer-side view of the lifecycle.
#[derive(Debug)]
pub struct LifecycleRx(watch::Receiver<LifecycleSnapshot>);

impl LifecycleRx {
    /// Returns the current state and marks it as seen.
    pub fn current(&mut self) -> ConsumerState {
        self.0.borrow_and_update().state
    }

    /// Waits for the next state change. Returns `false` once the authority is gone.
    pub async fn changed(&mut self) -> bool {
        self.0.changed().await.is_ok()
    }

    /// Parks until the consumer is no longer suspended and returns the new state.
    pub async fn wait_while_suspended(&mut self) -> ConsumerState {
        match self
            .0
            .wait_for(|snapshot| snapshot.state != ConsumerState::Suspended)
            .await
        {
            Ok(snapshot) => snapshot.state,
            Err(_) => ConsumerState::Destroyed,
        }
    }
}

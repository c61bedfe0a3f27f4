use std::collections::HashMap;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, SpoolResult};
use crate::spool_error;
use crate::types::ProducerId;
use crate::workers::producer::{ProducerPhase, ProducerReport, ProducerWorkerHandle};

/// Tracks the producers of a session across rounds.
#[derive(Debug, Default)]
pub struct ProducerPool {
    /// Phase of every producer ever added, including finished ones.
    phases: HashMap<ProducerId, watch::Receiver<ProducerPhase>>,
    /// Owns a waiter for every producer that has not been collected yet.
    join_set: JoinSet<(ProducerId, Result<ProducerReport, JoinError>)>,
}

impl ProducerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a started producer to the pool.
    pub fn insert(&mut self, handle: ProducerWorkerHandle) {
        let id = handle.id();
        let (phase_rx, join_handle) = handle.into_parts();

        if self.phases.insert(id, phase_rx).is_some() {
            warn!(producer = %id, "producer id reused in pool");
        }

        match join_handle {
            Some(join_handle) => {
                self.join_set
                    .spawn(async move { (id, join_handle.await) });
                debug!(producer = %id, "producer added to pool");
            }
            None => warn!(producer = %id, "producer added without a running task"),
        }
    }

    /// Returns the phase of every producer, ordered by id.
    pub fn phases(&self) -> Vec<(ProducerId, ProducerPhase)> {
        let mut phases: Vec<_> = self
            .phases
            .iter()
            .map(|(id, phase_rx)| (*id, *phase_rx.borrow()))
            .collect();
        phases.sort_by_key(|(id, _)| *id);

        phases
    }

    /// Returns a receiver tracking the phase of `producer`.
    pub fn watch(&self, producer: ProducerId) -> Option<watch::Receiver<ProducerPhase>> {
        self.phases.get(&producer).cloned()
    }

    /// Whether every producer reached [`ProducerPhase::Done`].
    pub fn all_done(&self) -> bool {
        self.phases
            .values()
            .all(|phase_rx| *phase_rx.borrow() == ProducerPhase::Done)
    }

    /// Waits for every pending producer and returns their reports, ordered by id.
    ///
    /// Panicked producers are aggregated into a single error.
    pub async fn wait_all(&mut self) -> SpoolResult<Vec<ProducerReport>> {
        let mut reports = Vec::new();
        let mut errors = Vec::new();

        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((id, Err(join_err))) => {
                    error!(producer = %id, error = %join_err, "producer worker panicked");
                    errors.push(spool_error!(
                        ErrorKind::ProducerPanic,
                        "Producer worker panicked",
                        format!("{id}: {join_err}")
                    ));
                }
                Err(join_err) => errors.push(spool_error!(
                    ErrorKind::ProducerPanic,
                    "Producer waiter failed",
                    join_err
                )),
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        reports.sort_by_key(|report| report.id);

        Ok(reports)
    }
}

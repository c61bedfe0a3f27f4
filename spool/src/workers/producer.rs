use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use rand::Rng;
use spool_config::shared::{EnqueueRetryConfig, ProducerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, warn};

use crate::completion::{CompletionDispatcher, Mailbox, ProducerProgress};
use crate::concurrency::barrier::{Barrier, BarrierArrival};
use crate::concurrency::enqueue::EnqueueMutex;
use crate::concurrency::lifecycle::{ConsumerLifecycle, ResumeOutcome};
use crate::error::{ErrorKind, SpoolError, SpoolResult};
use crate::metrics::{
    ERROR_KIND_LABEL, PRODUCER_LABEL, SPOOL_COMPLETIONS_TOTAL, SPOOL_ENQUEUE_FAILURES_TOTAL,
    SPOOL_ITEMS_ENQUEUED_TOTAL,
};
use crate::sink::CompletionSink;
use crate::{bail, spool_error};
use crate::types::{Item, ProducerId, Sequence};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::policy::{RetryDirective, build_error_handling_policy};

/// Phase of a producer. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProducerPhase {
    Enqueuing,
    Draining,
    Barriered,
    Done,
}

impl fmt::Display for ProducerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            ProducerPhase::Enqueuing => "enqueuing",
            ProducerPhase::Draining => "draining",
            ProducerPhase::Barriered => "barriered",
            ProducerPhase::Done => "done",
        };
        f.write_str(phase)
    }
}

/// Outcome of one producer's batch.
#[derive(Debug, Clone)]
pub struct ProducerReport {
    pub id: ProducerId,
    pub name: String,
    pub submitted: usize,
    pub enqueued: usize,
    pub completed: usize,
    pub abandoned: usize,
    /// How the producer's arrival at the barrier went, if it got that far.
    pub arrival: Option<BarrierArrival>,
    /// The terminal error of the producer, already reported to the sink.
    pub error: Option<SpoolError>,
    /// Operator hint for the first terminal error that has one.
    pub solution: Option<&'static str>,
}

impl ProducerReport {
    fn new(id: ProducerId, name: String, submitted: usize) -> Self {
        Self {
            id,
            name,
            submitted,
            enqueued: 0,
            completed: 0,
            abandoned: 0,
            arrival: None,
            error: None,
            solution: None,
        }
    }

    /// Whether every submitted item was enqueued and completed.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.completed == self.submitted
    }
}

/// Session-wide collaborators shared by every producer.
#[derive(Debug)]
pub struct ProducerContext {
    pub enqueue: EnqueueMutex,
    pub dispatcher: CompletionDispatcher,
    pub lifecycle: ConsumerLifecycle,
    pub retry: EnqueueRetryConfig,
    pub drain_poll_interval: Duration,
    /// Storage budget for one batch, in items. Unbounded when `None`.
    pub max_batch_items: Option<usize>,
    /// Grace interval before tearing the consumer down, when teardown is enabled.
    pub teardown_grace: Option<Duration>,
}

/// Handle to a running producer.
#[derive(Debug)]
pub struct ProducerWorkerHandle {
    id: ProducerId,
    phase_rx: watch::Receiver<ProducerPhase>,
    handle: Option<JoinHandle<ProducerReport>>,
}

impl ProducerWorkerHandle {
    pub fn id(&self) -> ProducerId {
        self.id
    }

    /// Returns the receiver tracking the producer's phase.
    pub fn phase_rx(&self) -> watch::Receiver<ProducerPhase> {
        self.phase_rx.clone()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        watch::Receiver<ProducerPhase>,
        Option<JoinHandle<ProducerReport>>,
    ) {
        (self.phase_rx, self.handle)
    }
}

impl WorkerHandle<ProducerPhase> for ProducerWorkerHandle {
    type Output = ProducerReport;

    fn state(&self) -> ProducerPhase {
        *self.phase_rx.borrow()
    }

    async fn wait(mut self) -> SpoolResult<ProducerReport> {
        let Some(handle) = self.handle.take() else {
            return Err(spool_error!(
                ErrorKind::InvalidState,
                "Producer worker was already awaited"
            ));
        };

        handle.await.map_err(|err| {
            spool_error!(ErrorKind::ProducerPanic, "Producer worker panicked", err)
        })
    }
}

/// Submits one ordered batch and sees it through to the barrier.
///
/// The producer registers its completion mailbox, takes a lifecycle lease (resuming the
/// consumer if it was suspended), enqueues its items one at a time, waits until every
/// enqueued item has completed, returns the lease and arrives at its round's barrier. The
/// producer whose arrival releases the barrier asks the consumer to suspend and, with
/// teardown enabled, destroys it after the grace interval.
///
/// Every terminal error is reported to the sink, and the producer reaches the barrier
/// regardless.
#[derive(Debug)]
pub struct ProducerWorker<K> {
    id: ProducerId,
    config: ProducerConfig,
    barrier: Arc<Barrier>,
    context: Arc<ProducerContext>,
    sink: K,
}

impl<K> ProducerWorker<K> {
    pub fn new(
        id: ProducerId,
        config: ProducerConfig,
        barrier: Arc<Barrier>,
        context: Arc<ProducerContext>,
        sink: K,
    ) -> Self {
        Self {
            id,
            config,
            barrier,
            context,
            sink,
        }
    }
}

impl<K> Worker<ProducerWorkerHandle, ProducerPhase> for ProducerWorker<K>
where
    K: CompletionSink + Clone + Send + Sync + 'static,
{
    type Error = SpoolError;

    async fn start(self) -> SpoolResult<ProducerWorkerHandle> {
        info!(producer = %self.id, name = %self.config.name, items = self.config.items.len(), "starting producer worker");

        let id = self.id;
        let (phase_tx, phase_rx) = watch::channel(ProducerPhase::Enqueuing);
        let span = tracing::info_span!("producer_worker", producer = %self.id, name = %self.config.name);
        let handle = tokio::spawn(self.run(phase_tx).instrument(span.or_current()));

        Ok(ProducerWorkerHandle {
            id,
            phase_rx,
            handle: Some(handle),
        })
    }
}

impl<K> ProducerWorker<K>
where
    K: CompletionSink + Clone + Send + Sync + 'static,
{
    async fn run(mut self, phase_tx: watch::Sender<ProducerPhase>) -> ProducerReport {
        let items = std::mem::take(&mut self.config.items);
        let mut report = ProducerReport::new(self.id, self.config.name.clone(), items.len());
        let progress = Arc::new(ProducerProgress::new(items.len()));

        match self.context.dispatcher.register(self.id) {
            Ok(mailbox) => {
                let handler = tokio::spawn(
                    handle_completions(
                        self.config.name.clone(),
                        mailbox,
                        progress.clone(),
                        self.sink.clone(),
                    )
                    .in_current_span(),
                );

                self.submit(items, &progress, &phase_tx, &mut report).await;

                self.context.dispatcher.unregister(self.id);
                match handler.await {
                    Ok(0) => {}
                    Ok(outstanding) => {
                        let err = spool_error!(
                            ErrorKind::SessionClosed,
                            "Session closed before the batch drained",
                            format!("{outstanding} enqueued items never completed")
                        );
                        self.fail(&mut report, err).await;
                    }
                    Err(err) => error!(error = %err, "completion handler panicked"),
                }
            }
            Err(err) => {
                progress.abandon(items.len());
                self.fail(&mut report, err).await;
            }
        }

        report.completed = progress.completed();
        report.abandoned = progress.abandoned();

        phase_tx.send_replace(ProducerPhase::Barriered);
        self.arrive(&mut report).await;
        phase_tx.send_replace(ProducerPhase::Done);

        info!(
            enqueued = report.enqueued,
            completed = report.completed,
            abandoned = report.abandoned,
            "producer done"
        );

        report
    }

    /// Runs the leased part of the batch: enqueue everything, then wait for the drain.
    async fn submit(
        &self,
        items: Vec<String>,
        progress: &ProducerProgress,
        phase_tx: &watch::Sender<ProducerPhase>,
        report: &mut ProducerReport,
    ) {
        let submitted = items.len();
        let lease = match self.context.lifecycle.acquire_lease(self.id) {
            Ok((lease, outcome)) => {
                if outcome == ResumeOutcome::Resumed {
                    info!("resumed the suspended consumer");
                }
                lease
            }
            Err(err) => {
                progress.abandon(submitted);
                self.fail(report, err).await;
                return;
            }
        };

        if let Err(err) = self.enqueue_batch(items, report).await {
            let remaining = progress.abandon(submitted - report.enqueued);
            warn!(
                enqueued = report.enqueued,
                abandoned = submitted - report.enqueued,
                remaining,
                "abandoning the rest of the batch"
            );
            self.fail(report, err).await;
        }

        phase_tx.send_replace(ProducerPhase::Draining);
        progress
            .wait_drained(self.context.drain_poll_interval)
            .await;
        debug!("batch drained");

        lease.release();
    }

    async fn enqueue_batch(
        &self,
        contents: Vec<String>,
        report: &mut ProducerReport,
    ) -> SpoolResult<()> {
        let batch = allocate_batch(self.id, contents, self.context.max_batch_items)?;

        for item in batch {
            let index = item.index();
            let sequence = self.enqueue_with_retry(item).await?;
            report.enqueued += 1;

            counter!(SPOOL_ITEMS_ENQUEUED_TOTAL, PRODUCER_LABEL => self.config.name.clone())
                .increment(1);
            debug!(index, sequence, "item enqueued");
        }

        Ok(())
    }

    /// Enqueues `item`, retrying timed failures with exponential backoff.
    ///
    /// `max_attempts` bounds the total number of attempts.
    async fn enqueue_with_retry(&self, mut item: Item) -> SpoolResult<Sequence> {
        let retry = &self.context.retry;
        let max_backoff = Duration::from_millis(retry.max_backoff_ms);
        let mut current_backoff = Duration::from_millis(retry.initial_backoff_ms);
        let mut attempt = 1;

        loop {
            let (returned, err) = match self.context.enqueue.enqueue(item).await {
                Ok(sequence) => return Ok(sequence),
                Err(failure) => failure,
            };

            counter!(
                SPOOL_ENQUEUE_FAILURES_TOTAL,
                PRODUCER_LABEL => self.config.name.clone(),
                ERROR_KIND_LABEL => format!("{:?}", err.kind())
            )
            .increment(1);

            let policy = build_error_handling_policy(&err);
            if policy.retry_directive() != RetryDirective::Timed || attempt >= retry.max_attempts {
                warn!(
                    attempt,
                    index = returned.index(),
                    error = %err,
                    solution = policy.solution(),
                    "enqueue failed, giving up"
                );
                return Err(err);
            }

            let backoff = jittered_backoff(current_backoff, retry.jitter_percent);
            warn!(
                attempt,
                index = returned.index(),
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "enqueue failed, will retry after backoff"
            );
            sleep(backoff).await;

            current_backoff = (current_backoff * 2).min(max_backoff);
            attempt += 1;
            item = returned;
        }
    }

    async fn arrive(&self, report: &mut ProducerReport) {
        let arrival = match self.barrier.arrive() {
            Ok(arrival) => arrival,
            Err(err) => {
                self.fail(report, err).await;
                return;
            }
        };
        report.arrival = Some(arrival);

        let BarrierArrival::Released = arrival else {
            debug!(?arrival, "arrived at barrier");
            return;
        };

        info!("last producer at the barrier, suspending the consumer");
        self.context.lifecycle.request_suspend();

        if let Some(grace) = self.context.teardown_grace {
            sleep(grace).await;
            self.context.lifecycle.request_teardown();
        }
    }

    /// Records `err` as the producer's terminal error and reports it to the sink.
    async fn fail(&self, report: &mut ProducerReport, err: SpoolError) {
        let policy = build_error_handling_policy(&err);
        error!(error = %err, solution = policy.solution(), "producer failed");
        report.solution = report.solution.or(policy.solution());

        if let Err(sink_err) = self.sink.on_error(&self.config.name, &err).await {
            error!(error = %sink_err, "completion sink failed to record a producer error");
        }

        report.error = Some(match report.error.take() {
            Some(previous) => SpoolError::from(vec![previous, err]),
            None => err,
        });
    }
}

/// Forwards completions from the mailbox to the sink, then counts them.
///
/// Runs until the mailbox is unregistered. Anything still outstanding at that point can no
/// longer complete, so it is abandoned and its count returned.
async fn handle_completions<K>(
    name: String,
    mut mailbox: Mailbox,
    progress: Arc<ProducerProgress>,
    sink: K,
) -> usize
where
    K: CompletionSink + Send + Sync + 'static,
{
    while let Some(completion) = mailbox.recv().await {
        match AssertUnwindSafe(sink.on_completion(&name, &completion))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(index = completion.index, error = %err, "completion sink failed")
            }
            Err(_) => error!(index = completion.index, "completion sink panicked"),
        }

        match progress.record_completion() {
            Ok(remaining) => {
                counter!(SPOOL_COMPLETIONS_TOTAL, PRODUCER_LABEL => name.clone()).increment(1);
                info!(index = completion.index, sequence = completion.sequence, remaining, "{name}: print task done");
            }
            Err(err) => error!(index = completion.index, error = %err, "unexpected completion"),
        }
    }

    let outstanding = progress.abandon_outstanding();
    if outstanding > 0 {
        warn!(outstanding, "completion mailbox closed with items outstanding");
    }

    outstanding
}

/// Obtains storage for a batch and wraps every content into an [`Item`] owned by `owner`.
///
/// Fails with [`ErrorKind::AllocationError`] when the batch is over `budget` or the memory
/// cannot be reserved.
fn allocate_batch(
    owner: ProducerId,
    contents: Vec<String>,
    budget: Option<usize>,
) -> SpoolResult<Vec<Item>> {
    if let Some(budget) = budget.filter(|budget| contents.len() > *budget) {
        bail!(
            ErrorKind::AllocationError,
            "Batch exceeds the storage budget",
            format!("{} items requested, budget is {budget}", contents.len())
        );
    }

    let mut batch = Vec::new();
    batch.try_reserve_exact(contents.len())?;
    batch.extend(
        contents
            .into_iter()
            .enumerate()
            .map(|(index, content)| Item::new(owner, index, content)),
    );

    Ok(batch)
}

/// Applies up to `jitter_percent` of random spread in either direction.
fn jittered_backoff(base: Duration, jitter_percent: u8) -> Duration {
    let jitter_range = base.as_secs_f64() * f64::from(jitter_percent) / 100.0;
    if jitter_range <= 0.0 {
        return base;
    }

    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((base.as_secs_f64() + jitter).max(0.0))
}

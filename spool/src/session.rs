//! The coordination session: one queue, one consumer and the producers of every round.

use std::sync::Arc;

use spool_config::shared::{ProducerConfig, SessionConfig, validate_producers};
use tokio::sync::watch;
use tracing::{error, info};

use crate::bail;
use crate::completion::CompletionDispatcher;
use crate::concurrency::barrier::Barrier;
use crate::concurrency::enqueue::EnqueueMutex;
use crate::concurrency::lifecycle::{ConsumerLifecycle, ConsumerState};
use crate::concurrency::queue::{SlotSnapshot, WorkQueue};
use crate::error::{ErrorKind, SpoolResult};
use crate::printer::Printer;
use crate::sink::CompletionSink;
use crate::types::ProducerId;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::consumer::{ConsumerReport, ConsumerWorker, ConsumerWorkerHandle};
use crate::workers::pool::ProducerPool;
use crate::workers::producer::{
    ProducerContext, ProducerPhase, ProducerReport, ProducerWorker,
};

/// Index of a round of producers. The producers configured at startup form round 0.
pub type RoundId = usize;

/// Result of waiting for every started producer.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// One report per producer, ordered by producer id.
    pub producers: Vec<ProducerReport>,
    pub consumer_state: ConsumerState,
    pub slots: SlotSnapshot,
}

impl SessionReport {
    /// Returns the report of the producer called `name`, from the latest round it ran in.
    pub fn producer(&self, name: &str) -> Option<&ProducerReport> {
        self.producers.iter().rev().find(|report| report.name == name)
    }
}

#[derive(Debug)]
enum SessionState {
    Running {
        consumer: ConsumerWorkerHandle,
        pool: ProducerPool,
    },
    ShutDown,
}

/// A running coordination session.
///
/// Owns every shared primitive and hands them to the workers it starts. Nothing is global:
/// two sessions in the same process are fully independent.
///
/// Dropping a running session destroys the consumer and closes the queue. Producers still
/// in flight give up their outstanding items, report [`ErrorKind::SessionClosed`] to the
/// sink and finish.
#[derive(Debug)]
pub struct Session<K> {
    queue: Arc<WorkQueue>,
    context: Arc<ProducerContext>,
    sink: K,
    rounds: Vec<Arc<Barrier>>,
    next_producer_id: u32,
    state: SessionState,
}

impl<K> Session<K>
where
    K: CompletionSink + Clone + Send + Sync + 'static,
{
    /// Validates `config`, creates the primitives, starts the consumer and then the
    /// configured producers as round 0.
    pub async fn start<P>(config: SessionConfig, printer: P, sink: K) -> SpoolResult<Self>
    where
        P: Printer + Send + Sync + 'static,
    {
        config.validate()?;

        info!(
            queue_capacity = config.queue_capacity,
            producers = config.producers.len(),
            teardown = config.enable_teardown_after_drain,
            "starting session"
        );

        let queue = Arc::new(WorkQueue::new(config.queue_capacity)?);
        let lifecycle = ConsumerLifecycle::new();
        let dispatcher = CompletionDispatcher::new();

        let context = Arc::new(ProducerContext {
            enqueue: EnqueueMutex::new(queue.clone(), config.enqueue_timeout()),
            dispatcher: dispatcher.clone(),
            lifecycle: lifecycle.clone(),
            retry: config.enqueue_retry.clone(),
            drain_poll_interval: config.drain_poll_interval(),
            max_batch_items: config.max_batch_items,
            teardown_grace: config
                .enable_teardown_after_drain
                .then(|| config.teardown_grace()),
        });

        let consumer = ConsumerWorker::new(queue.clone(), lifecycle, dispatcher, printer)
            .start()
            .await?;

        let mut session = Self {
            queue,
            context,
            sink,
            rounds: Vec::new(),
            next_producer_id: 1,
            state: SessionState::Running {
                consumer,
                pool: ProducerPool::new(),
            },
        };

        session.start_round(config.producers).await?;

        Ok(session)
    }

    /// Starts `producers` as a new round with its own barrier.
    ///
    /// The first thing each producer does is resume the consumer if it is suspended. Fails
    /// with [`ErrorKind::UnknownWorker`] once the consumer has been destroyed.
    pub async fn start_round(&mut self, producers: Vec<ProducerConfig>) -> SpoolResult<RoundId> {
        validate_producers(&producers)?;

        let SessionState::Running { pool, .. } = &mut self.state else {
            bail!(ErrorKind::SessionClosed, "The session has been shut down");
        };

        if self.context.lifecycle.state() == ConsumerState::Destroyed {
            bail!(
                ErrorKind::UnknownWorker,
                "The consumer worker has been destroyed"
            );
        }

        let round = self.rounds.len();
        let barrier = Arc::new(Barrier::new(producers.len()));
        self.rounds.push(barrier.clone());

        info!(round, producers = producers.len(), "starting round");

        for producer in producers {
            let id = ProducerId(self.next_producer_id);
            self.next_producer_id += 1;

            let handle = ProducerWorker::new(
                id,
                producer,
                barrier.clone(),
                self.context.clone(),
                self.sink.clone(),
            )
            .start()
            .await?;
            pool.insert(handle);
        }

        Ok(round)
    }

    /// Waits for every producer started so far.
    pub async fn wait(&mut self) -> SpoolResult<SessionReport> {
        let SessionState::Running { pool, .. } = &mut self.state else {
            bail!(ErrorKind::SessionClosed, "The session has been shut down");
        };

        let producers = pool.wait_all().await?;
        for report in &producers {
            if let Some(err) = &report.error {
                error!(producer = %report.id, name = %report.name, error = %err, "producer finished with an error");
            }
        }

        Ok(SessionReport {
            producers,
            consumer_state: self.consumer_state(),
            slots: self.slots(),
        })
    }

    /// Destroys the consumer and releases every primitive.
    ///
    /// Only allowed once every producer is done, otherwise fails with
    /// [`ErrorKind::InvalidState`] and leaves the session untouched.
    pub async fn shutdown(&mut self) -> SpoolResult<ConsumerReport> {
        match &self.state {
            SessionState::ShutDown => {
                bail!(ErrorKind::InvalidState, "The session was already shut down")
            }
            SessionState::Running { pool, .. } if !pool.all_done() => {
                bail!(
                    ErrorKind::InvalidState,
                    "Cannot shut down while producers are still running"
                )
            }
            SessionState::Running { .. } => {}
        }

        let SessionState::Running { consumer, mut pool } =
            std::mem::replace(&mut self.state, SessionState::ShutDown)
        else {
            bail!(ErrorKind::InvalidState, "The session was already shut down");
        };

        info!("shutting down session");

        self.release_primitives();
        // Every producer is done, this only collects their tasks.
        pool.wait_all().await?;

        consumer.wait().await
    }

    pub fn slots(&self) -> SlotSnapshot {
        self.queue.slots()
    }

    pub fn consumer_state(&self) -> ConsumerState {
        self.context.lifecycle.state()
    }

    /// Returns the lifecycle authority of the consumer.
    pub fn lifecycle(&self) -> &ConsumerLifecycle {
        &self.context.lifecycle
    }

    /// Returns how many producers of `round` have not reached its barrier yet.
    pub fn barrier_remaining(&self, round: RoundId) -> Option<usize> {
        self.rounds.get(round).map(|barrier| barrier.remaining())
    }

    /// Returns a receiver tracking the phase of `producer`.
    ///
    /// The receiver outlives the session, and its sender goes away once the producer's task
    /// has finished.
    pub fn watch_producer(&self, producer: ProducerId) -> Option<watch::Receiver<ProducerPhase>> {
        match &self.state {
            SessionState::Running { pool, .. } => pool.watch(producer),
            SessionState::ShutDown => None,
        }
    }

    /// Returns the phase of every producer started so far.
    pub fn producer_phases(&self) -> Vec<(ProducerId, ProducerPhase)> {
        match &self.state {
            SessionState::Running { pool, .. } => pool.phases(),
            SessionState::ShutDown => Vec::new(),
        }
    }
}

impl<K> Session<K> {
    fn release_primitives(&self) {
        self.context.lifecycle.force_destroy();
        self.queue.close();
        let mailboxes = self.context.dispatcher.unregister_all();
        info!(mailboxes, "session primitives released");
    }
}

impl<K> Drop for Session<K> {
    fn drop(&mut self) {
        if let SessionState::Running { .. } = self.state {
            self.release_primitives();
        }
    }
}

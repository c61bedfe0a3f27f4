use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::bail;
use crate::completion::CompletionDispatcher;
use crate::concurrency::lifecycle::{ConsumerLifecycle, ConsumerState};
use crate::concurrency::queue::WorkQueue;
use crate::error::{ErrorKind, SpoolError, SpoolResult};
use crate::metrics::{
    ERROR_KIND_LABEL, SPOOL_ITEMS_PROCESSED_TOTAL, SPOOL_PRINT_FAILURES_TOTAL,
};
use crate::printer::Printer;
use crate::spool_error;
use crate::types::{Completion, Item};
use crate::workers::base::{Worker, WorkerHandle};

/// What the consumer did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Items taken out of the queue and handed to the printer.
    pub processed: u64,
    /// Items the printer failed or panicked on.
    pub print_failures: u64,
    /// Completions whose producer was no longer registered.
    pub undelivered: u64,
}

/// Handle to the running consumer.
#[derive(Debug)]
pub struct ConsumerWorkerHandle {
    lifecycle: ConsumerLifecycle,
    handle: Option<JoinHandle<SpoolResult<ConsumerReport>>>,
}

impl WorkerHandle<ConsumerState> for ConsumerWorkerHandle {
    type Output = ConsumerReport;

    fn state(&self) -> ConsumerState {
        self.lifecycle.state()
    }

    async fn wait(mut self) -> SpoolResult<ConsumerReport> {
        let Some(handle) = self.handle.take() else {
            return Ok(ConsumerReport::default());
        };

        handle.await.map_err(|err| {
            spool_error!(ErrorKind::ConsumerPanic, "Consumer worker panicked", err)
        })?
    }
}

/// The single worker that drains the queue.
///
/// Each iteration waits for a filled slot, pops the oldest item, frees the slot, prints the
/// item and notifies the owning producer. Lifecycle changes are only acted upon between
/// iterations, so a suspend never interrupts an item halfway.
#[derive(Debug)]
pub struct ConsumerWorker<P> {
    queue: Arc<WorkQueue>,
    lifecycle: ConsumerLifecycle,
    dispatcher: CompletionDispatcher,
    printer: P,
}

impl<P> ConsumerWorker<P> {
    pub fn new(
        queue: Arc<WorkQueue>,
        lifecycle: ConsumerLifecycle,
        dispatcher: CompletionDispatcher,
        printer: P,
    ) -> Self {
        Self {
            queue,
            lifecycle,
            dispatcher,
            printer,
        }
    }
}

impl<P> Worker<ConsumerWorkerHandle, ConsumerState> for ConsumerWorker<P>
where
    P: Printer + Send + Sync + 'static,
{
    type Error = SpoolError;

    async fn start(self) -> SpoolResult<ConsumerWorkerHandle> {
        info!(printer = P::name(), "starting consumer worker");

        let lifecycle = self.lifecycle.clone();
        let span = tracing::info_span!("consumer_worker", printer = P::name());
        let handle = tokio::spawn(self.run().instrument(span.or_current()));

        Ok(ConsumerWorkerHandle {
            lifecycle,
            handle: Some(handle),
        })
    }
}

impl<P> ConsumerWorker<P>
where
    P: Printer + Send + Sync + 'static,
{
    async fn run(self) -> SpoolResult<ConsumerReport> {
        let mut lifecycle_rx = self.lifecycle.subscribe();
        let mut report = ConsumerReport::default();

        loop {
            match lifecycle_rx.current() {
                ConsumerState::Destroyed => break,
                ConsumerState::Suspended => {
                    info!(processed = report.processed, "consumer parked");
                    if lifecycle_rx.wait_while_suspended().await == ConsumerState::Destroyed {
                        break;
                    }
                    info!("consumer resumed");
                    continue;
                }
                ConsumerState::Active => {}
            }

            tokio::select! {
                biased;

                changed = lifecycle_rx.changed() => {
                    if !changed {
                        break;
                    }
                    continue;
                }
                taken = self.queue.take_filled() => {
                    if let Err(err) = taken {
                        debug!(error = %err, "work queue closed, consumer stopping");
                        break;
                    }
                }
            }

            let Some(item) = self.queue.pop() else {
                bail!(
                    ErrorKind::InvalidState,
                    "A filled slot was signalled but the queue is empty"
                );
            };
            self.queue.release_empty();

            self.process(item, &mut report).await;
        }

        info!(
            processed = report.processed,
            print_failures = report.print_failures,
            "consumer worker stopped"
        );

        Ok(report)
    }

    async fn process(&self, item: Item, report: &mut ConsumerReport) {
        report.processed += 1;
        counter!(SPOOL_ITEMS_PROCESSED_TOTAL).increment(1);

        let printed = match AssertUnwindSafe(self.printer.print(&item))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(producer = %item.owner(), index = item.index(), error = %err, "printing failed");
                counter!(SPOOL_PRINT_FAILURES_TOTAL, ERROR_KIND_LABEL => format!("{:?}", err.kind()))
                    .increment(1);
                false
            }
            Err(_) => {
                error!(producer = %item.owner(), index = item.index(), "printer panicked");
                counter!(SPOOL_PRINT_FAILURES_TOTAL, ERROR_KIND_LABEL => format!("{:?}", ErrorKind::ConsumerPanic))
                    .increment(1);
                false
            }
        };

        if !printed {
            report.print_failures += 1;
        }

        // The producer only learns about the item once the consumer no longer holds it.
        let completion = Completion::for_item(&item, printed);
        drop(item);

        if let Err(err) = self.dispatcher.notify(completion) {
            report.undelivered += 1;
            warn!(producer = %completion.producer, sequence = completion.sequence, error = %err, "completion could not be delivered");
        } else {
            debug!(producer = %completion.producer, sequence = completion.sequence, "completion sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::concurrency::enqueue::EnqueueMutex;
    use crate::printer::memory::MemoryPrinter;
    use crate::types::ProducerId;

    struct Harness {
        queue: Arc<WorkQueue>,
        enqueue: EnqueueMutex,
        lifecycle: ConsumerLifecycle,
        dispatcher: CompletionDispatcher,
    }

    impl Harness {
        fn new(capacity: usize) -> Self {
            let queue = Arc::new(WorkQueue::new(capacity).unwrap());
            Self {
                enqueue: EnqueueMutex::new(queue.clone(), None),
                queue,
                lifecycle: ConsumerLifecycle::new(),
                dispatcher: CompletionDispatcher::new(),
            }
        }

        async fn start(&self, printer: MemoryPrinter) -> ConsumerWorkerHandle {
            ConsumerWorker::new(
                self.queue.clone(),
                self.lifecycle.clone(),
                self.dispatcher.clone(),
                printer,
            )
            .start()
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn prints_in_order_and_notifies_the_owner() {
        let harness = Harness::new(2);
        let printer = MemoryPrinter::new();
        let mut mailbox = harness.dispatcher.register(ProducerId(1)).unwrap();
        let consumer = harness.start(printer.clone()).await;

        for index in 0..3 {
            harness
                .enqueue
                .enqueue(Item::new(ProducerId(1), index, "page"))
                .await
                .unwrap();
        }

        for expected in 0..3 {
            let completion = timeout(Duration::from_secs(1), mailbox.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(completion.index, expected);
            assert!(completion.printed);
        }

        let indexes: Vec<_> = printer.printed().await.iter().map(Item::index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        harness.lifecycle.force_destroy();
        let report = consumer.wait().await.unwrap();
        assert_eq!(report.processed, 3);
        assert!(harness.queue.slots().is_balanced());
    }

    #[tokio::test]
    async fn printer_failures_do_not_stop_the_loop() {
        let harness = Harness::new(4);
        let printer = MemoryPrinter::new().failing_when(|item| item.index() == 0);
        let mut mailbox = harness.dispatcher.register(ProducerId(1)).unwrap();
        let consumer = harness.start(printer.clone()).await;

        for index in 0..2 {
            harness
                .enqueue
                .enqueue(Item::new(ProducerId(1), index, "page"))
                .await
                .unwrap();
        }

        let first = mailbox.recv().await.unwrap();
        let second = mailbox.recv().await.unwrap();
        assert!(!first.printed);
        assert!(second.printed);

        harness.lifecycle.force_destroy();
        let report = consumer.wait().await.unwrap();
        assert_eq!(report.print_failures, 1);
    }

    #[tokio::test]
    async fn unregistered_owner_is_counted_as_undelivered() {
        let harness = Harness::new(1);
        let consumer = harness.start(MemoryPrinter::new()).await;

        harness
            .enqueue
            .enqueue(Item::new(ProducerId(7), 0, "orphan"))
            .await
            .unwrap();

        // The slot comes back once the item has been processed.
        timeout(Duration::from_secs(1), async {
            while harness.queue.slots().empty_slots != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        harness.queue.close();
        let report = consumer.wait().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.undelivered, 1);
    }

    #[tokio::test]
    async fn suspended_consumer_leaves_items_queued_until_resumed() {
        let harness = Harness::new(2);
        let printer = MemoryPrinter::new();
        let mut mailbox = harness.dispatcher.register(ProducerId(1)).unwrap();
        harness.lifecycle.request_suspend();
        let consumer = harness.start(printer.clone()).await;

        harness
            .enqueue
            .enqueue(Item::new(ProducerId(1), 0, "page"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(printer.printed().await.is_empty());
        assert_eq!(consumer.state(), ConsumerState::Suspended);

        harness.lifecycle.resume().unwrap();
        timeout(Duration::from_secs(1), mailbox.recv())
            .await
            .unwrap()
            .unwrap();

        harness.lifecycle.request_suspend();
        harness.lifecycle.request_teardown();
        let report = consumer.wait().await.unwrap();
        assert_eq!(report.processed, 1);
    }
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::debug;

use crate::concurrency::queue::WorkQueue;
use crate::error::{ErrorKind, SpoolError, SpoolResult};
use crate::spool_error;
use crate::types::{Item, Sequence};

/// Serializes the reserve, publish and signal sequence across producers.
///
/// Holding the mutex for the whole sequence keeps the global enqueue order equal to the
/// order in which producers win the mutex, and keeps the slot accounting of two producers
/// from interleaving.
#[derive(Debug)]
pub struct EnqueueMutex {
    queue: Arc<WorkQueue>,
    lock: Mutex<()>,
    acquire_timeout: Option<Duration>,
}

impl EnqueueMutex {
    /// Creates the mutex for `queue`.
    ///
    /// With an `acquire_timeout`, both taking the mutex and reserving a slot fail with
    /// [`ErrorKind::EnqueueFailed`] after waiting that long.
    pub fn new(queue: Arc<WorkQueue>, acquire_timeout: Option<Duration>) -> Self {
        Self {
            queue,
            lock: Mutex::new(()),
            acquire_timeout,
        }
    }

    /// Waits for exclusive access to the enqueue critical section.
    pub async fn acquire(&self) -> SpoolResult<EnqueueGuard<'_>> {
        let guard = bounded(
            self.acquire_timeout,
            self.lock.lock(),
            "Timed out waiting for the enqueue mutex",
        )
        .await?;

        Ok(EnqueueGuard {
            _guard: guard,
            queue: &self.queue,
            reserve_timeout: self.acquire_timeout,
        })
    }

    /// Runs the whole critical section for one item.
    ///
    /// On failure the item is handed back so the caller can retry it.
    pub async fn enqueue(&self, item: Item) -> Result<Sequence, (Item, SpoolError)> {
        let guard = match self.acquire().await {
            Ok(guard) => guard,
            Err(err) => return Err((item, err)),
        };

        match guard.reserve_slot().await {
            Ok(slot) => Ok(slot.publish(item)),
            Err(err) => Err((item, err)),
        }
    }
}

/// Exclusive access to the enqueue critical section. Dropping it releases the mutex.
#[derive(Debug)]
pub struct EnqueueGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    queue: &'a WorkQueue,
    reserve_timeout: Option<Duration>,
}

impl<'a> EnqueueGuard<'a> {
    /// Waits for an empty slot while holding the mutex.
    pub async fn reserve_slot(self) -> SpoolResult<ReservedSlot<'a>> {
        bounded(
            self.reserve_timeout,
            self.queue.reserve_slot(),
            "Timed out waiting for a free queue slot",
        )
        .await??;

        Ok(ReservedSlot {
            guard: self,
            published: false,
        })
    }
}

/// A reserved slot, still inside the critical section.
///
/// Publishing consumes it, signals the consumer and releases the mutex. Dropping it
/// without publishing gives the slot back.
#[derive(Debug)]
pub struct ReservedSlot<'a> {
    guard: EnqueueGuard<'a>,
    published: bool,
}

impl ReservedSlot<'_> {
    pub fn publish(mut self, item: Item) -> Sequence {
        let owner = item.owner();
        let sequence = self.guard.queue.publish(item);
        self.guard.queue.release_filled();
        self.published = true;

        debug!(producer = %owner, sequence, "item published");

        sequence
    }
}

impl Drop for ReservedSlot<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.guard.queue.cancel_reservation();
        }
    }
}

/// Awaits `future`, failing with [`ErrorKind::EnqueueFailed`] when `limit` elapses first.
async fn bounded<F>(
    limit: Option<Duration>,
    future: F,
    description: &'static str,
) -> SpoolResult<F::Output>
where
    F: Future,
{
    match limit {
        Some(limit) => timeout(limit, future).await.map_err(|_| {
            spool_error!(
                ErrorKind::EnqueueFailed,
                description,
                format!("gave up after {}ms", limit.as_millis())
            )
        }),
        None => Ok(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProducerId;

    fn item(owner: u32, index: usize) -> Item {
        Item::new(ProducerId(owner), index, "payload")
    }

    #[tokio::test]
    async fn enqueue_publishes_and_signals() {
        let queue = Arc::new(WorkQueue::new(2).unwrap());
        let mutex = EnqueueMutex::new(queue.clone(), None);

        let sequence = mutex.enqueue(item(1, 0)).await.unwrap();
        assert_eq!(sequence, 0);

        let snapshot = queue.slots();
        assert_eq!(snapshot.filled_slots, 1);
        assert_eq!(snapshot.empty_slots, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test]
    async fn second_acquire_waits_for_the_first_guard() {
        let queue = Arc::new(WorkQueue::new(2).unwrap());
        let mutex = EnqueueMutex::new(queue, Some(Duration::from_millis(20)));

        let guard = mutex.acquire().await.unwrap();
        let err = mutex.acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EnqueueFailed);

        drop(guard);
        assert!(mutex.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn full_queue_times_out_and_returns_the_item() {
        let queue = Arc::new(WorkQueue::new(1).unwrap());
        let mutex = EnqueueMutex::new(queue.clone(), Some(Duration::from_millis(20)));

        mutex.enqueue(item(1, 0)).await.unwrap();
        let (returned, err) = mutex.enqueue(item(1, 1)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EnqueueFailed);
        assert_eq!(returned.index(), 1);
        assert!(queue.slots().is_balanced());
        // The mutex must have been released by the failed attempt.
        assert!(mutex.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn dropped_reservation_gives_the_slot_back() {
        let queue = Arc::new(WorkQueue::new(1).unwrap());
        let mutex = EnqueueMutex::new(queue.clone(), None);

        let slot = mutex.acquire().await.unwrap().reserve_slot().await.unwrap();
        assert_eq!(queue.slots().empty_slots, 0);
        drop(slot);

        let snapshot = queue.slots();
        assert_eq!(snapshot.empty_slots, 1);
        assert_eq!(snapshot.in_flight, 0);
    }
}

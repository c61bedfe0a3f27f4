use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use metrics::gauge;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};
use crate::metrics::SPOOL_QUEUE_FILLED_SLOTS;
use crate::spool_error;
use crate::types::{Item, Sequence};

/// Point-in-time view of the queue's slot accounting.
///
/// Read under the same lock every operation updates the counters with, so
/// `empty_slots + filled_slots + in_flight == capacity` holds for every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub capacity: usize,
    pub empty_slots: usize,
    pub filled_slots: usize,
    /// Slots reserved by a producer but not yet signalled filled, plus slots taken by the
    /// consumer but not yet released.
    pub in_flight: usize,
    /// Items currently stored in the FIFO.
    pub queued: usize,
}

impl SlotSnapshot {
    /// Whether the slot accounting adds up to the capacity.
    pub fn is_balanced(&self) -> bool {
        self.empty_slots + self.filled_slots + self.in_flight == self.capacity
    }
}

/// Slot counters and FIFO storage, always updated together.
#[derive(Debug)]
struct SlotState {
    empty: usize,
    filled: usize,
    in_flight: usize,
    next_sequence: Sequence,
    items: VecDeque<Item>,
}

/// Fixed-capacity FIFO with bounded-buffer admission control.
///
/// `empty` starts at the capacity and `filled` at zero. Producers reserve an empty slot,
/// publish and signal filled; the consumer takes a filled slot, pops and signals empty.
///
/// The two semaphores only park waiters. A permit is forgotten when acquired and added to
/// the other semaphore when the slot changes hands, so a slot is never returned to the
/// semaphore it was taken from. The slot counters live in [`SlotState`] and move in the
/// same critical section as the permit they describe: a permit handed to a parked waiter
/// stays counted as filled (or empty) until that waiter takes it.
#[derive(Debug)]
pub struct WorkQueue {
    capacity: usize,
    empty_slots: Semaphore,
    filled_slots: Semaphore,
    state: Mutex<SlotState>,
}

impl WorkQueue {
    /// Creates a queue with `capacity` slots.
    pub fn new(capacity: usize) -> SpoolResult<Self> {
        if capacity == 0 {
            bail!(
                ErrorKind::InitializationError,
                "Work queue capacity must be greater than zero"
            );
        }

        if capacity > Semaphore::MAX_PERMITS {
            bail!(
                ErrorKind::InitializationError,
                "Work queue capacity exceeds the semaphore limit",
                format!(
                    "requested {capacity} slots, at most {} are supported",
                    Semaphore::MAX_PERMITS
                )
            );
        }

        let mut items = VecDeque::new();
        items.try_reserve_exact(capacity).map_err(|err| {
            spool_error!(
                ErrorKind::InitializationError,
                "Work queue storage could not be allocated",
                err
            )
        })?;

        Ok(Self {
            capacity,
            empty_slots: Semaphore::new(capacity),
            filled_slots: Semaphore::new(0),
            state: Mutex::new(SlotState {
                empty: capacity,
                filled: 0,
                in_flight: 0,
                next_sequence: 0,
                items,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for an empty slot and takes it.
    ///
    /// Fails with [`ErrorKind::SessionClosed`] once the queue is closed. Cancel safe.
    pub async fn reserve_slot(&self) -> SpoolResult<()> {
        let permit = self.empty_slots.acquire().await.map_err(|_| {
            spool_error!(
                ErrorKind::SessionClosed,
                "Work queue closed while reserving a slot"
            )
        })?;
        permit.forget();

        let mut state = self.lock_state();
        state.empty = state.empty.saturating_sub(1);
        state.in_flight += 1;

        Ok(())
    }

    /// Pushes an item into a previously reserved slot and returns its global sequence.
    ///
    /// Never blocks: the FIFO holds at most as many items as slots were reserved.
    pub fn publish(&self, item: Item) -> Sequence {
        let mut state = self.lock_state();
        debug_assert!(
            state.items.len() < self.capacity,
            "published without a reserved slot"
        );

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.items.push_back(item.stamped(sequence));

        sequence
    }

    /// Signals that a published item is available to the consumer.
    pub fn release_filled(&self) {
        let mut state = self.lock_state();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.filled += 1;
        self.filled_slots.add_permits(1);
        drop(state);

        gauge!(SPOOL_QUEUE_FILLED_SLOTS).increment(1.0);
    }

    /// Gives back a reserved slot that was never published.
    pub fn cancel_reservation(&self) {
        let mut state = self.lock_state();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.empty += 1;
        self.empty_slots.add_permits(1);
        drop(state);

        debug!("slot reservation cancelled");
    }

    /// Waits until an item is available and takes its slot.
    ///
    /// Cancel safe: dropping the future before it completes takes nothing.
    pub async fn take_filled(&self) -> SpoolResult<()> {
        let permit = self.filled_slots.acquire().await.map_err(|_| {
            spool_error!(
                ErrorKind::SessionClosed,
                "Work queue closed while waiting for an item"
            )
        })?;
        permit.forget();

        let mut state = self.lock_state();
        state.filled = state.filled.saturating_sub(1);
        state.in_flight += 1;
        drop(state);

        gauge!(SPOOL_QUEUE_FILLED_SLOTS).decrement(1.0);

        Ok(())
    }

    /// Removes the oldest item.
    pub fn pop(&self) -> Option<Item> {
        self.lock_state().items.pop_front()
    }

    /// Returns a slot freed by the consumer to the producers.
    pub fn release_empty(&self) {
        let mut state = self.lock_state();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.empty += 1;
        self.empty_slots.add_permits(1);
    }

    /// Closes both semaphores, waking every waiter with [`ErrorKind::SessionClosed`].
    pub fn close(&self) {
        self.empty_slots.close();
        self.filled_slots.close();
    }

    pub fn slots(&self) -> SlotSnapshot {
        let state = self.lock_state();

        SlotSnapshot {
            capacity: self.capacity,
            empty_slots: state.empty,
            filled_slots: state.filled,
            in_flight: state.in_flight,
            queued: state.items.len(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        // The guarded sections never panic midway, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::types::ProducerId;

    fn item(index: usize) -> Item {
        Item::new(ProducerId(1), index, format!("item {index}"))
    }

    async fn enqueue(queue: &WorkQueue, item: Item) -> Sequence {
        queue.reserve_slot().await.unwrap();
        let sequence = queue.publish(item);
        queue.release_filled();
        sequence
    }

    async fn dequeue(queue: &WorkQueue) -> Item {
        queue.take_filled().await.unwrap();
        let item = queue.pop().unwrap();
        queue.release_empty();
        item
    }

    #[test]
    fn zero_capacity_fails_initialization() {
        let err = WorkQueue::new(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InitializationError);
    }

    #[tokio::test]
    async fn items_come_out_in_publish_order_with_sequences() {
        let queue = WorkQueue::new(4).unwrap();
        for index in 0..3 {
            assert_eq!(enqueue(&queue, item(index)).await, index as u64);
        }

        for index in 0..3 {
            let popped = dequeue(&queue).await;
            assert_eq!(popped.index(), index);
            assert_eq!(popped.sequence(), Some(index as u64));
        }
    }

    #[tokio::test]
    async fn slot_accounting_stays_balanced() {
        let queue = WorkQueue::new(4).unwrap();
        assert!(queue.slots().is_balanced());

        queue.reserve_slot().await.unwrap();
        let snapshot = queue.slots();
        assert_eq!(snapshot.empty_slots, 3);
        assert_eq!(snapshot.in_flight, 1);
        assert!(snapshot.is_balanced());

        queue.publish(item(0));
        queue.release_filled();
        let snapshot = queue.slots();
        assert_eq!(snapshot.filled_slots, 1);
        assert_eq!(snapshot.queued, 1);
        assert_eq!(snapshot.in_flight, 0);
        assert!(snapshot.is_balanced());

        queue.take_filled().await.unwrap();
        assert!(queue.slots().is_balanced());
        queue.pop().unwrap();
        queue.release_empty();

        let snapshot = queue.slots();
        assert_eq!(snapshot.empty_slots, 4);
        assert_eq!(snapshot.queued, 0);
        assert!(snapshot.is_balanced());
    }

    #[tokio::test]
    async fn reserve_blocks_while_queue_is_full() {
        let queue = WorkQueue::new(1).unwrap();
        enqueue(&queue, item(0)).await;

        let blocked = timeout(Duration::from_millis(50), queue.reserve_slot()).await;
        assert!(blocked.is_err());

        dequeue(&queue).await;
        timeout(Duration::from_millis(50), queue.reserve_slot())
            .await
            .expect("slot should be free after dequeue")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_reservation_returns_the_slot() {
        let queue = WorkQueue::new(2).unwrap();
        queue.reserve_slot().await.unwrap();
        queue.cancel_reservation();

        let snapshot = queue.slots();
        assert_eq!(snapshot.empty_slots, 2);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test]
    async fn close_wakes_waiters_with_session_closed() {
        let queue = std::sync::Arc::new(WorkQueue::new(1).unwrap());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take_filled().await })
        };

        tokio::task::yield_now().await;
        queue.close();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionClosed);
        let err = queue.reserve_slot().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionClosed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshots_stay_balanced_under_contention() {
        let queue = std::sync::Arc::new(WorkQueue::new(2).unwrap());
        let producers = 4;
        let per_producer = 200;

        let mut workers = Vec::new();
        for _ in 0..producers {
            let queue = queue.clone();
            workers.push(tokio::spawn(async move {
                for index in 0..per_producer {
                    enqueue(&queue, item(index)).await;
                }
            }));
        }
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for _ in 0..producers * per_producer {
                    dequeue(&queue).await;
                }
            })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !consumer.is_finished() {
            assert!(tokio::time::Instant::now() < deadline, "queue stalled");
            let snapshot = queue.slots();
            assert!(snapshot.is_balanced(), "{snapshot:?}");
            assert!(snapshot.queued <= snapshot.capacity);
            tokio::task::yield_now().await;
        }

        timeout(Duration::from_secs(10), consumer)
            .await
            .unwrap()
            .unwrap();
        for worker in workers {
            worker.await.unwrap();
        }

        let snapshot = queue.slots();
        assert_eq!(snapshot.empty_slots, 2);
        assert!(snapshot.is_balanced());
    }
}

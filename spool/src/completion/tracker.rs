use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};

/// Outstanding-work counter of one producer's batch.
///
/// `remaining` starts at the batch size and only goes down: once per completion and once
/// per item abandoned after a terminal enqueue failure. The decrement and the zero check
/// are a single atomic operation, and the drain wait subscribes to the wakeup before
/// reading the counter, so reaching zero is never missed.
#[derive(Debug)]
pub struct ProducerProgress {
    submitted: usize,
    remaining: AtomicUsize,
    completed: AtomicUsize,
    abandoned: AtomicUsize,
    drained: Notify,
}

impl ProducerProgress {
    pub fn new(submitted: usize) -> Self {
        Self {
            submitted,
            remaining: AtomicUsize::new(submitted),
            completed: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Accounts for one completion and returns how many items are still outstanding.
    ///
    /// Fails with [`ErrorKind::InvalidState`] if nothing was outstanding, which would mean
    /// a duplicate notification.
    pub fn record_completion(&self) -> SpoolResult<usize> {
        let Ok(previous) = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
        else {
            bail!(
                ErrorKind::InvalidState,
                "Completion received with no outstanding items",
                format!("batch of {} already drained", self.submitted)
            );
        };

        self.completed.fetch_add(1, Ordering::AcqRel);
        let remaining = previous - 1;
        if remaining == 0 {
            self.drained.notify_waiters();
        }

        Ok(remaining)
    }

    /// Gives up on `count` items that will never be enqueued.
    ///
    /// Returns the number of items still outstanding.
    pub fn abandon(&self, count: usize) -> usize {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                Some(remaining.saturating_sub(count))
            })
            .unwrap_or_else(|previous| previous);
        self.abandoned
            .fetch_add(count.min(previous), Ordering::AcqRel);

        let remaining = previous.saturating_sub(count);
        if remaining == 0 {
            self.drained.notify_waiters();
        }

        remaining
    }

    /// Gives up on everything still outstanding, enqueued or not.
    ///
    /// Used once no completion can arrive anymore. Returns how many items were given up.
    pub fn abandon_outstanding(&self) -> usize {
        let previous = self.remaining.swap(0, Ordering::AcqRel);
        self.abandoned.fetch_add(previous, Ordering::AcqRel);
        self.drained.notify_waiters();

        previous
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Waits until nothing is outstanding.
    ///
    /// Woken directly when the counter reaches zero and re-checks at least every
    /// `poll_interval` regardless.
    pub async fn wait_drained(&self, poll_interval: Duration) {
        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();

            if self.remaining() == 0 {
                return;
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::timeout;

    use super::*;

    #[test]
    fn completions_count_down_to_zero() {
        let progress = ProducerProgress::new(2);
        assert_eq!(progress.record_completion().unwrap(), 1);
        assert_eq!(progress.record_completion().unwrap(), 0);
        assert_eq!(progress.completed(), 2);

        let err = progress.record_completion().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(progress.remaining(), 0);
    }

    #[test]
    fn abandon_never_underflows() {
        let progress = ProducerProgress::new(3);
        progress.record_completion().unwrap();

        assert_eq!(progress.abandon(5), 0);
        assert_eq!(progress.abandoned(), 2);
        assert_eq!(progress.completed(), 1);
    }

    #[tokio::test]
    async fn abandoning_outstanding_items_releases_the_drain_wait() {
        let progress = Arc::new(ProducerProgress::new(4));
        progress.record_completion().unwrap();

        let waiter = {
            let progress = progress.clone();
            tokio::spawn(async move { progress.wait_drained(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(progress.abandon_outstanding(), 3);
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain wait should be woken")
            .unwrap();

        assert_eq!(progress.remaining(), 0);
        assert_eq!(progress.abandoned(), 3);
        assert_eq!(progress.abandon_outstanding(), 0);
        assert_eq!(progress.abandoned(), 3);
    }

    #[tokio::test]
    async fn empty_batch_is_drained_immediately() {
        let progress = ProducerProgress::new(0);
        timeout(Duration::from_millis(100), progress.wait_drained(Duration::from_secs(60)))
            .await
            .expect("empty batch must not wait");
    }

    #[tokio::test]
    async fn drain_wakes_on_the_last_completion_without_polling() {
        let progress = Arc::new(ProducerProgress::new(3));
        let waiter = {
            let progress = progress.clone();
            tokio::spawn(async move { progress.wait_drained(Duration::from_secs(60)).await })
        };

        let recorders: Vec<_> = (0..3)
            .map(|_| {
                let progress = progress.clone();
                tokio::spawn(async move { progress.record_completion().unwrap() })
            })
            .collect();
        for recorder in recorders {
            recorder.await.unwrap();
        }

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain wait should be woken")
            .unwrap();
    }
}

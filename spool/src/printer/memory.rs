use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};
use crate::printer::Printer;
use crate::types::Item;

#[derive(Debug, Default)]
struct Inner {
    printed: Vec<Item>,
    failed: Vec<Item>,
}

/// In-memory printer for tests and demos.
///
/// Records every item it was handed, in order. It can be slowed down with a fixed delay,
/// made to fail for selected items, and held closed behind a [`PrinterGate`] so that the
/// queue fills up.
#[derive(Clone)]
pub struct MemoryPrinter {
    inner: Arc<Mutex<Inner>>,
    delay: Option<Duration>,
    fail_when: Option<fn(&Item) -> bool>,
    gate: Option<watch::Receiver<bool>>,
}

impl fmt::Debug for MemoryPrinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPrinter")
            .field("delay", &self.delay)
            .field("fails_selectively", &self.fail_when.is_some())
            .field("gated", &self.gate.is_some())
            .finish_non_exhaustive()
    }
}

/// Opens a gated [`MemoryPrinter`].
#[derive(Debug)]
pub struct PrinterGate(watch::Sender<bool>);

impl PrinterGate {
    pub fn open(&self) {
        self.0.send_replace(true);
    }
}

impl MemoryPrinter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            delay: None,
            fail_when: None,
            gate: None,
        }
    }

    /// Sleeps for `delay` before recording each item.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails with [`ErrorKind::ProcessingFailed`] for every item matching `predicate`.
    pub fn failing_when(mut self, predicate: fn(&Item) -> bool) -> Self {
        self.fail_when = Some(predicate);
        self
    }

    /// Blocks every print until the returned gate is opened.
    pub fn gated(mut self) -> (Self, PrinterGate) {
        let (tx, rx) = watch::channel(false);
        self.gate = Some(rx);
        (self, PrinterGate(tx))
    }

    /// Returns the items printed successfully, in print order.
    pub async fn printed(&self) -> Vec<Item> {
        self.inner.lock().await.printed.clone()
    }

    /// Returns the items the printer failed on.
    pub async fn failed(&self) -> Vec<Item> {
        self.inner.lock().await.failed.clone()
    }
}

impl Default for MemoryPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer for MemoryPrinter {
    fn name() -> &'static str {
        "memory"
    }

    async fn print(&self, item: &Item) -> SpoolResult<()> {
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            // A dropped gate counts as open.
            let _ = gate.wait_for(|open| *open).await;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        if self.fail_when.is_some_and(|fail_when| fail_when(item)) {
            inner.failed.push(item.clone());
            bail!(
                ErrorKind::ProcessingFailed,
                "Memory printer rejected the item",
                format!("{} item {}", item.owner(), item.index())
            );
        }

        info!(producer = %item.owner(), index = item.index(), "printing item");
        inner.printed.push(item.clone());

        Ok(())
    }
}

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};
use crate::spool_error;
use crate::types::{Completion, ProducerId};

/// Receiving end of a producer's completion mailbox.
pub type Mailbox = mpsc::UnboundedReceiver<Completion>;

/// Addressable mailboxes, one per registered producer.
///
/// The consumer never holds a reference to a producer: it hands each [`Completion`] to the
/// dispatcher, which looks up the owner's mailbox. Sending never blocks, so a slow producer
/// cannot stall the consumer loop.
#[derive(Debug, Clone, Default)]
pub struct CompletionDispatcher {
    mailboxes: Arc<Mutex<HashMap<ProducerId, mpsc::UnboundedSender<Completion>>>>,
}

impl CompletionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the mailbox of `producer`.
    ///
    /// Fails with [`ErrorKind::InvalidState`] while another live mailbox is registered
    /// under the same id.
    pub fn register(&self, producer: ProducerId) -> SpoolResult<Mailbox> {
        let (tx, rx) = mpsc::unbounded_channel();

        match self.lock().entry(producer) {
            Entry::Vacant(entry) => {
                entry.insert(tx);
            }
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    bail!(
                        ErrorKind::InvalidState,
                        "A producer with this id is already registered",
                        producer
                    );
                }
                entry.insert(tx);
            }
        }

        debug!(%producer, "completion mailbox registered");

        Ok(rx)
    }

    /// Delivers `completion` to the mailbox of its producer.
    ///
    /// Fails with [`ErrorKind::UnknownWorker`] when the producer is not registered or has
    /// dropped its mailbox.
    pub fn notify(&self, completion: Completion) -> SpoolResult<()> {
        let producer = completion.producer;
        let mut mailboxes = self.lock();

        let Some(tx) = mailboxes.get(&producer) else {
            bail!(
                ErrorKind::UnknownWorker,
                "Completion addressed to an unregistered producer",
                producer
            );
        };

        if tx.send(completion).is_err() {
            mailboxes.remove(&producer);
            warn!(%producer, "completion mailbox was closed, unregistering it");

            return Err(spool_error!(
                ErrorKind::UnknownWorker,
                "Completion addressed to a producer that stopped listening",
                producer
            ));
        }

        Ok(())
    }

    /// Closes the mailbox of `producer`. Returns whether it was registered.
    pub fn unregister(&self, producer: ProducerId) -> bool {
        let removed = self.lock().remove(&producer).is_some();
        if removed {
            debug!(%producer, "completion mailbox unregistered");
        }

        removed
    }

    /// Closes every mailbox and returns how many were open.
    pub fn unregister_all(&self) -> usize {
        let mut mailboxes = self.lock();
        let count = mailboxes.len();
        mailboxes.clear();

        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProducerId, mpsc::UnboundedSender<Completion>>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

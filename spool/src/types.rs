//! Identifiers and the immutable queued item.

use std::fmt;

use bytes::Bytes;

/// Session-unique identifier of a registered producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(pub u32);

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "producer-{}", self.0)
    }
}

/// Position of an item in the single global enqueue order.
pub type Sequence = u64;

/// A unit of work submitted by a producer.
///
/// Items are immutable: the content is a shared [`Bytes`] buffer and no setter exists. The
/// queue stamps the global [`Sequence`] when the item is published, after which the item
/// is owned by the queue until the consumer pops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    owner: ProducerId,
    index: usize,
    sequence: Option<Sequence>,
    content: Bytes,
}

impl Item {
    /// Creates the item at `index` of `owner`'s batch.
    pub fn new(owner: ProducerId, index: usize, content: impl Into<Bytes>) -> Self {
        Self {
            owner,
            index,
            sequence: None,
            content: content.into(),
        }
    }

    pub fn owner(&self) -> ProducerId {
        self.owner
    }

    /// Position of the item within its producer's batch.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Global enqueue position, set once the item is published.
    pub fn sequence(&self) -> Option<Sequence> {
        self.sequence
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub(crate) fn stamped(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// Notification that the consumer finished with one of a producer's items.
///
/// Carries only identifiers: by the time it is sent the consumer has released the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub producer: ProducerId,
    pub index: usize,
    pub sequence: Sequence,
    /// Whether the printer reported success for the item.
    pub printed: bool,
}

impl Completion {
    pub(crate) fn for_item(item: &Item, printed: bool) -> Self {
        Self {
            producer: item.owner,
            index: item.index,
            sequence: item.sequence.unwrap_or_default(),
            printed,
        }
    }
}

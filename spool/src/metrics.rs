//! Metric names and labels emitted through the `metrics` facade.

/// Label carrying the producer name.
pub const PRODUCER_LABEL: &str = "producer";

/// Label carrying an [`crate::error::ErrorKind`].
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label carrying a consumer lifecycle state.
pub const STATE_LABEL: &str = "state";

/// Counter of items published into the work queue.
pub const SPOOL_ITEMS_ENQUEUED_TOTAL: &str = "spool_items_enqueued_total";

/// Counter of items taken out of the work queue and handed to the printer.
pub const SPOOL_ITEMS_PROCESSED_TOTAL: &str = "spool_items_processed_total";

/// Counter of items the printer failed on.
pub const SPOOL_PRINT_FAILURES_TOTAL: &str = "spool_print_failures_total";

/// Counter of completion notifications handled by producers.
pub const SPOOL_COMPLETIONS_TOTAL: &str = "spool_completions_total";

/// Counter of failed enqueue attempts.
pub const SPOOL_ENQUEUE_FAILURES_TOTAL: &str = "spool_enqueue_failures_total";

/// Gauge of slots currently holding a published item.
pub const SPOOL_QUEUE_FILLED_SLOTS: &str = "spool_queue_filled_slots";

/// Counter of consumer lifecycle transitions.
pub const SPOOL_CONSUMER_TRANSITIONS_TOTAL: &str = "spool_consumer_transitions_total";

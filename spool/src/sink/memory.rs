use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{ErrorKind, SpoolError, SpoolResult};
use crate::sink::CompletionSink;
use crate::types::Completion;

#[derive(Debug, Default)]
struct Inner {
    completions: Vec<(String, Completion)>,
    errors: Vec<(String, SpoolError)>,
}

/// In-memory sink that keeps every completion and error it receives.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every completion with the name of the producer that handled it.
    pub async fn completions(&self) -> Vec<(String, Completion)> {
        self.inner.lock().await.completions.clone()
    }

    /// Returns how many completions `producer` received.
    pub async fn completion_count(&self, producer: &str) -> usize {
        self.inner
            .lock()
            .await
            .completions
            .iter()
            .filter(|(name, _)| name == producer)
            .count()
    }

    pub async fn errors(&self) -> Vec<(String, SpoolError)> {
        self.inner.lock().await.errors.clone()
    }

    /// Returns the kinds of the errors reported for `producer`.
    pub async fn error_kinds(&self, producer: &str) -> Vec<ErrorKind> {
        self.inner
            .lock()
            .await
            .errors
            .iter()
            .filter(|(name, _)| name == producer)
            .map(|(_, err)| err.kind())
            .collect()
    }
}

impl CompletionSink for MemorySink {
    async fn on_completion(&self, producer: &str, completion: &Completion) -> SpoolResult<()> {
        self.inner
            .lock()
            .await
            .completions
            .push((producer.to_owned(), *completion));

        Ok(())
    }

    async fn on_error(&self, producer: &str, error: &SpoolError) -> SpoolResult<()> {
        self.inner
            .lock()
            .await
            .errors
            .push((producer.to_owned(), error.clone()));

        Ok(())
    }
}

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use spool::session::{Session, SessionReport};
use spool::sink::memory::MemorySink;
use spool_config::shared::ProducerConfig;
use tokio::time::{sleep, timeout};

/// Upper bound for any single wait in the scenarios.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A producer called `name` submitting `count` numbered items.
pub fn batch(name: &str, count: usize) -> ProducerConfig {
    ProducerConfig::new(
        name,
        (0..count).map(|index| format!("item {index} of {name}")),
    )
}

/// Waits for every producer of `session`, failing the test if it takes too long.
pub async fn wait_session(session: &mut Session<MemorySink>) -> SessionReport {
    timeout(TEST_TIMEOUT, session.wait())
        .await
        .expect("session did not finish in time")
        .expect("session failed")
}

/// Polls `condition` until it holds, failing the test on timeout.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(TEST_TIMEOUT, async {
        while !condition().await {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable that turns on log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static TEST_TRACING: Once = Once::new();

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install the global tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Installs the global subscriber for a binary.
///
/// Filtering follows `RUST_LOG`, defaulting to `info` for the binary and the spool crates.
pub fn init_tracing(app_name: &str) -> Result<(), TracingError> {
    let default_directives = format!("{}=info,spool=info", app_name.replace('-', "_"));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    Ok(())
}

/// Installs a test-friendly subscriber once per process when `ENABLE_TRACING` is set.
///
/// Output goes through the test writer so it is captured per test.
pub fn init_test_tracing() {
    if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
        return;
    }

    TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spool=debug"));

        // Another test harness may already own the global subscriber.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

//! Print server: runs producer batches through a spool session onto standard output.

use std::error::Error;
use std::io::Write;

use clap::Parser;
use spool::error::{SpoolError, SpoolResult};
use spool::printer::Printer;
use spool::session::{Session, SessionReport};
use spool::sink::CompletionSink;
use spool::types::{Completion, Item};
use spool_config::load_config;
use spool_config::shared::SessionConfig;
use spool_telemetry::tracing::init_tracing;
use tracing::{error, info, warn};

const APP_NAME: &str = "spool-printer";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Load the session from the `configuration` directory instead of the built-in job.
    #[arg(long)]
    config: bool,

    /// Destroy the consumer once every producer has drained its batch.
    #[arg(long)]
    teardown: bool,

    /// Overrides the number of queue slots.
    #[arg(long)]
    capacity: Option<usize>,

    /// Number of times the producer batches are submitted.
    #[arg(long, default_value_t = 1)]
    rounds: usize,
}

/// Writes every item to standard output between banners.
#[derive(Debug, Clone, Copy)]
struct StdoutPrinter;

impl Printer for StdoutPrinter {
    fn name() -> &'static str {
        "stdout"
    }

    async fn print(&self, item: &Item) -> SpoolResult<()> {
        let content = String::from_utf8_lossy(item.content());
        let mut stdout = std::io::stdout().lock();

        writeln!(stdout, "-----Print Start-----")
            .and_then(|_| writeln!(stdout, "{content}"))
            .and_then(|_| writeln!(stdout, "-----Print Done------"))
            .map_err(|err| {
                spool::spool_error!(
                    spool::error::ErrorKind::ProcessingFailed,
                    "Failed to write to standard output",
                    source: err
                )
            })
    }
}

/// Logs what every producer hears back.
#[derive(Debug, Clone, Copy)]
struct LoggingSink;

impl CompletionSink for LoggingSink {
    async fn on_completion(&self, producer: &str, completion: &Completion) -> SpoolResult<()> {
        if !completion.printed {
            warn!(producer, index = completion.index, "{producer}: print task failed");
        }

        Ok(())
    }

    async fn on_error(&self, producer: &str, error: &SpoolError) -> SpoolResult<()> {
        error!(producer, %error, "{producer}: batch aborted");

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing(APP_NAME)?;

    if let Err(err) = main_impl().await {
        error!(error = %err, "print server failed");
        return Err(err);
    }

    Ok(())
}

async fn main_impl() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = if args.config {
        load_config::<SessionConfig>()?
    } else {
        SessionConfig::reference()
    };
    if let Some(capacity) = args.capacity {
        config.queue_capacity = capacity;
    }
    config.enable_teardown_after_drain |= args.teardown;

    let producers = config.producers.clone();
    let rounds = args.rounds.max(1);

    info!(
        queue_capacity = config.queue_capacity,
        producers = producers.len(),
        rounds,
        "starting print server"
    );

    let mut session = Session::start(config, StdoutPrinter, LoggingSink).await?;
    let mut failures = log_report(0, &session.wait().await?);

    for round in 1..rounds {
        session.start_round(producers.clone()).await?;
        failures += log_report(round, &session.wait().await?);
    }

    let consumer = session.shutdown().await?;
    info!(
        processed = consumer.processed,
        print_failures = consumer.print_failures,
        "print server stopped"
    );

    if failures > 0 {
        return Err(format!("{failures} producer(s) did not complete their batch").into());
    }

    Ok(())
}

/// Logs the outcome of a round and returns how many producers failed.
fn log_report(round: usize, report: &SessionReport) -> usize {
    let mut failures = 0;

    for producer in &report.producers {
        match &producer.error {
            Some(err) => {
                failures += 1;
                error!(
                    round,
                    producer = %producer.name,
                    error = %err,
                    abandoned = producer.abandoned,
                    solution = producer.solution,
                    "producer failed"
                );
            }
            None => info!(
                round,
                producer = %producer.name,
                completed = producer.completed,
                "producer finished"
            ),
        }
    }

    info!(round, consumer_state = %report.consumer_state, "round finished");

    failures
}

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use relayworker::WorkerCounters;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Polls until the worker has forwarded at least `target` records.
pub async fn wait_for_forwarded(
    counters: &WorkerCounters,
    target: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let forwarded = counters.snapshot().records_forwarded;
        if forwarded >= target {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("worker forwarded {forwarded} records within {timeout:?}, expected {target}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Returns an address nothing is listening on.
pub async fn unused_address() -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();
    drop(listener);
    Ok(address)
}

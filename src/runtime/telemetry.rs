use crate::transport::endpoint::EndpointRole;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Progress counters for one worker.
///
/// Written only by the worker loop task; readable from any task. Counters are
/// monotonic within one loop execution and reset when the loop starts.
#[derive(Default, Debug)]
pub struct WorkerCounters {
    requests_sent: AtomicU64,
    records_requested: AtomicU64,
    records_received: AtomicU64,
    records_processed: AtomicU64,
    records_forwarded: AtomicU64,
    records_dropped: AtomicU64,
    request_timeouts: AtomicU64,
    receive_timeouts: AtomicU64,
    result_timeouts: AtomicU64,
    stuck_result_attempts: AtomicU64,
}

impl WorkerCounters {
    pub fn record_request(&self, records: usize) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.records_requested
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.records_forwarded.fetch_add(1, Ordering::Relaxed);
        self.stuck_result_attempts.store(0, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
        self.stuck_result_attempts.store(0, Ordering::Relaxed);
    }

    /// Counts one timed-out attempt against the endpoint playing `role`.
    pub fn record_timeout(&self, role: EndpointRole) {
        match role {
            EndpointRole::RequestSend => {
                self.request_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            EndpointRole::DataReceive => {
                self.receive_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            EndpointRole::ResultSend => {
                self.result_timeouts.fetch_add(1, Ordering::Relaxed);
                self.stuck_result_attempts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.requests_sent,
            &self.records_requested,
            &self.records_received,
            &self.records_processed,
            &self.records_forwarded,
            &self.records_dropped,
            &self.request_timeouts,
            &self.receive_timeouts,
            &self.result_timeouts,
            &self.stuck_result_attempts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            records_requested: self.records_requested.load(Ordering::Relaxed),
            records_received: self.records_received.load(Ordering::Relaxed),
            records_processed: self.records_processed.load(Ordering::Relaxed),
            records_forwarded: self.records_forwarded.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
            receive_timeouts: self.receive_timeouts.load(Ordering::Relaxed),
            result_timeouts: self.result_timeouts.load(Ordering::Relaxed),
            stuck_result_attempts: self.stuck_result_attempts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub requests_sent: u64,
    pub records_requested: u64,
    pub records_received: u64,
    pub records_processed: u64,
    pub records_forwarded: u64,
    pub records_dropped: u64,
    pub request_timeouts: u64,
    pub receive_timeouts: u64,
    pub result_timeouts: u64,
    /// Failed attempts spent on the record currently waiting in result-send.
    pub stuck_result_attempts: u64,
}

impl CounterSnapshot {
    pub fn timeouts(&self) -> u64 {
        self.request_timeouts
            .saturating_add(self.receive_timeouts)
            .saturating_add(self.result_timeouts)
    }
}

/// Spawns a background task that periodically logs forwarding throughput and
/// counter totals until `shutdown` is cancelled.
pub fn spawn_metrics_reporter(
    worker: String,
    counters: Arc<WorkerCounters>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = counters.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "relayworker::metrics", worker = %worker, "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = counters.snapshot();
                    let forwarded_delta = current
                        .records_forwarded
                        .saturating_sub(last_snapshot.records_forwarded);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        forwarded_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "relayworker::metrics",
                        worker = %worker,
                        throughput = format!("{throughput:.2}"),
                        requests_sent = current.requests_sent,
                        records_received = current.records_received,
                        records_forwarded = current.records_forwarded,
                        records_dropped = current.records_dropped,
                        timeouts = current.timeouts(),
                        stuck_result_attempts = current.stuck_result_attempts,
                        "worker progress snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

//! Start/stop orchestration for a [`WorkerLoop`].

use super::worker_loop::WorkerLoop;
use crate::runtime::protocol::RecordProtocol;
use crate::runtime::telemetry::{self, CounterSnapshot, WorkerCounters};
use anyhow::{anyhow, bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct RunHandles<P: RecordProtocol> {
    run_token: CancellationToken,
    loop_handle: JoinHandle<(WorkerLoop<P>, CounterSnapshot)>,
    metrics_handle: JoinHandle<()>,
}

/// Owns the worker loop while it is idle and the task running it while it is
/// not.
///
/// Each [`start`](Self::start) derives a fresh run token from the root token,
/// so cancelling the root stops the current run and any later one.
pub struct LifecycleController<P: RecordProtocol> {
    name: String,
    counters: Arc<WorkerCounters>,
    metrics_interval: Duration,
    shutdown_root: CancellationToken,
    idle: Option<WorkerLoop<P>>,
    running: Option<RunHandles<P>>,
}

impl<P: RecordProtocol> LifecycleController<P> {
    pub fn new(worker: WorkerLoop<P>, metrics_interval: Duration) -> Self {
        Self::with_cancellation_token(worker, metrics_interval, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        worker: WorkerLoop<P>,
        metrics_interval: Duration,
        shutdown_root: CancellationToken,
    ) -> Self {
        Self {
            name: worker.name().to_owned(),
            counters: worker.counters(),
            metrics_interval,
            shutdown_root,
            idle: Some(worker),
            running: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Live counters of the current (or last) run.
    pub fn counters(&self) -> Arc<WorkerCounters> {
        self.counters.clone()
    }

    pub fn shutdown_root(&self) -> CancellationToken {
        self.shutdown_root.clone()
    }

    /// Swaps the root token used to derive run tokens. Only valid while stopped.
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            self.running.is_none(),
            "shutdown token should not change while the worker is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Spawns the loop task and the metrics reporter, returning once both are
    /// scheduled.
    ///
    /// Returns an error if the worker is already running or if a previous run
    /// lost the loop to a panic.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("worker {} already running", self.name);
        }
        let Some(mut worker) = self.idle.take() else {
            bail!(
                "worker {} cannot restart: its loop was lost when a previous run failed",
                self.name
            );
        };

        let run_token = self.shutdown_root.child_token();
        tracing::info!(worker = %self.name, "starting worker");

        let metrics_handle = telemetry::spawn_metrics_reporter(
            self.name.clone(),
            self.counters.clone(),
            run_token.clone(),
            self.metrics_interval,
        );
        let loop_token = run_token.clone();
        let loop_handle = tokio::spawn(async move {
            let summary = worker.run(&loop_token).await;
            (worker, summary)
        });

        self.running = Some(RunHandles {
            run_token,
            loop_handle,
            metrics_handle,
        });
        Ok(())
    }

    /// Cancels the current run and waits for the loop to exit.
    ///
    /// Returns the final counters. Stopping an idle worker returns the counters
    /// of the last run. No endpoint is touched after this returns.
    pub async fn stop(&mut self) -> Result<CounterSnapshot> {
        let Some(handles) = self.running.take() else {
            return Ok(self.counters.snapshot());
        };

        tracing::info!(worker = %self.name, "stopping worker");
        handles.run_token.cancel();

        let outcome = handles.loop_handle.await;

        if let Err(err) = handles.metrics_handle.await {
            tracing::warn!(worker = %self.name, error = %err, "metrics reporter task panicked");
        }

        match outcome {
            Ok((worker, summary)) => {
                self.idle = Some(worker);
                tracing::debug!(worker = %self.name, "worker loop joined");
                Ok(summary)
            }
            Err(err) => {
                tracing::error!(worker = %self.name, error = %err, "failed to join worker loop task");
                Err(anyhow!(err).context(format!("worker {} loop task failed", self.name)))
            }
        }
    }
}

impl<P: RecordProtocol> Drop for LifecycleController<P> {
    fn drop(&mut self) {
        if let Some(handles) = &self.running {
            handles.run_token.cancel();
        }
    }
}

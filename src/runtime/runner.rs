use crate::processor::lifecycle::LifecycleController;
use crate::processor::worker_loop::{WorkerEndpoints, WorkerLoop};
use crate::runtime::config::WorkerConfig;
use crate::runtime::protocol::RecordProtocol;
use crate::runtime::telemetry::{CounterSnapshot, WorkerCounters};
use crate::transport::endpoint::EndpointRole;
use crate::transport::messages::{RecordRequest, TriggerRecord};
use crate::transport::tcp::{TcpRecordReceiver, TcpRecordSender};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Builds a worker from a [`WorkerConfig`] and drives its lifecycle, including
/// OS signal handling for graceful shutdowns.
pub struct Runner<P: RecordProtocol> {
    controller: LifecycleController<P>,
    shutdown: CancellationToken,
    origin: String,
}

impl<P: RecordProtocol> Runner<P> {
    /// Creates the three TCP endpoints named by `config` and wires the worker.
    ///
    /// Endpoints are created in order (request destination, data source,
    /// result destination); the first failure aborts startup and names the
    /// endpoint that could not be created.
    pub async fn connect(config: WorkerConfig, protocol: P) -> Result<Self> {
        let buffer = config.endpoint_buffer();

        let requests = TcpRecordSender::<RecordRequest>::connect(config.request_address(), buffer)
            .await
            .with_context(|| {
                endpoint_failure(&config, EndpointRole::RequestSend, config.request_address())
            })?;
        let records = TcpRecordReceiver::<TriggerRecord>::bind(config.data_source_address(), buffer)
            .await
            .with_context(|| {
                endpoint_failure(
                    &config,
                    EndpointRole::DataReceive,
                    config.data_source_address(),
                )
            })?;
        let results =
            TcpRecordSender::<TriggerRecord>::connect(config.result_destination_address(), buffer)
                .await
                .with_context(|| {
                    endpoint_failure(
                        &config,
                        EndpointRole::ResultSend,
                        config.result_destination_address(),
                    )
                })?;

        let origin = config
            .advertise_address()
            .map(str::to_owned)
            .unwrap_or_else(|| records.local_addr().to_string());

        Ok(Self::with_endpoints(
            config,
            WorkerEndpoints::new(requests, records, results),
            origin,
            protocol,
        ))
    }

    /// Wires a worker around caller-provided endpoints.
    pub fn with_endpoints(
        config: WorkerConfig,
        endpoints: WorkerEndpoints,
        origin: impl Into<String>,
        protocol: P,
    ) -> Self {
        let origin = origin.into();
        let shutdown = CancellationToken::new();
        let worker = WorkerLoop::from_config(
            &config,
            origin.clone(),
            endpoints,
            protocol,
            Arc::new(WorkerCounters::default()),
        );
        let controller = LifecycleController::with_cancellation_token(
            worker,
            config.metrics_interval(),
            shutdown.clone(),
        );

        Self {
            controller,
            shutdown,
            origin,
        }
    }

    /// Address advertised to the dispatcher as the delivery target.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn counters(&self) -> Arc<WorkerCounters> {
        self.controller.counters()
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn start(&mut self) -> Result<()> {
        self.controller.start()
    }

    /// Stops the worker and returns its final counters.
    pub async fn stop(&mut self) -> Result<CounterSnapshot> {
        if !self.controller.is_running() {
            return Ok(self.controller.counters().snapshot());
        }

        self.shutdown.cancel();
        let summary = self.controller.stop().await;
        self.reinitialize_shutdown_token();
        summary
    }

    /// Runs until Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<CounterSnapshot> {
        self.start()?;
        tracing::info!(
            worker = self.controller.name(),
            origin = %self.origin,
            "runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown"
        );

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "failed to listen for Ctrl-C; shutting down");
                } else {
                    tracing::info!("Ctrl-C received; shutting down runner");
                }
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.controller.replace_shutdown_root(self.shutdown.clone());
    }
}

fn endpoint_failure(config: &WorkerConfig, role: EndpointRole, address: &str) -> String {
    format!(
        "worker {}: failed to create {} endpoint at {address}",
        config.name(),
        role.describe()
    )
}

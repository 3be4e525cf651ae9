use crate::processor::worker_loop::{ResultSendPolicy, StageTimeouts};
use crate::runtime::telemetry;
use crate::transport::messages::TriggerTypeMask;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_WORKER_NAME: &str = "relay-worker";
pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_RECORDS_PER_REQUEST: usize = 1;
pub const DEFAULT_ENDPOINT_BUFFER: usize = 16;

/// Runtime configuration for one worker stage.
///
/// All instances must be constructed via [`WorkerConfig::builder`],
/// [`WorkerConfig::new`] or [`WorkerConfig::from_json_str`] so invariants are
/// validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    name: String,
    request_address: String,
    data_source_address: String,
    result_destination_address: String,
    advertise_address: Option<String>,
    timeouts: StageTimeouts,
    records_per_request: usize,
    accepted_types: TriggerTypeMask,
    result_send_policy: ResultSendPolicy,
    metrics_interval: Duration,
    endpoint_buffer: usize,
}

pub struct WorkerConfigParams {
    pub name: String,
    pub request_address: String,
    pub data_source_address: String,
    pub result_destination_address: String,
    pub advertise_address: Option<String>,
    pub timeouts: StageTimeouts,
    pub records_per_request: usize,
    pub accepted_types: TriggerTypeMask,
    pub result_send_policy: ResultSendPolicy,
    pub metrics_interval: Duration,
    pub endpoint_buffer: usize,
}

/// On-disk shape of the configuration bundle. Durations are milliseconds and
/// every tunable is optional.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkerConfigDocument {
    name: Option<String>,
    request_address: String,
    data_source_address: String,
    result_destination_address: String,
    advertise_address: Option<String>,
    request_send_timeout_ms: Option<u64>,
    data_receive_timeout_ms: Option<u64>,
    result_send_timeout_ms: Option<u64>,
    records_per_request: Option<usize>,
    accepted_trigger_types: Option<Vec<u8>>,
    result_send_max_attempts: Option<usize>,
    metrics_interval_ms: Option<u64>,
    endpoint_buffer: Option<usize>,
}

impl WorkerConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: WorkerConfigParams) -> Result<Self> {
        let WorkerConfigParams {
            name,
            request_address,
            data_source_address,
            result_destination_address,
            advertise_address,
            timeouts,
            records_per_request,
            accepted_types,
            result_send_policy,
            metrics_interval,
            endpoint_buffer,
        } = params;

        let config = Self {
            name: trimmed_string(name),
            request_address: trimmed_string(request_address),
            data_source_address: trimmed_string(data_source_address),
            result_destination_address: trimmed_string(result_destination_address),
            advertise_address: advertise_address.map(trimmed_string),
            timeouts,
            records_per_request,
            accepted_types,
            result_send_policy,
            metrics_interval,
            endpoint_buffer,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON configuration bundle such as
    /// `{"request_address": "...", "data_source_address": "...", "result_destination_address": "..."}`.
    pub fn from_json_str(document: &str) -> Result<Self> {
        let document: WorkerConfigDocument =
            serde_json::from_str(document).context("failed to parse worker configuration")?;

        let mut builder = WorkerConfig::builder()
            .request_address(document.request_address)
            .data_source_address(document.data_source_address)
            .result_destination_address(document.result_destination_address);

        if let Some(name) = document.name {
            builder = builder.name(name);
        }
        if let Some(address) = document.advertise_address {
            builder = builder.advertise_address(address);
        }
        if let Some(ms) = document.request_send_timeout_ms {
            builder = builder.request_send_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = document.data_receive_timeout_ms {
            builder = builder.data_receive_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = document.result_send_timeout_ms {
            builder = builder.result_send_timeout(Duration::from_millis(ms));
        }
        if let Some(count) = document.records_per_request {
            builder = builder.records_per_request(count);
        }
        if let Some(types) = document.accepted_trigger_types {
            builder = builder.accepted_types(TriggerTypeMask::from_types(types));
        }
        if let Some(max_attempts) = document.result_send_max_attempts {
            builder = builder.result_send_policy(ResultSendPolicy::DropAfter { max_attempts });
        }
        if let Some(ms) = document.metrics_interval_ms {
            builder = builder.metrics_interval(Duration::from_millis(ms));
        }
        if let Some(buffer) = document.endpoint_buffer {
            builder = builder.endpoint_buffer(buffer);
        }

        builder.build()
    }

    /// Worker name attached to every log event.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destination of record requests.
    pub fn request_address(&self) -> &str {
        &self.request_address
    }

    /// Local address records are received on.
    pub fn data_source_address(&self) -> &str {
        &self.data_source_address
    }

    /// Destination of processed records.
    pub fn result_destination_address(&self) -> &str {
        &self.result_destination_address
    }

    /// Address advertised to the dispatcher as the request origin, when it
    /// differs from the bound data source address.
    pub fn advertise_address(&self) -> Option<&str> {
        self.advertise_address.as_deref()
    }

    pub fn timeouts(&self) -> StageTimeouts {
        self.timeouts
    }

    /// Number of records asked for by each request.
    pub fn records_per_request(&self) -> usize {
        self.records_per_request
    }

    pub fn accepted_types(&self) -> TriggerTypeMask {
        self.accepted_types
    }

    pub fn result_send_policy(&self) -> ResultSendPolicy {
        self.result_send_policy
    }

    /// Interval used by the metrics reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Queue depth used by network endpoints between the socket and the loop.
    pub fn endpoint_buffer(&self) -> usize {
        self.endpoint_buffer
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.name, "name")?;
        ensure_not_empty(&self.request_address, "request_address")?;
        ensure_not_empty(&self.data_source_address, "data_source_address")?;
        ensure_not_empty(&self.result_destination_address, "result_destination_address")?;

        if let Some(address) = &self.advertise_address {
            ensure_not_empty(address, "advertise_address")?;
        }

        if self.timeouts.request_send.is_zero() {
            bail!("request_send_timeout must be greater than 0");
        }

        if self.timeouts.data_receive.is_zero() {
            bail!("data_receive_timeout must be greater than 0");
        }

        if self.timeouts.result_send.is_zero() {
            bail!("result_send_timeout must be greater than 0");
        }

        if self.records_per_request == 0 {
            bail!("records_per_request must be greater than 0");
        }

        if self.accepted_types.is_empty() {
            bail!("accepted_types must accept at least one trigger type");
        }

        if let ResultSendPolicy::DropAfter { max_attempts: 0 } = self.result_send_policy {
            bail!("result_send_max_attempts must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.endpoint_buffer == 0 {
            bail!("endpoint_buffer must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct WorkerConfigBuilder {
    name: Option<String>,
    request_address: Option<String>,
    data_source_address: Option<String>,
    result_destination_address: Option<String>,
    advertise_address: Option<String>,
    request_send_timeout: Option<Duration>,
    data_receive_timeout: Option<Duration>,
    result_send_timeout: Option<Duration>,
    records_per_request: Option<usize>,
    accepted_types: Option<TriggerTypeMask>,
    result_send_policy: Option<ResultSendPolicy>,
    metrics_interval: Option<Duration>,
    endpoint_buffer: Option<usize>,
}

impl WorkerConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn request_address(mut self, address: impl Into<String>) -> Self {
        self.request_address = Some(address.into());
        self
    }

    pub fn data_source_address(mut self, address: impl Into<String>) -> Self {
        self.data_source_address = Some(address.into());
        self
    }

    pub fn result_destination_address(mut self, address: impl Into<String>) -> Self {
        self.result_destination_address = Some(address.into());
        self
    }

    pub fn advertise_address(mut self, address: impl Into<String>) -> Self {
        self.advertise_address = Some(address.into());
        self
    }

    pub fn request_send_timeout(mut self, timeout: Duration) -> Self {
        self.request_send_timeout = Some(timeout);
        self
    }

    pub fn data_receive_timeout(mut self, timeout: Duration) -> Self {
        self.data_receive_timeout = Some(timeout);
        self
    }

    pub fn result_send_timeout(mut self, timeout: Duration) -> Self {
        self.result_send_timeout = Some(timeout);
        self
    }

    pub fn records_per_request(mut self, count: usize) -> Self {
        self.records_per_request = Some(count);
        self
    }

    pub fn accepted_types(mut self, mask: TriggerTypeMask) -> Self {
        self.accepted_types = Some(mask);
        self
    }

    pub fn result_send_policy(mut self, policy: ResultSendPolicy) -> Self {
        self.result_send_policy = Some(policy);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn endpoint_buffer(mut self, buffer: usize) -> Self {
        self.endpoint_buffer = Some(buffer);
        self
    }

    pub fn build(self) -> Result<WorkerConfig> {
        let default_timeout = Duration::from_millis(DEFAULT_STAGE_TIMEOUT_MS);
        let params = WorkerConfigParams {
            name: self.name.unwrap_or_else(|| DEFAULT_WORKER_NAME.to_owned()),
            request_address: self.request_address.context("request_address is required")?,
            data_source_address: self
                .data_source_address
                .context("data_source_address is required")?,
            result_destination_address: self
                .result_destination_address
                .context("result_destination_address is required")?,
            advertise_address: self.advertise_address,
            timeouts: StageTimeouts {
                request_send: self.request_send_timeout.unwrap_or(default_timeout),
                data_receive: self.data_receive_timeout.unwrap_or(default_timeout),
                result_send: self.result_send_timeout.unwrap_or(default_timeout),
            },
            records_per_request: self
                .records_per_request
                .unwrap_or(DEFAULT_RECORDS_PER_REQUEST),
            accepted_types: self.accepted_types.unwrap_or_default(),
            result_send_policy: self.result_send_policy.unwrap_or_default(),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            endpoint_buffer: self.endpoint_buffer.unwrap_or(DEFAULT_ENDPOINT_BUFFER),
        };

        WorkerConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

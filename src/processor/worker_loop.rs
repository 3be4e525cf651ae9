//! The request / receive / process / forward state machine.
//!
//! Each iteration asks the dispatcher for a batch of records, then receives,
//! processes and forwards them one at a time. Every endpoint call goes through
//! a [`TimeoutRetryStage`], so the loop only leaves its cycle when the run
//! token is cancelled.

use super::retry_stage::{ReceiveOperation, SendOperation, StageOutcome, TimeoutRetryStage};
use crate::runtime::config::{WorkerConfig, DEFAULT_STAGE_TIMEOUT_MS};
use crate::runtime::protocol::RecordProtocol;
use crate::runtime::telemetry::{CounterSnapshot, WorkerCounters};
use crate::transport::endpoint::{EndpointRole, RecordReceiver, RecordSender};
use crate::transport::messages::{RecordRequest, TriggerRecord, TriggerTypeMask};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadlines applied to each endpoint call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub request_send: Duration,
    pub data_receive: Duration,
    pub result_send: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        let timeout = Duration::from_millis(DEFAULT_STAGE_TIMEOUT_MS);
        Self {
            request_send: timeout,
            data_receive: timeout,
            result_send: timeout,
        }
    }
}

/// What the loop does with a processed record the result destination keeps
/// refusing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultSendPolicy {
    /// Never give up on a record; progress stalls until it is delivered. The
    /// stall is visible through `stuck_result_attempts`.
    #[default]
    RetryForever,
    /// Drop the record after `max_attempts` timeouts and count it in
    /// `records_dropped`.
    DropAfter { max_attempts: usize },
}

impl ResultSendPolicy {
    pub fn max_attempts(&self) -> Option<usize> {
        match self {
            ResultSendPolicy::RetryForever => None,
            ResultSendPolicy::DropAfter { max_attempts } => Some(*max_attempts),
        }
    }
}

/// The three endpoints a worker talks to. Owned exclusively by the loop.
pub struct WorkerEndpoints {
    pub requests: Box<dyn RecordSender<RecordRequest>>,
    pub records: Box<dyn RecordReceiver<TriggerRecord>>,
    pub results: Box<dyn RecordSender<TriggerRecord>>,
}

impl WorkerEndpoints {
    pub fn new<Q, R, S>(requests: Q, records: R, results: S) -> Self
    where
        Q: RecordSender<RecordRequest> + 'static,
        R: RecordReceiver<TriggerRecord> + 'static,
        S: RecordSender<TriggerRecord> + 'static,
    {
        Self {
            requests: Box::new(requests),
            records: Box::new(records),
            results: Box::new(results),
        }
    }
}

pub struct WorkerLoopParams<P: RecordProtocol> {
    pub name: String,
    /// Address the dispatcher delivers records to.
    pub origin: String,
    pub accepted_types: TriggerTypeMask,
    pub records_per_request: usize,
    pub timeouts: StageTimeouts,
    pub result_send_policy: ResultSendPolicy,
    pub endpoints: WorkerEndpoints,
    pub protocol: P,
    pub counters: Arc<WorkerCounters>,
}

enum Phase {
    Request,
    Await { remaining: usize },
    Process { record: TriggerRecord, remaining: usize },
    Send { record: TriggerRecord, remaining: usize },
    Exiting,
}

enum Delivery {
    Forwarded,
    Dropped,
    Cancelled,
}

pub struct WorkerLoop<P: RecordProtocol> {
    name: String,
    origin: String,
    accepted_types: TriggerTypeMask,
    records_per_request: usize,
    timeouts: StageTimeouts,
    result_send_policy: ResultSendPolicy,
    endpoints: WorkerEndpoints,
    protocol: P,
    counters: Arc<WorkerCounters>,
}

impl<P: RecordProtocol> WorkerLoop<P> {
    pub fn new(params: WorkerLoopParams<P>) -> Self {
        let WorkerLoopParams {
            name,
            origin,
            accepted_types,
            records_per_request,
            timeouts,
            result_send_policy,
            endpoints,
            protocol,
            counters,
        } = params;

        Self {
            name,
            origin,
            accepted_types,
            records_per_request: records_per_request.max(1),
            timeouts,
            result_send_policy,
            endpoints,
            protocol,
            counters,
        }
    }

    pub fn from_config(
        config: &WorkerConfig,
        origin: impl Into<String>,
        endpoints: WorkerEndpoints,
        protocol: P,
        counters: Arc<WorkerCounters>,
    ) -> Self {
        Self::new(WorkerLoopParams {
            name: config.name().to_owned(),
            origin: origin.into(),
            accepted_types: config.accepted_types(),
            records_per_request: config.records_per_request(),
            timeouts: config.timeouts(),
            result_send_policy: config.result_send_policy(),
            endpoints,
            protocol,
            counters,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn counters(&self) -> Arc<WorkerCounters> {
        self.counters.clone()
    }

    /// Runs until `shutdown` is cancelled and returns the final counters.
    ///
    /// Counters are reset on entry. Exactly one summary event is emitted on
    /// exit, whichever phase observed the cancellation.
    #[tracing::instrument(name = "worker_loop", skip_all, fields(worker = %self.name))]
    pub async fn run(&mut self, shutdown: &CancellationToken) -> CounterSnapshot {
        self.counters.reset();
        tracing::info!(
            origin = %self.origin,
            records_per_request = self.records_per_request,
            "worker loop started"
        );

        let mut phase = Phase::Request;
        loop {
            phase = match phase {
                Phase::Request => {
                    if self.send_request(shutdown).await {
                        Phase::Await {
                            remaining: self.records_per_request,
                        }
                    } else {
                        Phase::Exiting
                    }
                }
                Phase::Await { remaining: 0 } => Phase::Request,
                Phase::Await { remaining } => match self.receive_record(shutdown).await {
                    Some(record) => Phase::Process {
                        record,
                        remaining: remaining - 1,
                    },
                    None => {
                        self.abandon_batch(remaining);
                        Phase::Exiting
                    }
                },
                Phase::Process { record, remaining } => {
                    let record = self.protocol.process(record);
                    self.counters.record_processed();
                    Phase::Send { record, remaining }
                }
                Phase::Send { record, remaining } => {
                    match self.forward_record(&record, shutdown).await {
                        Delivery::Forwarded | Delivery::Dropped => Phase::Await { remaining },
                        Delivery::Cancelled => {
                            tracing::debug!(
                                trigger_number = record.trigger_number,
                                "discarding unsent record on shutdown"
                            );
                            self.abandon_batch(remaining);
                            Phase::Exiting
                        }
                    }
                }
                Phase::Exiting => break,
            };
        }

        let summary = self.counters.snapshot();
        tracing::info!(
            requests_sent = summary.requests_sent,
            records_per_request = self.records_per_request,
            records_requested = summary.records_requested,
            records_received = summary.records_received,
            records_processed = summary.records_processed,
            records_forwarded = summary.records_forwarded,
            records_dropped = summary.records_dropped,
            "worker loop exiting"
        );
        summary
    }

    async fn send_request(&mut self, shutdown: &CancellationToken) -> bool {
        let request = RecordRequest::new(
            self.origin.as_str(),
            self.accepted_types,
            self.records_per_request,
        );
        tracing::trace!(count = request.count, "requesting records");

        let stage = TimeoutRetryStage::new(
            &self.name,
            EndpointRole::RequestSend,
            self.timeouts.request_send,
            &self.counters,
        );
        let mut operation = SendOperation::new(self.endpoints.requests.as_mut(), &request);

        match stage.run(&mut operation, shutdown).await {
            StageOutcome::Completed(()) => {
                self.counters.record_request(self.records_per_request);
                tracing::trace!(
                    requests_sent = self.counters.snapshot().requests_sent,
                    "request sent; awaiting records"
                );
                true
            }
            // The request stage is unbounded, so it can only end by cancellation.
            StageOutcome::Cancelled | StageOutcome::Exhausted { .. } => false,
        }
    }

    async fn receive_record(&mut self, shutdown: &CancellationToken) -> Option<TriggerRecord> {
        let stage = TimeoutRetryStage::new(
            &self.name,
            EndpointRole::DataReceive,
            self.timeouts.data_receive,
            &self.counters,
        );
        let mut operation: ReceiveOperation<'_, _, TriggerRecord> =
            ReceiveOperation::new(self.endpoints.records.as_mut());

        match stage.run(&mut operation, shutdown).await {
            StageOutcome::Completed(record) => {
                self.counters.record_received();
                tracing::trace!(
                    trigger_number = record.trigger_number,
                    "record received"
                );
                Some(record)
            }
            StageOutcome::Cancelled | StageOutcome::Exhausted { .. } => None,
        }
    }

    async fn forward_record(
        &mut self,
        record: &TriggerRecord,
        shutdown: &CancellationToken,
    ) -> Delivery {
        let stage = TimeoutRetryStage::new(
            &self.name,
            EndpointRole::ResultSend,
            self.timeouts.result_send,
            &self.counters,
        )
        .with_max_attempts(self.result_send_policy.max_attempts());
        let mut operation = SendOperation::new(self.endpoints.results.as_mut(), record);

        match stage.run(&mut operation, shutdown).await {
            StageOutcome::Completed(()) => {
                self.counters.record_forwarded();
                Delivery::Forwarded
            }
            StageOutcome::Exhausted { attempts } => {
                self.counters.record_dropped();
                tracing::info!(
                    trigger_number = record.trigger_number,
                    attempts,
                    "dropping processed record after exhausting result send attempts"
                );
                Delivery::Dropped
            }
            StageOutcome::Cancelled => Delivery::Cancelled,
        }
    }

    /// Records still owed by the current request are not carried over; the
    /// next run starts with a fresh request.
    fn abandon_batch(&self, remaining: usize) {
        if remaining > 0 {
            tracing::debug!(remaining, "abandoning undelivered remainder of batch");
        }
    }
}

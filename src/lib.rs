//! A bounded-retry relay worker.
//!
//! The worker repeatedly asks a dispatcher for a batch of records, receives
//! them one by one, runs each through a [`RecordProtocol`], and forwards the
//! result. Every endpoint call is bounded by a timeout and retried until it
//! succeeds or the worker is stopped.

pub mod processor;
pub mod runtime;
pub mod transport;

pub use processor::lifecycle::LifecycleController;
pub use processor::retry_stage::{StageOperation, StageOutcome, TimeoutRetryStage};
pub use processor::worker_loop::{
    ResultSendPolicy, StageTimeouts, WorkerEndpoints, WorkerLoop, WorkerLoopParams,
};
pub use runtime::config::{WorkerConfig, WorkerConfigBuilder, WorkerConfigParams};
pub use runtime::protocol::{from_fn, FnProtocol, PassThrough, RecordProtocol};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, CounterSnapshot, WorkerCounters};
pub use transport::{
    channel, ChannelReceiver, ChannelSender, EndpointRole, RecordReceiver, RecordRequest,
    RecordSender, TcpRecordReceiver, TcpRecordSender, TransportError, TriggerRecord,
    TriggerTypeMask,
};

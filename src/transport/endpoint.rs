//! Typed, timeout-bounded endpoint contracts shared by every transport.

use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;

/// The only failure an endpoint reports once it has been constructed.
///
/// Connection-level trouble (peer gone, channel closed) is folded into
/// [`TransportError::Timeout`] after the deadline has elapsed, so callers see a
/// single transient signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout { endpoint: String, timeout: Duration },
}

impl TransportError {
    pub fn timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        TransportError::Timeout {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout { endpoint, timeout } => write!(
                f,
                "endpoint {endpoint} timed out after {} ms",
                timeout.as_millis()
            ),
        }
    }
}

impl std::error::Error for TransportError {}

/// Role an endpoint plays for the worker. Used to label logs and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    RequestSend,
    DataReceive,
    ResultSend,
}

impl EndpointRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointRole::RequestSend => "request",
            EndpointRole::DataReceive => "data_source",
            EndpointRole::ResultSend => "result_destination",
        }
    }

    /// Human-readable label used in fatal startup errors.
    pub fn describe(&self) -> &'static str {
        match self {
            EndpointRole::RequestSend => "request destination",
            EndpointRole::DataReceive => "data source",
            EndpointRole::ResultSend => "result destination",
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Send-only endpoint for messages of type `T`.
///
/// A call makes at most one delivery attempt and must resolve once `timeout`
/// has elapsed. Implementations are driven from a single task, hence `&mut`.
pub trait RecordSender<T>: Send {
    fn send<'a>(
        &'a mut self,
        message: &'a T,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Address or label identifying the remote side.
    fn name(&self) -> &str;
}

/// Receive-only endpoint for messages of type `T`.
pub trait RecordReceiver<T>: Send {
    fn receive(&mut self, timeout: Duration) -> BoxFuture<'_, Result<T, TransportError>>;

    fn name(&self) -> &str;
}

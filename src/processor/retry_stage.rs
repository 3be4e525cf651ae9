//! Cancellable retry-on-timeout wrapper around a single endpoint call.
//!
//! A timeout is the normal steady-state signal that data is not there yet, so
//! the stage retries immediately with no backoff. Every failed attempt is
//! reported once, except while shutting down, when it is absorbed silently.

use crate::runtime::telemetry::WorkerCounters;
use crate::transport::endpoint::{EndpointRole, RecordReceiver, RecordSender, TransportError};
use futures::future::BoxFuture;
use std::marker::PhantomData;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Log lines used by a stage for one endpoint role.
#[derive(Clone, Copy)]
pub(crate) struct StageMessages {
    pub(crate) timeout: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) absorbed: &'static str,
}

pub(crate) const REQUEST_SEND: StageMessages = StageMessages {
    timeout: "send to request destination timed out; retrying",
    exhausted: "send to request destination timed out; giving up after final attempt",
    absorbed: "request send timeout absorbed during shutdown",
};

pub(crate) const DATA_RECEIVE: StageMessages = StageMessages {
    timeout: "receive from data source timed out; retrying",
    exhausted: "receive from data source timed out; giving up after final attempt",
    absorbed: "data receive timeout absorbed during shutdown",
};

pub(crate) const RESULT_SEND: StageMessages = StageMessages {
    timeout: "send to result destination timed out; retrying",
    exhausted: "send to result destination timed out; giving up after final attempt",
    absorbed: "result send timeout absorbed during shutdown",
};

fn messages_for(role: EndpointRole) -> &'static StageMessages {
    match role {
        EndpointRole::RequestSend => &REQUEST_SEND,
        EndpointRole::DataReceive => &DATA_RECEIVE,
        EndpointRole::ResultSend => &RESULT_SEND,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StageOutcome<T> {
    Completed(T),
    Cancelled,
    Exhausted { attempts: usize },
}

/// One retryable, timeout-bounded endpoint call.
pub trait StageOperation: Send {
    type Output: Send;

    fn attempt(
        &mut self,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Self::Output, TransportError>>;

    fn endpoint(&self) -> &str;
}

/// Sends the same message on every attempt.
pub struct SendOperation<'a, S: ?Sized, T> {
    sender: &'a mut S,
    message: &'a T,
}

impl<'a, S, T> SendOperation<'a, S, T>
where
    S: RecordSender<T> + ?Sized,
{
    pub fn new(sender: &'a mut S, message: &'a T) -> Self {
        Self { sender, message }
    }
}

impl<S, T> StageOperation for SendOperation<'_, S, T>
where
    S: RecordSender<T> + ?Sized,
    T: Sync,
{
    type Output = ();

    fn attempt(&mut self, timeout: Duration) -> BoxFuture<'_, Result<(), TransportError>> {
        self.sender.send(self.message, timeout)
    }

    fn endpoint(&self) -> &str {
        self.sender.name()
    }
}

/// Receives one message per successful attempt.
pub struct ReceiveOperation<'a, R: ?Sized, T> {
    receiver: &'a mut R,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, R, T> ReceiveOperation<'a, R, T>
where
    R: RecordReceiver<T> + ?Sized,
{
    pub fn new(receiver: &'a mut R) -> Self {
        Self {
            receiver,
            _marker: PhantomData,
        }
    }
}

impl<R, T> StageOperation for ReceiveOperation<'_, R, T>
where
    R: RecordReceiver<T> + ?Sized,
    T: Send,
{
    type Output = T;

    fn attempt(&mut self, timeout: Duration) -> BoxFuture<'_, Result<T, TransportError>> {
        self.receiver.receive(timeout)
    }

    fn endpoint(&self) -> &str {
        self.receiver.name()
    }
}

pub struct TimeoutRetryStage<'a> {
    worker: &'a str,
    role: EndpointRole,
    timeout: Duration,
    max_attempts: Option<usize>,
    counters: &'a WorkerCounters,
}

impl<'a> TimeoutRetryStage<'a> {
    /// Creates a stage that retries until success or cancellation.
    pub fn new(
        worker: &'a str,
        role: EndpointRole,
        timeout: Duration,
        counters: &'a WorkerCounters,
    ) -> Self {
        Self {
            worker,
            role,
            timeout,
            max_attempts: None,
            counters,
        }
    }

    /// Gives up with [`StageOutcome::Exhausted`] after `max_attempts` timeouts.
    pub fn with_max_attempts(mut self, max_attempts: Option<usize>) -> Self {
        self.max_attempts = max_attempts.map(|max| max.max(1));
        self
    }

    pub async fn run<O>(
        &self,
        operation: &mut O,
        shutdown: &CancellationToken,
    ) -> StageOutcome<O::Output>
    where
        O: StageOperation,
    {
        let messages = messages_for(self.role);
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempt = 0usize;

        loop {
            if shutdown.is_cancelled() {
                return StageOutcome::Cancelled;
            }

            attempt += 1;
            let err = match operation.attempt(self.timeout).await {
                Ok(value) => return StageOutcome::Completed(value),
                Err(err) => err,
            };

            if shutdown.is_cancelled() {
                tracing::trace!(
                    worker = self.worker,
                    endpoint = operation.endpoint(),
                    role = %self.role,
                    attempt,
                    "{}",
                    messages.absorbed
                );
                return StageOutcome::Cancelled;
            }

            self.counters.record_timeout(self.role);
            let exhausted = self
                .max_attempts
                .is_some_and(|max_attempts| attempt >= max_attempts);

            if exhausted {
                tracing::warn!(
                    worker = self.worker,
                    endpoint = operation.endpoint(),
                    role = %self.role,
                    timeout_ms,
                    attempts = attempt,
                    error = %err,
                    "{}",
                    messages.exhausted
                );
                return StageOutcome::Exhausted { attempts: attempt };
            }

            tracing::warn!(
                worker = self.worker,
                endpoint = operation.endpoint(),
                role = %self.role,
                timeout_ms,
                attempt,
                error = %err,
                "{}",
                messages.timeout
            );
        }
    }
}

//! In-process endpoints backed by bounded tokio channels.
//!
//! Useful for embedding the worker next to its dispatcher and for tests. A
//! closed channel behaves like an unreachable peer: the call waits out its
//! deadline and reports a timeout.

use super::endpoint::{RecordReceiver, RecordSender, TransportError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::time::{sleep, timeout};

pub struct ChannelSender<T> {
    name: String,
    tx: mpsc::Sender<T>,
}

pub struct ChannelReceiver<T> {
    name: String,
    rx: mpsc::Receiver<T>,
}

/// Creates a connected sender/receiver pair sharing `name`.
///
/// `capacity` is clamped to at least one slot.
pub fn channel<T>(
    name: impl Into<String>,
    capacity: usize,
) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let name = name.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelSender {
            name: name.clone(),
            tx,
        },
        ChannelReceiver { name, rx },
    )
}

impl<T> ChannelSender<T> {
    /// Pushes a message without a deadline; intended for the peer side of a
    /// pair (dispatchers, tests).
    pub async fn deliver(&self, message: T) -> bool {
        self.tx.send(message).await.is_ok()
    }
}

impl<T> ChannelReceiver<T> {
    /// Waits for the next message without a deadline; `None` once every
    /// sender is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns a message if one is already buffered.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> RecordSender<T> for ChannelSender<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn send<'a>(
        &'a mut self,
        message: &'a T,
        deadline: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            match self.tx.send_timeout(message.clone(), deadline).await {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => {
                    Err(TransportError::timeout(self.name.as_str(), deadline))
                }
                Err(SendTimeoutError::Closed(_)) => {
                    sleep(deadline).await;
                    Err(TransportError::timeout(self.name.as_str(), deadline))
                }
            }
        }
        .boxed()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T> RecordReceiver<T> for ChannelReceiver<T>
where
    T: Send + 'static,
{
    fn receive(&mut self, deadline: Duration) -> BoxFuture<'_, Result<T, TransportError>> {
        async move {
            match timeout(deadline, self.rx.recv()).await {
                Ok(Some(message)) => Ok(message),
                Ok(None) => {
                    // Every sender dropped: recv returns immediately, so wait
                    // out the deadline instead of spinning.
                    sleep(deadline).await;
                    Err(TransportError::timeout(self.name.as_str(), deadline))
                }
                Err(_) => Err(TransportError::timeout(self.name.as_str(), deadline)),
            }
        }
        .boxed()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

//! TCP endpoints carrying newline-delimited JSON frames.
//!
//! Both directions decouple the socket from the caller through a bounded
//! queue owned by a background task. A send therefore either enqueues a whole
//! frame before its deadline or does nothing, and a receive only ever yields
//! fully decoded messages.

use super::backoff::{retry_until_connected, ReconnectBackoff};
use super::endpoint::{RecordReceiver, RecordSender, TransportError};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::time::{sleep, timeout};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Upper bound on a single encoded frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
/// Deadline for the initial connection made during startup.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const RECONNECT_INITIAL_DELAY_MS: u64 = 50;
const RECONNECT_MAX_DELAY_MS: u64 = 2_000;
const ACCEPT_ERROR_DELAY_MS: u64 = 100;

pub struct TcpRecordSender<T> {
    name: String,
    frames: mpsc::Sender<String>,
    _writer: DropGuard,
    _marker: PhantomData<fn(T)>,
}

impl<T> TcpRecordSender<T> {
    /// Dials `address` once. Failure here is a startup error and is not
    /// retried; later connection losses are handled by the writer task.
    pub async fn connect(address: &str, buffer: usize) -> Result<Self> {
        let stream = timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .with_context(|| format!("timed out connecting to {address}"))?
            .with_context(|| format!("failed to connect to {address}"))?;

        let shutdown = CancellationToken::new();
        let (frames, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(run_writer(address.to_owned(), stream, rx, shutdown.clone()));

        tracing::debug!(endpoint = address, "connected outbound endpoint");

        Ok(Self {
            name: address.to_owned(),
            frames,
            _writer: shutdown.drop_guard(),
            _marker: PhantomData,
        })
    }
}

impl<T> RecordSender<T> for TcpRecordSender<T>
where
    T: Serialize + Sync,
{
    fn send<'a>(
        &'a mut self,
        message: &'a T,
        deadline: Duration,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let frame = match serde_json::to_string(message) {
                Ok(frame) => frame,
                Err(err) => {
                    // Nothing was sent; report it like an unreachable peer.
                    tracing::error!(endpoint = %self.name, error = %err, "failed to encode frame");
                    sleep(deadline).await;
                    return Err(TransportError::timeout(self.name.as_str(), deadline));
                }
            };

            match self.frames.send_timeout(frame, deadline).await {
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

async fn run_writer(
    address: String,
    stream: TcpStream,
    mut frames: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    let mut sink = FramedWrite::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    let mut pending: Option<String> = None;

    loop {
        let frame = match pending.take() {
            Some(frame) => frame,
            None => tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            },
        };

        if let Err(err) = sink.send(frame.as_str()).await {
            tracing::warn!(
                endpoint = %address,
                error = %err,
                "outbound connection lost; reconnecting"
            );
            pending = Some(frame);

            match reconnect(&address, &shutdown).await {
                Ok(stream) => {
                    sink = FramedWrite::new(
                        stream,
                        LinesCodec::new_with_max_length(MAX_FRAME_BYTES),
                    );
                    tracing::info!(endpoint = %address, "outbound connection re-established");
                }
                Err(_) => break,
            }
        }
    }

    tracing::debug!(endpoint = %address, "outbound writer stopped");
}

async fn reconnect(address: &str, shutdown: &CancellationToken) -> Result<TcpStream> {
    let backoff = ReconnectBackoff::new(
        Duration::from_millis(RECONNECT_INITIAL_DELAY_MS),
        Duration::from_millis(RECONNECT_MAX_DELAY_MS),
    )
    .with_cancellation(shutdown);

    retry_until_connected(
        backoff,
        |_| async move {
            TcpStream::connect(address)
                .await
                .with_context(|| format!("failed to reconnect to {address}"))
        },
        |attempt, delay, err| {
            tracing::debug!(
                endpoint = address,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "reconnect attempt failed"
            );
        },
    )
    .await
}

pub struct TcpRecordReceiver<T> {
    name: String,
    local_addr: SocketAddr,
    records: mpsc::Receiver<T>,
    _listener: DropGuard,
}

impl<T> TcpRecordReceiver<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Listens on `address` and accepts any number of upstream connections.
    pub async fn bind(address: &str, buffer: usize) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to listen on {address}"))?;
        let local_addr = listener
            .local_addr()
            .with_context(|| format!("failed to resolve bound address for {address}"))?;

        let shutdown = CancellationToken::new();
        let (tx, records) = mpsc::channel(buffer.max(1));
        tokio::spawn(accept_loop(listener, tx, shutdown.clone()));

        tracing::debug!(endpoint = %local_addr, "listening for inbound records");

        Ok(Self {
            name: local_addr.to_string(),
            local_addr,
            records,
            _listener: shutdown.drop_guard(),
        })
    }
}

impl<T> TcpRecordReceiver<T> {
    /// Address actually bound, which resolves port `0` requests.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl<T> RecordReceiver<T> for TcpRecordReceiver<T>
where
    T: Send + 'static,
{
    fn receive(&mut self, deadline: Duration) -> BoxFuture<'_, Result<T, TransportError>> {
        async move {
            match timeout(deadline, self.records.recv()).await {
                Ok(Some(record)) => Ok(record),
                Ok(None) => {
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

async fn accept_loop<T>(
    listener: TcpListener,
    records: mpsc::Sender<T>,
    shutdown: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "accepted upstream connection");
                    tokio::spawn(read_frames(stream, peer, records.clone(), shutdown.clone()));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to accept upstream connection");
                    sleep(Duration::from_millis(ACCEPT_ERROR_DELAY_MS)).await;
                }
            },
        }
    }
}

async fn read_frames<T>(
    stream: TcpStream,
    peer: SocketAddr,
    records: mpsc::Sender<T>,
    shutdown: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
{
    let mut frames = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            None => {
                tracing::debug!(peer = %peer, "upstream connection closed");
                break;
            }
            Some(Err(err)) => {
                tracing::warn!(
                    peer = %peer,
                    error = %err,
                    "dropping upstream connection after framing error"
                );
                break;
            }
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => match serde_json::from_str::<T>(&line) {
                Ok(record) => {
                    if records.send(record).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "discarding malformed frame");
                }
            },
        }
    }
}

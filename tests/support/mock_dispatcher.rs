use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use relayworker::{RecordRequest, TriggerRecord};
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// Stand-in for the upstream dispatcher and the downstream result consumer.
///
/// Listens for worker requests on one port and for forwarded results on
/// another, and can push records to whatever origin a request names.
pub struct MockDispatcher {
    request_address: String,
    result_address: String,
    requests: mpsc::UnboundedReceiver<RecordRequest>,
    results: mpsc::UnboundedReceiver<TriggerRecord>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockDispatcher {
    pub async fn start() -> Result<Self> {
        let request_listener = TcpListener::bind("127.0.0.1:0").await?;
        let result_listener = TcpListener::bind("127.0.0.1:0").await?;
        let request_address = request_listener.local_addr()?.to_string();
        let result_address = result_listener.local_addr()?.to_string();

        let (request_tx, requests) = mpsc::unbounded_channel();
        let (result_tx, results) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(collect_frames(request_listener, request_tx)),
            tokio::spawn(collect_frames(result_listener, result_tx)),
        ];

        Ok(Self {
            request_address,
            result_address,
            requests,
            results,
            tasks,
        })
    }

    pub fn request_address(&self) -> &str {
        &self.request_address
    }

    pub fn result_address(&self) -> &str {
        &self.result_address
    }

    pub async fn next_request(&mut self, wait: Duration) -> Result<RecordRequest> {
        timeout(wait, self.requests.recv())
            .await
            .context("no request arrived in time")?
            .context("request listener stopped")
    }

    pub async fn next_result(&mut self, wait: Duration) -> Result<TriggerRecord> {
        timeout(wait, self.results.recv())
            .await
            .context("no result arrived in time")?
            .context("result listener stopped")
    }

    /// Connects to `origin` and writes `records` as one frame each.
    pub async fn deliver(&self, origin: &str, records: &[TriggerRecord]) -> Result<()> {
        let stream = TcpStream::connect(origin)
            .await
            .with_context(|| format!("failed to connect to worker origin {origin}"))?;
        let mut frames = FramedWrite::new(stream, LinesCodec::new());
        for record in records {
            frames.send(serde_json::to_string(record)?).await?;
        }
        SinkExt::<String>::flush(&mut frames).await?;
        Ok(())
    }
}

impl Drop for MockDispatcher {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn collect_frames<T>(listener: TcpListener, sink: mpsc::UnboundedSender<T>)
where
    T: DeserializeOwned + Send + 'static,
{
    while let Ok((stream, _)) = listener.accept().await {
        let sink = sink.clone();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stream, LinesCodec::new());
            while let Some(Ok(line)) = lines.next().await {
                if let Ok(message) = serde_json::from_str(&line) {
                    if sink.send(message).is_err() {
                        break;
                    }
                }
            }
        });
    }
}

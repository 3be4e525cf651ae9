use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Exponential delay schedule used while re-establishing a lost connection.
#[derive(Clone, Copy)]
pub(crate) struct ReconnectBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> ReconnectBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            cancellation: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Runs `operation` until it succeeds or the token is cancelled, sleeping
/// between attempts. `on_retry` sees the attempt number, the upcoming delay
/// and the error that triggered the retry.
pub(crate) async fn retry_until_connected<'a, T, F, Fut, L>(
    config: ReconnectBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error),
{
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;

        if let Some(token) = config.cancellation {
            if token.is_cancelled() {
                return Err(anyhow!("reconnect cancelled"));
            }
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                on_retry(attempt, backoff, &err);
                sleep_with_cancellation(backoff, config.cancellation).await?;
                backoff = next_backoff(backoff, config.max_delay);
            }
        }
    }
}

async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("reconnect cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    current.saturating_mul(2).min(max_backoff)
}

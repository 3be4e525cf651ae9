//! Runs a worker against an in-process dispatcher over channel endpoints.
//!
//! Settings come from the environment:
//! `RELAYWORKER_BATCH`, `RELAYWORKER_RECORDS`, `RELAYWORKER_DISPATCH_DELAY_MS`.
//! Stops once every record came back, or on Ctrl-C.

use std::env;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use relayworker::{
    channel, from_fn, ChannelReceiver, ChannelSender, RecordRequest, Runner, TriggerRecord,
    WorkerConfig, WorkerEndpoints,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const DEFAULT_BATCH: usize = 4;
const DEFAULT_RECORDS: u64 = 64;
const DEFAULT_DISPATCH_DELAY_MS: u64 = 0;
const DEFAULT_LOG_DIRECTIVE: &str = "info";
const CHANNEL_CAPACITY: usize = 32;
const ORIGIN: &str = "loopback://worker";

#[tokio::main]
async fn main() -> Result<()> {
    init_demo_tracing();

    let batch = parse_env_with_default::<usize>("RELAYWORKER_BATCH", DEFAULT_BATCH)?;
    let total = parse_env_with_default::<u64>("RELAYWORKER_RECORDS", DEFAULT_RECORDS)?;
    let delay = Duration::from_millis(parse_env_with_default::<u64>(
        "RELAYWORKER_DISPATCH_DELAY_MS",
        DEFAULT_DISPATCH_DELAY_MS,
    )?);

    let config = WorkerConfig::builder()
        .name("loopback")
        .request_address(ORIGIN)
        .data_source_address(ORIGIN)
        .result_destination_address(ORIGIN)
        .records_per_request(batch)
        .metrics_interval(Duration::from_secs(1))
        .build()?;

    let (request_tx, request_rx) = channel("dispatcher", CHANNEL_CAPACITY);
    let (record_tx, record_rx) = channel("inbound", CHANNEL_CAPACITY);
    let (result_tx, result_rx) = channel("collector", CHANNEL_CAPACITY);

    let protocol = from_fn(|mut record: TriggerRecord| {
        record.payload = record.trigger_number.to_le_bytes().to_vec();
        record
    });
    let mut runner = Runner::with_endpoints(
        config,
        WorkerEndpoints::new(request_tx, record_rx, result_tx),
        ORIGIN,
        protocol,
    );

    let dispatcher = tokio::spawn(dispatch(request_rx, record_tx, total, delay));
    let collector = tokio::spawn(collect(result_rx, total, runner.cancellation_token()));

    let started = Instant::now();
    let summary = runner.run_until_ctrl_c().await?;
    dispatcher.abort();
    let collected = collector.await.context("collector task failed")?;

    println!(
        "forwarded {} of {total} records in {:.2?} ({} requests, {} timeouts)",
        collected,
        started.elapsed(),
        summary.requests_sent,
        summary.timeouts()
    );
    Ok(())
}

async fn dispatch(
    mut requests: ChannelReceiver<RecordRequest>,
    records: ChannelSender<TriggerRecord>,
    total: u64,
    delay: Duration,
) {
    let mut next_trigger = 0u64;
    while let Some(request) = requests.next().await {
        tracing::debug!(origin = %request.origin, count = request.count, "dispatching batch");
        if !delay.is_zero() {
            sleep(delay).await;
        }
        for _ in 0..request.count {
            if next_trigger >= total {
                break;
            }
            next_trigger += 1;
            if !records.deliver(TriggerRecord::new(1, next_trigger, 1, Vec::new())).await {
                return;
            }
        }
    }
}

async fn collect(
    mut results: ChannelReceiver<TriggerRecord>,
    total: u64,
    shutdown: CancellationToken,
) -> u64 {
    let mut collected = 0u64;
    while collected < total {
        match results.next().await {
            Some(_) => collected += 1,
            None => break,
        }
    }
    shutdown.cancel();
    collected
}

fn init_demo_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    relayworker::init_tracing();
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}

use std::sync::Arc;
use std::time::Duration;

use crate::support::{capture::EventCapture, helpers::init_tracing};
use relayworker::{
    channel, ChannelReceiver, ChannelSender, LifecycleController, PassThrough, RecordRequest,
    ResultSendPolicy, StageTimeouts, TriggerRecord, TriggerTypeMask, WorkerCounters,
    WorkerEndpoints, WorkerLoop, WorkerLoopParams,
};
use tokio::time::sleep;
use tracing::Level;

struct Harness {
    controller: LifecycleController<PassThrough>,
    requests: ChannelReceiver<RecordRequest>,
    records: ChannelSender<TriggerRecord>,
    results: ChannelReceiver<TriggerRecord>,
}

fn harness(records_per_request: usize) -> Harness {
    let (request_tx, requests) = channel("dispatcher", 16);
    let (records, record_rx) = channel("inbound", 16);
    let (result_tx, results) = channel("downstream", 16);
    let worker = WorkerLoop::new(WorkerLoopParams {
        name: format!("batch-{records_per_request}"),
        origin: "inbound".into(),
        accepted_types: TriggerTypeMask::ALL,
        records_per_request,
        timeouts: StageTimeouts::default(),
        result_send_policy: ResultSendPolicy::RetryForever,
        endpoints: WorkerEndpoints::new(request_tx, record_rx, result_tx),
        protocol: PassThrough,
        counters: Arc::new(WorkerCounters::default()),
    });

    Harness {
        controller: LifecycleController::new(worker, Duration::from_secs(1)),
        requests,
        records,
        results,
    }
}

#[tokio::test(start_paused = true)]
async fn requested_records_scale_with_batch_size() {
    init_tracing();
    for batch in [1usize, 2, 5] {
        let mut harness = harness(batch);
        harness.controller.start().expect("start");

        // Serve one full batch and a partial second one.
        harness.requests.next().await.expect("first request");
        for trigger in 0..batch as u64 {
            let record = TriggerRecord::new(1, trigger, 1, Vec::new());
            assert!(harness.records.deliver(record).await);
            harness.results.next().await.expect("forwarded");
        }
        harness.requests.next().await.expect("second request");
        sleep(Duration::from_millis(350)).await;

        let summary = harness.controller.stop().await.expect("stop");
        assert_eq!(summary.requests_sent, 2, "batch {batch}");
        assert_eq!(summary.records_requested, batch as u64 * summary.requests_sent);
        assert_eq!(summary.records_forwarded, batch as u64);
        assert_eq!(summary.receive_timeouts, 3, "batch {batch}");
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_worker_never_touches_endpoints() {
    init_tracing();
    let mut harness = harness(1);
    let root = harness.controller.shutdown_root();
    root.cancel();

    harness.controller.start().expect("start");
    let summary = harness.controller.stop().await.expect("stop");

    assert_eq!(summary.requests_sent, 0);
    assert!(harness.requests.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn late_data_warns_once_per_timeout_and_stop_logs_one_summary() {
    let capture = EventCapture::default();
    let _guard = capture.install();
    let mut harness = harness(2);
    harness.controller.start().expect("start");

    harness.requests.next().await.expect("request");
    sleep(Duration::from_millis(250)).await;
    let record = TriggerRecord::new(3, 1, 1, Vec::new());
    assert!(harness.records.deliver(record).await);
    harness.results.next().await.expect("forwarded");
    assert_eq!(capture.count(Level::WARN), 2);

    // Stop lands while the second record of the batch is still owed.
    let summary = harness.controller.stop().await.expect("stop");

    assert_eq!(summary.receive_timeouts, 2);
    assert_eq!(capture.count(Level::WARN), 2);
    assert_eq!(capture.count_message(Level::INFO, "worker loop exiting"), 1);
}

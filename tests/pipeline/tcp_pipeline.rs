use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, unused_address, wait_for_forwarded},
    mock_dispatcher::MockDispatcher,
};
use anyhow::Result;
use relayworker::{from_fn, PassThrough, Runner, TriggerRecord, TriggerTypeMask, WorkerConfig};
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relays_records_between_dispatcher_and_result_destination() -> Result<()> {
    init_tracing();
    let mut dispatcher = MockDispatcher::start().await?;

    let config = WorkerConfig::builder()
        .name("tcp-relay")
        .request_address(dispatcher.request_address())
        .data_source_address("127.0.0.1:0")
        .result_destination_address(dispatcher.result_address())
        .records_per_request(2)
        .accepted_types(TriggerTypeMask::from_types([1, 2]))
        .build()?;
    let protocol = from_fn(|mut record: TriggerRecord| {
        record.payload.reverse();
        record
    });
    let mut runner = Runner::connect(config, protocol).await?;
    runner.start()?;

    let request = dispatcher.next_request(WAIT).await?;
    assert_eq!(request.origin, runner.origin());
    assert_eq!(request.count, 2);
    assert!(request.accepted_types.accepts(2));
    assert!(!request.accepted_types.accepts(3));

    dispatcher
        .deliver(
            &request.origin,
            &[
                TriggerRecord::new(7, 1, 1, vec![1, 2, 3]),
                TriggerRecord::new(7, 2, 2, vec![4, 5]),
            ],
        )
        .await?;

    let first = dispatcher.next_result(WAIT).await?;
    let second = dispatcher.next_result(WAIT).await?;
    assert_eq!(first, TriggerRecord::new(7, 1, 1, vec![3, 2, 1]));
    assert_eq!(second, TriggerRecord::new(7, 2, 2, vec![5, 4]));

    // The worker asks for the next batch once the first one is done.
    let follow_up = dispatcher.next_request(WAIT).await?;
    assert_eq!(follow_up.origin, request.origin);

    let summary = runner.stop().await?;
    assert_eq!(summary.records_forwarded, 2);
    assert_eq!(summary.records_requested, 2 * summary.requests_sent);
    assert!(summary.requests_sent >= 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn advertised_address_overrides_bound_origin() -> Result<()> {
    init_tracing();
    let mut dispatcher = MockDispatcher::start().await?;
    let config = WorkerConfig::builder()
        .request_address(dispatcher.request_address())
        .data_source_address("127.0.0.1:0")
        .result_destination_address(dispatcher.result_address())
        .advertise_address("worker.example:9000")
        .build()?;

    let mut runner = Runner::connect(config, PassThrough).await?;
    runner.start()?;
    let request = dispatcher.next_request(WAIT).await?;
    assert_eq!(request.origin, "worker.example:9000");

    runner.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forwarded_counter_tracks_delivered_results() -> Result<()> {
    init_tracing();
    let mut dispatcher = MockDispatcher::start().await?;
    let config = WorkerConfig::builder()
        .request_address(dispatcher.request_address())
        .data_source_address("127.0.0.1:0")
        .result_destination_address(dispatcher.result_address())
        .build()?;
    let mut runner = Runner::connect(config, PassThrough).await?;
    let counters = runner.counters();
    runner.start()?;

    let request = dispatcher.next_request(WAIT).await?;
    dispatcher
        .deliver(&request.origin, &[TriggerRecord::new(1, 1, 1, Vec::new())])
        .await?;
    wait_for_forwarded(&counters, 1, WAIT).await?;
    assert_eq!(dispatcher.next_result(WAIT).await?.trigger_number, 1);

    let summary = runner.stop().await?;
    assert_eq!(summary.records_forwarded, 1);
    assert_eq!(summary.records_received, 1);
    Ok(())
}

#[tokio::test]
async fn unreachable_request_destination_aborts_startup() -> Result<()> {
    init_tracing();
    let missing = unused_address().await?;
    let config = WorkerConfig::builder()
        .name("no-dispatcher")
        .request_address(missing.as_str())
        .data_source_address("127.0.0.1:0")
        .result_destination_address(missing.as_str())
        .build()?;

    let err = match Runner::connect(config, PassThrough).await {
        Ok(_) => panic!("startup must fail without a request destination"),
        Err(err) => err,
    };
    let message = format!("{err:#}");
    assert!(message.contains("no-dispatcher"), "{message}");
    assert!(message.contains("request destination"), "{message}");
    assert!(message.contains(&missing), "{message}");
    Ok(())
}

#[tokio::test]
async fn occupied_data_source_address_aborts_startup() -> Result<()> {
    init_tracing();
    let dispatcher = MockDispatcher::start().await?;
    let occupied = TcpListener::bind("127.0.0.1:0").await?;
    let occupied_address = occupied.local_addr()?.to_string();
    let config = WorkerConfig::builder()
        .request_address(dispatcher.request_address())
        .data_source_address(occupied_address.as_str())
        .result_destination_address(dispatcher.result_address())
        .build()?;

    let err = match Runner::connect(config, PassThrough).await {
        Ok(_) => panic!("startup must fail when the inbound address is taken"),
        Err(err) => err,
    };
    let message = format!("{err:#}");
    assert!(message.contains("data source"), "{message}");
    assert!(message.contains(&occupied_address), "{message}");
    Ok(())
}

#[tokio::test]
async fn unreachable_result_destination_aborts_startup() -> Result<()> {
    init_tracing();
    let dispatcher = MockDispatcher::start().await?;
    let missing = unused_address().await?;
    let config = WorkerConfig::builder()
        .request_address(dispatcher.request_address())
        .data_source_address("127.0.0.1:0")
        .result_destination_address(missing.as_str())
        .build()?;

    let err = match Runner::connect(config, PassThrough).await {
        Ok(_) => panic!("startup must fail without a result destination"),
        Err(err) => err,
    };
    let message = format!("{err:#}");
    assert!(message.contains("result destination"), "{message}");
    Ok(())
}

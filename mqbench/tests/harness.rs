#![cfg(feature = "test-utils")]

use std::time::Duration;

use mqbench::error::ErrorKind;
use mqbench::messaging::memory::InMemoryBroker;
use mqbench::pipeline::LoadHarness;
use mqbench::resource::LocalTransactionFactory;
use mqbench_config::shared::{DestinationSpec, HarnessConfig, StopConfig};
use mqbench_telemetry::tracing::init_test_tracing;
use tokio::time::sleep;

fn harness_config(producers: u16, consumers: u16, stop: StopConfig) -> HarnessConfig {
    HarnessConfig {
        id: 1,
        destination: DestinationSpec::queue("bench"),
        producers,
        consumers,
        messages_per_commit: 3,
        message_size_bytes: 64,
        receive_timeout_ms: 100,
        flow_control: None,
        stop,
    }
}

fn count_stop(count: u64) -> StopConfig {
    StopConfig {
        stop_after_count: Some(count),
        stop_after_secs: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn produce_only_run_stops_exactly_at_count_target() {
    init_test_tracing();

    let broker = InMemoryBroker::new();
    let factory = LocalTransactionFactory::new(broker.clone());

    // A single producer commits units sequentially, so the committed message count
    // is exact: ten units of three messages each.
    let mut harness = LoadHarness::new(harness_config(1, 0, count_stop(10)), factory);
    harness.start().await.unwrap();
    harness.wait().await.unwrap();

    assert_eq!(broker.queue_depth("bench"), 30);
}

#[tokio::test(flavor = "multi_thread")]
async fn produce_and_consume_run_reaches_count_target() {
    init_test_tracing();

    let broker = InMemoryBroker::new();
    let factory = LocalTransactionFactory::new(broker.clone());

    let mut harness = LoadHarness::new(harness_config(1, 1, count_stop(20)), factory);
    harness.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(30), async {
        while harness.units_completed() < 20 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stop target should be reached");

    harness.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn duration_stop_ends_the_run() {
    init_test_tracing();

    let broker = InMemoryBroker::new();
    let factory = LocalTransactionFactory::new(broker);

    // Consumer-only: the queue stays empty, so only the deadline can end the run.
    let stop = StopConfig {
        stop_after_count: None,
        stop_after_secs: Some(1),
    };
    let mut harness = LoadHarness::new(harness_config(0, 1, stop), factory);
    harness.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(30), harness.wait())
        .await
        .expect("run should end once the duration elapses")
        .unwrap();
}

// Needs spare runtime workers: both workers spin on always-ready in-memory
// futures, and on a single-core host the default one-worker runtime never
// parks to drive the timer that paces this test.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_interrupts_a_running_harness() {
    init_test_tracing();

    let broker = InMemoryBroker::new();
    let factory = LocalTransactionFactory::new(broker);

    // A target this large is never reached; only shutdown can end the run.
    let mut harness = LoadHarness::new(harness_config(1, 1, count_stop(u64::MAX)), factory);
    harness.start().await.unwrap();

    sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(30), harness.shutdown_and_wait())
        .await
        .expect("shutdown should end the run promptly")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_without_start_is_a_noop() {
    init_test_tracing();

    let factory = LocalTransactionFactory::new(InMemoryBroker::new());
    let harness = LoadHarness::new(harness_config(1, 0, count_stop(1)), factory);

    harness.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn start_rejects_invalid_configuration() {
    init_test_tracing();

    let factory = LocalTransactionFactory::new(InMemoryBroker::new());
    let mut harness = LoadHarness::new(harness_config(0, 0, count_stop(1)), factory);

    let err = harness.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_can_only_be_called_once() {
    init_test_tracing();

    let factory = LocalTransactionFactory::new(InMemoryBroker::new());
    let mut harness = LoadHarness::new(harness_config(1, 0, count_stop(5)), factory);

    harness.start().await.unwrap();
    let err = harness.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    harness.wait().await.unwrap();
}

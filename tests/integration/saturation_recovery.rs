//! Capacity failure and recovery integration tests.
//!
//! These tests verify fail-fast behavior at queue capacity, bridge
//! records for saturated targets, probe timeouts against unresponsive
//! orchestrators, and how the stack reads once conditions clear.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use trestle::coordination::{
    BridgeStatus, CoordinationEvent, FailureReason, HealthConfig, MetricsAggregator,
    OrchestratorProbe, OrchestratorState, OrchestratorStatus, PerformanceCounters, TaskHandler,
    TaskOutcome,
};
use trestle::{Domain, Priority};

use crate::fixtures::{cross_task, local_task, wait_until, CoordinationHarness, RecordingHandler};

/// Probe stub that hangs until its healthy flag is set.
struct FlakyProbe {
    domain: Domain,
    healthy: AtomicBool,
}

impl FlakyProbe {
    fn new(domain: Domain) -> Arc<Self> {
        Arc::new(Self {
            domain,
            healthy: AtomicBool::new(false),
        })
    }

    fn recover(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl OrchestratorProbe for FlakyProbe {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn probe(&self) -> OrchestratorStatus {
        if !self.healthy.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        OrchestratorStatus {
            domain: self.domain,
            active_tasks: 0,
            max_tasks: 4,
            queue_size: 0,
            performance: PerformanceCounters::default(),
            status: OrchestratorState::Idle,
        }
    }
}

/// Test: A full queue rejects immediately
/// Given a domain queue with capacity 1 holding one task
/// When a second task is submitted
/// Then the submit fails fast and the queued task is untouched
#[tokio::test]
async fn test_local_queue_rejects_when_full() {
    let harness = CoordinationHarness::builder().with_max_depth(1).build();

    let first = local_task(Domain::Business, "intake", Priority::Medium);
    let first_id = first.id;
    harness.business.submit(first).await.unwrap();

    let start = Instant::now();
    let err = harness
        .business
        .submit(local_task(Domain::Business, "intake", Priority::Medium))
        .await
        .unwrap_err();
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "capacity rejection must not block"
    );

    match err {
        trestle::Error::QueueFull { domain, max_depth } => {
            assert_eq!(domain, Domain::Business);
            assert_eq!(max_depth, 1);
        }
        other => panic!("expected QueueFull, got {:?}", other),
    }

    assert_eq!(harness.business_queue.len().await, 1);
    let survivor = harness.business_queue.dequeue().await.unwrap();
    assert_eq!(survivor.id, first_id);
}

/// Test: Forwarding into a saturated target fails fast
/// Given a technical queue already at capacity
/// When a business task is forwarded across the bridge
/// Then the caller gets target_saturated immediately and a record is kept
#[tokio::test]
async fn test_forward_to_saturated_target_fails_fast() {
    let harness = CoordinationHarness::builder().with_max_depth(1).build();

    // Fill the technical queue
    harness
        .technical
        .submit(local_task(Domain::Technical, "occupier", Priority::Low))
        .await
        .unwrap();

    let task = cross_task("blocked_rollout", Priority::High);
    let task_id = task.id;

    let start = Instant::now();
    let err = harness.business.submit(task).await.unwrap_err();
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "saturation surfaces synchronously"
    );
    assert!(
        matches!(err, trestle::Error::TargetSaturated { domain: Domain::Technical }),
        "expected TargetSaturated, got {:?}",
        err
    );

    // The failed hop is still on record for diagnosis
    let handle = harness.bridge.handle_for(task_id).await.unwrap();
    let record = harness.bridge.record(handle).await.unwrap();
    assert_eq!(
        record.status,
        BridgeStatus::Failed {
            reason: FailureReason::TargetSaturated
        }
    );

    let counts = harness.bridge.status_counts().await;
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.delivered, 0);

    // The occupier was never displaced
    assert_eq!(harness.technical_queue.len().await, 1);
}

/// Test: Resubmission after drain succeeds
/// Given a forward that failed on a saturated target
/// When the target drains and the caller resubmits the same task
/// Then the new hop goes through under a fresh record
#[tokio::test]
async fn test_retry_after_drain_succeeds() {
    let harness = CoordinationHarness::builder().with_max_depth(1).build();

    harness
        .technical
        .submit(local_task(Domain::Technical, "occupier", Priority::Low))
        .await
        .unwrap();

    let task = cross_task("rollout", Priority::High);
    let retry = task.clone();

    harness.business.submit(task).await.unwrap_err();
    let failed_handle = harness.bridge.handle_for(retry.id).await.unwrap();

    // Capacity frees up; the caller resubmits
    harness.technical_queue.dequeue().await.unwrap();
    let outcome = harness.business.submit(retry).await.unwrap();
    let handle = outcome.handle().unwrap();

    assert_ne!(
        handle.bridge_id, failed_handle.bridge_id,
        "each attempt gets its own record"
    );

    let record = harness.bridge.record(handle).await.unwrap();
    assert_eq!(record.status, BridgeStatus::InTransit);

    // The first attempt's outcome is preserved
    let failed_record = harness.bridge.record(failed_handle).await.unwrap();
    assert_eq!(
        failed_record.status,
        BridgeStatus::Failed {
            reason: FailureReason::TargetSaturated
        }
    );
}

/// Test: An unresponsive orchestrator cannot stall the monitor
/// Given one healthy orchestrator and one hanging probe
/// When the monitor samples with a short probe budget
/// Then the cycle completes quickly, marking only the hung domain as error
#[tokio::test]
async fn test_probe_timeout_marks_error_then_recovers() {
    let harness = CoordinationHarness::new();
    let flaky = FlakyProbe::new(Domain::Technical);

    let probes: Vec<Arc<dyn OrchestratorProbe>> = vec![
        Arc::clone(&harness.business) as Arc<dyn OrchestratorProbe>,
        flaky.clone() as Arc<dyn OrchestratorProbe>,
    ];
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let monitor = trestle::coordination::HealthMonitor::new(
        HealthConfig::with_probe_timeout(Duration::from_millis(20)),
        probes,
        Arc::clone(&harness.bridge),
        Arc::new(MetricsAggregator::default()),
        event_tx,
    );

    let start = Instant::now();
    let snapshot = monitor.sample().await;
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "a hung probe must not stall the cycle"
    );

    let business = &snapshot.orchestrators[&Domain::Business];
    assert_eq!(business.state, OrchestratorState::Idle);
    assert_eq!(business.probe_failures, 0);

    let technical = &snapshot.orchestrators[&Domain::Technical];
    assert_eq!(technical.state, OrchestratorState::Error);
    assert_eq!(technical.probe_failures, 1);

    // A second miss bumps the consecutive count
    let snapshot = monitor.sample().await;
    assert_eq!(snapshot.orchestrators[&Domain::Technical].probe_failures, 2);

    let mut timeout_events = 0;
    while let Ok(event) = event_rx.try_recv() {
        if matches!(
            event,
            CoordinationEvent::ProbeTimedOut {
                domain: Domain::Technical,
                ..
            }
        ) {
            timeout_events += 1;
        }
    }
    assert_eq!(timeout_events, 2);

    // Recovery resets the count and restores the probed state
    flaky.recover();
    let snapshot = monitor.sample().await;
    let technical = &snapshot.orchestrators[&Domain::Technical];
    assert_eq!(technical.state, OrchestratorState::Idle);
    assert_eq!(technical.probe_failures, 0);
}

/// Test: A forgotten hop becomes a bottleneck
/// Given an in-transit hop older than the staleness threshold
/// When the monitor samples
/// Then the hop is counted as stale and as a bottleneck
#[tokio::test]
async fn test_stale_hop_counts_as_bottleneck() {
    let harness = CoordinationHarness::new();

    harness
        .bridge
        .forward(cross_task("forgotten", Priority::Low))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let (event_tx, _event_rx) = mpsc::channel(256);
    let monitor = harness.monitor(
        HealthConfig::with_staleness_threshold(Duration::from_millis(10)),
        Arc::new(MetricsAggregator::default()),
        event_tx,
    );

    let snapshot = monitor.sample().await;
    assert_eq!(snapshot.bridge.in_transit, 1);
    assert_eq!(snapshot.bridge.stale_in_flight, 1);
    assert_eq!(snapshot.bottleneck_count, 1);
}

/// Test: Terminal history is pruned, counters are not
/// Given a bridge keeping only the 2 most recent terminal records
/// When 4 hops are delivered
/// Then only the last 2 records remain but all 4 count as delivered
#[tokio::test]
async fn test_history_pruning_keeps_recent_records() {
    let harness = CoordinationHarness::builder().with_history_limit(2).build();

    let mut handles = Vec::new();
    for i in 0..4 {
        let task = cross_task(&format!("hop_{}", i), Priority::Medium);
        let handle = harness.bridge.forward(task).await.unwrap();
        let received = harness.technical_queue.dequeue().await.unwrap();
        let hash = received.context.content_hash().unwrap();
        harness
            .bridge
            .acknowledge(handle, &hash, TaskOutcome::Success)
            .await
            .unwrap();
        handles.push(handle);
    }

    assert!(harness.bridge.record(handles[0]).await.is_none());
    assert!(harness.bridge.record(handles[1]).await.is_none());
    assert!(harness.bridge.record(handles[2]).await.is_some());
    assert!(harness.bridge.record(handles[3]).await.is_some());

    let counts = harness.bridge.status_counts().await;
    assert_eq!(counts.delivered, 4, "pruning never rewrites the totals");
}

/// Test: Cancelling a hop does not yank the queued task
/// Given a forwarded task already sitting in the target queue
/// When the hop is cancelled and workers then drain the queue
/// Then the task still runs but the record stays cancelled
#[tokio::test]
async fn test_cancelled_hop_still_processes_but_record_stands() {
    let harness = CoordinationHarness::new();
    let handler = RecordingHandler::new();
    harness
        .technical
        .register_handler("abandoned", Arc::clone(&handler) as Arc<dyn TaskHandler>)
        .await;

    let task = cross_task("abandoned", Priority::Medium);
    let handle = harness.bridge.forward(task).await.unwrap();
    harness.bridge.cancel(handle).await.unwrap();

    let record = harness.bridge.record(handle).await.unwrap();
    assert_eq!(
        record.status,
        BridgeStatus::Failed {
            reason: FailureReason::Cancelled
        }
    );

    let workers = harness.technical.run_workers(1);
    wait_until(
        || async { handler.count().await == 1 },
        "the queued task to run regardless",
    )
    .await;

    // The worker's acknowledgement is rejected without disturbing the record
    let record = harness.bridge.record(handle).await.unwrap();
    assert_eq!(
        record.status,
        BridgeStatus::Failed {
            reason: FailureReason::Cancelled
        }
    );
    let counts = harness.bridge.status_counts().await;
    assert_eq!(counts.delivered, 0);
    assert_eq!(counts.failed, 1);

    harness.technical.shutdown();
    for worker in workers {
        worker.await.unwrap();
    }
}

/// Test: Bridge health tracks the delivery ratio
/// Given a mix of delivered and corrupted hops observed by the monitor
/// When metrics are read after each round
/// Then bridge health reflects the running ratio inside the window
#[tokio::test]
async fn test_bridge_health_degrades_and_recovers() {
    let harness = CoordinationHarness::new();
    let metrics = Arc::new(MetricsAggregator::default());
    let (event_tx, _event_rx) = mpsc::channel(256);
    let monitor = harness.monitor(
        HealthConfig::default(),
        Arc::clone(&metrics),
        event_tx,
    );

    // One clean delivery
    let task = cross_task("clean", Priority::Medium);
    let handle = harness.bridge.forward(task).await.unwrap();
    let received = harness.technical_queue.dequeue().await.unwrap();
    let hash = received.context.content_hash().unwrap();
    harness
        .bridge
        .acknowledge(handle, &hash, TaskOutcome::Success)
        .await
        .unwrap();

    // One corrupted hop
    let task = cross_task("mangled", Priority::Medium);
    let handle = harness.bridge.forward(task).await.unwrap();
    harness.technical_queue.dequeue().await.unwrap();
    harness
        .bridge
        .acknowledge(handle, "deadbeef", TaskOutcome::Success)
        .await
        .unwrap_err();

    metrics.observe(monitor.sample().await).await;
    let reading = metrics.metrics().await;
    assert_eq!(reading.bridge_health, 50.0);

    // Two more clean deliveries pull the ratio back up
    for name in ["repair_one", "repair_two"] {
        let task = cross_task(name, Priority::Medium);
        let handle = harness.bridge.forward(task).await.unwrap();
        let received = harness.technical_queue.dequeue().await.unwrap();
        let hash = received.context.content_hash().unwrap();
        harness
            .bridge
            .acknowledge(handle, &hash, TaskOutcome::Success)
            .await
            .unwrap();
    }

    metrics.observe(monitor.sample().await).await;
    let reading = metrics.metrics().await;
    assert_eq!(reading.bridge_health, 75.0);
}

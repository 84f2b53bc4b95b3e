//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Wiring a full two-domain coordination stack
//! - Task handlers with scripted behavior
//! - Task builders and event draining

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

use serde_json::json;
use trestle::coordination::{
    CoordinationBridge, CoordinationEvent, HealthConfig, HealthMonitor, MetricsAggregator,
    Orchestrator, OrchestratorProbe, TaskHandler, DEFAULT_HISTORY_LIMIT,
};
use trestle::core::queue::DEFAULT_MAX_DEPTH;
use trestle::{Domain, DomainQueue, Priority, Task, TaskContext};

/// How long `wait_until` polls before giving up.
pub const WAIT_DEADLINE: Duration = Duration::from_secs(5);

/// A fully wired two-domain coordination stack.
///
/// Both orchestrators share one bridge and one event channel, mirroring
/// how the system is assembled in production. Workers are not started
/// automatically; tests spawn exactly the concurrency they need.
pub struct CoordinationHarness {
    pub business_queue: Arc<DomainQueue>,
    pub technical_queue: Arc<DomainQueue>,
    pub bridge: Arc<CoordinationBridge>,
    pub business: Arc<Orchestrator>,
    pub technical: Arc<Orchestrator>,
    pub event_rx: mpsc::Receiver<CoordinationEvent>,
}

impl CoordinationHarness {
    /// Create a harness with default queue depth and worker capacity.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// The orchestrator responsible for the given domain.
    pub fn orchestrator(&self, domain: Domain) -> &Arc<Orchestrator> {
        match domain {
            Domain::Business => &self.business,
            Domain::Technical => &self.technical,
        }
    }

    /// Build a health monitor probing both orchestrators.
    pub fn monitor(
        &self,
        config: HealthConfig,
        metrics: Arc<MetricsAggregator>,
        event_tx: mpsc::Sender<CoordinationEvent>,
    ) -> HealthMonitor {
        let probes: Vec<Arc<dyn OrchestratorProbe>> = vec![
            Arc::clone(&self.business) as Arc<dyn OrchestratorProbe>,
            Arc::clone(&self.technical) as Arc<dyn OrchestratorProbe>,
        ];
        HealthMonitor::new(config, probes, Arc::clone(&self.bridge), metrics, event_tx)
    }

    /// Drain every event currently buffered on the shared channel.
    pub fn drain_events(&mut self) -> Vec<CoordinationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Stop both orchestrators' workers.
    pub fn shutdown(&self) {
        self.business.shutdown();
        self.technical.shutdown();
    }
}

impl Default for CoordinationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`CoordinationHarness`] with per-test capacity knobs.
pub struct HarnessBuilder {
    max_depth: usize,
    max_tasks: usize,
    grace_window: Duration,
    history_limit: usize,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_tasks: 4,
            grace_window: Duration::from_secs(10),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl HarnessBuilder {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub fn build(self) -> CoordinationHarness {
        let business_queue = Arc::new(DomainQueue::new(Domain::Business, self.max_depth));
        let technical_queue = Arc::new(DomainQueue::new(Domain::Technical, self.max_depth));
        let (event_tx, event_rx) = mpsc::channel(256);

        let bridge = Arc::new(CoordinationBridge::new(
            vec![Arc::clone(&business_queue), Arc::clone(&technical_queue)],
            self.history_limit,
            event_tx.clone(),
        ));

        let business = Arc::new(Orchestrator::with_capacity(
            Domain::Business,
            Arc::clone(&business_queue),
            Arc::clone(&bridge),
            self.max_tasks,
            self.grace_window,
            event_tx.clone(),
        ));
        let technical = Arc::new(Orchestrator::with_capacity(
            Domain::Technical,
            Arc::clone(&technical_queue),
            Arc::clone(&bridge),
            self.max_tasks,
            self.grace_window,
            event_tx,
        ));

        CoordinationHarness {
            business_queue,
            technical_queue,
            bridge,
            business,
            technical,
            event_rx,
        }
    }
}

/// Create a task that stays within its origin domain.
pub fn local_task(domain: Domain, task_type: &str, priority: Priority) -> Task {
    Task::new(domain, domain, task_type, priority, sample_context())
}

/// Create a business-to-technical task.
pub fn cross_task(task_type: &str, priority: Priority) -> Task {
    Task::new(
        Domain::Business,
        Domain::Technical,
        task_type,
        priority,
        sample_context(),
    )
}

/// A representative context payload with nesting and unicode.
pub fn sample_context() -> TaskContext {
    TaskContext::new()
        .with("ticket", json!("OPS-2048"))
        .with("requester", json!("priya"))
        .with(
            "details",
            json!({"environment": "staging", "regions": ["eu-west-1", "ap-søuth-1"], "dry_run": false}),
        )
}

/// Handler that records every task it processes.
pub struct RecordingHandler {
    processed: Mutex<Vec<Task>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            processed: Mutex::new(Vec::new()),
        })
    }

    pub async fn count(&self) -> usize {
        self.processed.lock().await.len()
    }

    /// Snapshot of processed tasks in completion order.
    pub async fn tasks(&self) -> Vec<Task> {
        self.processed.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(&self, task: &Task) -> trestle::Result<()> {
        self.processed.lock().await.push(task.clone());
        Ok(())
    }
}

/// Handler that fails every task with a scripted message.
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    pub fn new(message: &str) -> Arc<Self> {
        Arc::new(Self {
            message: message.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl TaskHandler for FailingHandler {
    async fn handle(&self, task: &Task) -> trestle::Result<()> {
        Err(trestle::Error::ProcessingFailed {
            task_id: task.id,
            message: self.message.clone(),
        })
    }
}

/// Handler that holds each task for a fixed delay before succeeding.
pub struct SlowHandler {
    delay: Duration,
}

impl SlowHandler {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay })
    }
}

#[async_trait::async_trait]
impl TaskHandler for SlowHandler {
    async fn handle(&self, _task: &Task) -> trestle::Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Poll `condition` until it holds or the deadline passes.
pub async fn wait_until<F, Fut>(condition: F, what: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT_DEADLINE;
    while !condition().await {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_wires_both_domains() {
        let harness = CoordinationHarness::new();

        assert_eq!(harness.business.domain(), Domain::Business);
        assert_eq!(harness.technical.domain(), Domain::Technical);
        assert_eq!(harness.business_queue.domain(), Domain::Business);
        assert_eq!(harness.technical_queue.domain(), Domain::Technical);
        assert!(harness.business_queue.is_empty().await);
        assert!(harness.technical_queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_builder_applies_capacity_knobs() {
        let harness = CoordinationHarness::builder()
            .with_max_depth(3)
            .with_max_tasks(1)
            .build();

        assert_eq!(harness.business_queue.max_depth(), 3);
        assert_eq!(harness.business.max_tasks(), 1);
        assert_eq!(harness.technical.max_tasks(), 1);
    }

    #[tokio::test]
    async fn test_sample_context_round_trips() {
        let context = sample_context();
        let wire = serde_json::to_string(&context).unwrap();
        let parsed: TaskContext = serde_json::from_str(&wire).unwrap();

        assert_eq!(parsed, context);
        assert_eq!(
            parsed.content_hash().unwrap(),
            context.content_hash().unwrap()
        );
    }

    #[tokio::test]
    async fn test_recording_handler_records() {
        let handler = RecordingHandler::new();
        let task = local_task(Domain::Business, "audit", Priority::Medium);

        handler.handle(&task).await.unwrap();

        assert_eq!(handler.count().await, 1);
        assert_eq!(handler.tasks().await[0].id, task.id);
    }

    #[tokio::test]
    async fn test_failing_handler_reports_message() {
        let handler = FailingHandler::new("boom");
        let task = local_task(Domain::Technical, "deploy", Priority::High);

        let err = handler.handle(&task).await.unwrap_err();
        match err {
            trestle::Error::ProcessingFailed { task_id, message } => {
                assert_eq!(task_id, task.id);
                assert_eq!(message, "boom");
            }
            other => panic!("expected ProcessingFailed, got {:?}", other),
        }
    }
}

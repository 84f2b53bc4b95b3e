//! Per-domain orchestrator: submission, workers, and status reporting.
//!
//! Each domain runs one `Orchestrator`. Local tasks go straight into the
//! domain queue; cross-domain tasks are handed to the
//! [`CoordinationBridge`](crate::coordination::CoordinationBridge). Workers
//! drain the queue concurrently and report bridged completions back through
//! the bridge. The queue is the single source of truth for backlog, so
//! `status()` reads depth live instead of tracking its own count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordination::bridge::{CoordinationBridge, TaskBridgeHandle, TaskOutcome};
use crate::coordination::event::{emit, CoordinationEvent};
use crate::core::queue::DomainQueue;
use crate::core::task::{Domain, Task};
use crate::error::{Error, Result};
use crate::{tlog_debug, tlog_error, tlog_warn};

/// Default cap on concurrently active tasks per domain.
pub const DEFAULT_MAX_TASKS: usize = 8;

/// Default time the utilization ratio must stay above the threshold
/// before the orchestrator reports itself overloaded.
pub const DEFAULT_GRACE_WINDOW_SECS: u64 = 10;

/// Utilization ratio above which an orchestrator is considered overloaded.
pub const OVERLOAD_THRESHOLD: f64 = 0.8;

/// How long an idle worker waits on the queue before re-checking shutdown.
const WORKER_POLL: Duration = Duration::from_millis(100);

/// Processes tasks of a registered type.
///
/// Handlers are registered per task type string and shared across
/// workers, so implementations must be `Send + Sync` and use interior
/// mutability for any state.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<()>;
}

/// Where a submitted task went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The task entered this domain's queue.
    Enqueued,
    /// The task crossed the bridge; the handle tracks its hop.
    Forwarded(TaskBridgeHandle),
}

impl SubmitOutcome {
    pub fn is_local(&self) -> bool {
        matches!(self, SubmitOutcome::Enqueued)
    }

    /// The bridge handle, when the task was forwarded.
    pub fn handle(&self) -> Option<TaskBridgeHandle> {
        match self {
            SubmitOutcome::Enqueued => None,
            SubmitOutcome::Forwarded(handle) => Some(*handle),
        }
    }
}

/// Coarse operational state reported by [`Orchestrator::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Processing or holding work within capacity.
    Active,
    /// No active tasks and an empty queue.
    Idle,
    /// Utilization has exceeded the threshold past the grace window.
    Overloaded,
    /// Unresponsive; assigned by the health monitor, never self-reported.
    Error,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorState::Active => write!(f, "active"),
            OrchestratorState::Idle => write!(f, "idle"),
            OrchestratorState::Overloaded => write!(f, "overloaded"),
            OrchestratorState::Error => write!(f, "error"),
        }
    }
}

/// Cumulative completion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub completed: u64,
    pub failed: u64,
}

impl PerformanceCounters {
    /// Rolling success ratio, 1.0 before any task has finished.
    pub fn success_ratio(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            1.0
        } else {
            self.completed as f64 / total as f64
        }
    }
}

/// Point-in-time view of one orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub domain: Domain,
    pub active_tasks: usize,
    pub max_tasks: usize,
    /// Depth of the domain queue at sampling time.
    pub queue_size: usize,
    pub performance: PerformanceCounters,
    pub status: OrchestratorState,
}

impl OrchestratorStatus {
    /// Fraction of task capacity in use, 0.0 when capacity is zero.
    pub fn utilization(&self) -> f64 {
        if self.max_tasks == 0 {
            0.0
        } else {
            self.active_tasks as f64 / self.max_tasks as f64
        }
    }
}

/// Drives one domain: accepts submissions, runs workers, reports status.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use trestle::coordination::{CoordinationBridge, Orchestrator};
/// use trestle::core::{Domain, DomainQueue, DEFAULT_MAX_DEPTH};
///
/// let queue = Arc::new(DomainQueue::new(Domain::Business, DEFAULT_MAX_DEPTH));
/// let (tx, _rx) = mpsc::channel(100);
/// let bridge = Arc::new(CoordinationBridge::new(vec![queue.clone()], 1000, tx.clone()));
/// let orchestrator = Arc::new(Orchestrator::new(Domain::Business, queue, bridge, tx));
/// let workers = orchestrator.run_workers(4);
/// ```
pub struct Orchestrator {
    domain: Domain,
    queue: Arc<DomainQueue>,
    bridge: Arc<CoordinationBridge>,
    /// Handlers by task type string.
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    max_tasks: usize,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    grace_window: Duration,
    /// When utilization first crossed the overload threshold; cleared
    /// the moment it drops back under.
    overload_since: Mutex<Option<Instant>>,
    event_tx: mpsc::Sender<CoordinationEvent>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with default capacity and grace window.
    pub fn new(
        domain: Domain,
        queue: Arc<DomainQueue>,
        bridge: Arc<CoordinationBridge>,
        event_tx: mpsc::Sender<CoordinationEvent>,
    ) -> Self {
        Self::with_capacity(
            domain,
            queue,
            bridge,
            DEFAULT_MAX_TASKS,
            Duration::from_secs(DEFAULT_GRACE_WINDOW_SECS),
            event_tx,
        )
    }

    /// Create an orchestrator with explicit capacity and grace window.
    pub fn with_capacity(
        domain: Domain,
        queue: Arc<DomainQueue>,
        bridge: Arc<CoordinationBridge>,
        max_tasks: usize,
        grace_window: Duration,
        event_tx: mpsc::Sender<CoordinationEvent>,
    ) -> Self {
        Self {
            domain,
            queue,
            bridge,
            handlers: RwLock::new(HashMap::new()),
            max_tasks,
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            grace_window,
            overload_since: Mutex::new(None),
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Register the handler for a task type, replacing any existing one.
    pub async fn register_handler(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) {
        self.handlers.write().await.insert(task_type.into(), handler);
    }

    /// Submit a task originating from this domain.
    ///
    /// Local tasks enter the domain queue directly; cross-domain tasks
    /// are forwarded over the bridge and tracked with the returned
    /// handle. Capacity failures surface immediately; retrying is the
    /// caller's decision.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if the task does not originate here
    /// - `Error::QueueFull` if the local queue is at capacity
    /// - `Error::TargetSaturated` if the target queue is at capacity
    pub async fn submit(&self, task: Task) -> Result<SubmitOutcome> {
        if task.origin_domain != self.domain {
            return Err(Error::Validation(format!(
                "task {} originates from '{}' but was submitted to the '{}' orchestrator",
                task.id.short(),
                task.origin_domain,
                self.domain
            )));
        }

        if task.target_domain == self.domain {
            let task_id = task.id;
            let priority = task.priority;
            self.queue.enqueue(task).await?;
            emit(
                &self.event_tx,
                CoordinationEvent::TaskQueued {
                    domain: self.domain,
                    task_id,
                    priority,
                },
            );
            tlog_debug!(
                "task {} queued locally in '{}' ({})",
                task_id.short(),
                self.domain,
                priority
            );
            Ok(SubmitOutcome::Enqueued)
        } else {
            let handle = self.bridge.forward(task).await?;
            Ok(SubmitOutcome::Forwarded(handle))
        }
    }

    /// Spawn `concurrency` workers draining this domain's queue.
    ///
    /// Workers run until [`shutdown`](Self::shutdown) is called. Each
    /// finishes its current task before exiting.
    pub fn run_workers(self: &Arc<Self>, concurrency: usize) -> Vec<JoinHandle<()>> {
        (0..concurrency)
            .map(|worker| {
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    tlog_debug!("'{}' worker {} started", orchestrator.domain, worker);
                    loop {
                        // Re-checked between tasks so a worker never picks
                        // up new work after shutdown.
                        if orchestrator.cancel.is_cancelled() {
                            break;
                        }
                        tokio::select! {
                            _ = orchestrator.cancel.cancelled() => {
                                break;
                            }
                            task = orchestrator.queue.dequeue_wait(WORKER_POLL) => {
                                if let Some(task) = task {
                                    orchestrator.process_task(task).await;
                                }
                            }
                        }
                    }
                    tlog_debug!("'{}' worker {} stopped", orchestrator.domain, worker);
                })
            })
            .collect()
    }

    /// Signal all workers to stop after their current task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run one dequeued task through its handler and settle bookkeeping.
    async fn process_task(&self, task: Task) {
        self.active.fetch_add(1, Ordering::SeqCst);
        emit(
            &self.event_tx,
            CoordinationEvent::TaskStarted {
                domain: self.domain,
                task_id: task.id,
            },
        );

        let handler = self.handlers.read().await.get(&task.task_type).cloned();
        let result = match handler {
            Some(handler) => handler.handle(&task).await,
            None => Err(Error::ProcessingFailed {
                task_id: task.id,
                message: format!("no handler registered for task type '{}'", task.task_type),
            }),
        };

        match &result {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                tlog_warn!(
                    "'{}' task {} ({}) failed: {}",
                    self.domain,
                    task.id.short(),
                    task.task_type,
                    err
                );
            }
        }

        // Tasks that crossed the bridge are acknowledged back, outcome
        // and context hash included.
        if task.origin_domain != self.domain {
            if let Some(handle) = self.bridge.handle_for(task.id).await {
                self.acknowledge_bridged(handle, &task, &result).await;
            }
        }

        match result {
            Ok(()) => {
                emit(
                    &self.event_tx,
                    CoordinationEvent::TaskCompleted {
                        domain: self.domain,
                        task_id: task.id,
                    },
                );
                tlog_debug!("'{}' completed task {}", self.domain, task.id.short());
            }
            Err(err) => {
                emit(
                    &self.event_tx,
                    CoordinationEvent::TaskFailed {
                        domain: self.domain,
                        task_id: task.id,
                        message: err.to_string(),
                    },
                );
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Report a bridged task's outcome with the hash of the context as
    /// received, letting the bridge verify integrity.
    async fn acknowledge_bridged(
        &self,
        handle: TaskBridgeHandle,
        task: &Task,
        result: &Result<()>,
    ) {
        let received_hash = match task.context.content_hash() {
            Ok(hash) => hash,
            Err(err) => {
                tlog_error!(
                    "failed to hash context of task {}: {}",
                    task.id.short(),
                    err
                );
                return;
            }
        };

        let outcome = match result {
            Ok(()) => TaskOutcome::Success,
            Err(err) => TaskOutcome::Error {
                message: err.to_string(),
            },
        };

        // The bridge logs and escalates corruption itself; here we only
        // note that the acknowledgement did not land.
        if let Err(err) = self.bridge.acknowledge(handle, &received_hash, outcome).await {
            tlog_warn!(
                "acknowledgement for task {} rejected: {}",
                task.id.short(),
                err
            );
        }
    }

    /// Snapshot this orchestrator's state.
    ///
    /// Utilization above [`OVERLOAD_THRESHOLD`] starts the grace clock;
    /// the state only reads `overloaded` once the ratio has stayed high
    /// for the full grace window. Dropping below the threshold resets
    /// the clock, so short bursts never report as overload.
    pub async fn status(&self) -> OrchestratorStatus {
        let active_tasks = self.active.load(Ordering::SeqCst);
        let queue_size = self.queue.len().await;
        let performance = PerformanceCounters {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        };

        let utilization = if self.max_tasks == 0 {
            0.0
        } else {
            active_tasks as f64 / self.max_tasks as f64
        };

        let mut overload_since = self.overload_since.lock().await;
        let status = if utilization > OVERLOAD_THRESHOLD {
            let since = overload_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= self.grace_window {
                OrchestratorState::Overloaded
            } else {
                OrchestratorState::Active
            }
        } else {
            *overload_since = None;
            if active_tasks == 0 && queue_size == 0 {
                OrchestratorState::Idle
            } else {
                OrchestratorState::Active
            }
        };
        drop(overload_since);

        OrchestratorStatus {
            domain: self.domain,
            active_tasks,
            max_tasks: self.max_tasks,
            queue_size,
            performance,
            status,
        }
    }
}

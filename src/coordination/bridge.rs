//! Cross-domain coordination bridge.
//!
//! The bridge is the only mutation path between domains. Every hop is
//! recorded as a `TaskBridge` state machine (`pending → in_transit →
//! delivered | failed`) so transfers stay auditable, and the task's
//! opaque context is integrity-checked with a content hash recorded at
//! forward time and verified at acknowledge time.
//!
//! The bridge never retries, never reorders a task's priority, and never
//! touches the task payload. Saturation and corruption surface to the
//! caller synchronously.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::coordination::event::{emit, CoordinationEvent};
use crate::core::queue::DomainQueue;
use crate::core::task::{Domain, Priority, Task, TaskId};
use crate::error::{Error, Result};
use crate::{tlog_debug, tlog_error, tlog_warn};

/// Terminal records retained for audit/metrics before pruning.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Unique identifier for one cross-domain hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeId(pub Uuid);

impl BridgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for BridgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BridgeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Why a hop ended in the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Target queue was at capacity when the hop was forwarded.
    TargetSaturated,
    /// Context hash mismatch between forward and acknowledge.
    ContextCorrupted,
    /// The target handler reported a processing failure.
    TargetProcessingError,
    /// The hop was cancelled before completion.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::TargetSaturated => write!(f, "target_saturated"),
            FailureReason::ContextCorrupted => write!(f, "context_corrupted"),
            FailureReason::TargetProcessingError => write!(f, "target_processing_error"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle state of one hop.
///
/// Transitions are monotonic: `pending → in_transit → delivered | failed`,
/// with `failed` also reachable directly from `pending`. Terminal states
/// never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum BridgeStatus {
    /// Record opened; not yet handed to the target queue.
    Pending,
    /// Accepted by the target queue, awaiting a worker.
    InTransit,
    /// Processed by the target with its context intact.
    Delivered,
    /// Terminal failure.
    Failed {
        /// Why the hop failed.
        reason: FailureReason,
    },
}

impl BridgeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeStatus::Delivered | BridgeStatus::Failed { .. })
    }
}

impl std::fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeStatus::Pending => write!(f, "pending"),
            BridgeStatus::InTransit => write!(f, "in_transit"),
            BridgeStatus::Delivered => write!(f, "delivered"),
            BridgeStatus::Failed { reason } => write!(f, "failed({})", reason),
        }
    }
}

/// Handler outcome reported when acknowledging a hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Error { message: String },
}

/// Audit record for one cross-domain hop.
///
/// A record is opened per forward attempt and never reused for another
/// task; re-forwarding after a failure opens a fresh record.
#[derive(Debug, Clone)]
pub struct TaskBridge {
    pub id: BridgeId,
    pub task_id: TaskId,
    /// Domain that forwarded the task.
    pub source: Domain,
    /// Domain whose workers must process it.
    pub target: Domain,
    pub task_type: String,
    /// Task priority at forward time; the bridge never remaps it.
    pub priority: Priority,
    /// Content hash of the task context at forward time.
    pub context_hash: String,
    pub status: BridgeStatus,
    /// Whether the context survived the hop byte-for-byte. Only
    /// meaningful once the record is terminal.
    pub context_preserved: bool,
    pub created_at: DateTime<Utc>,
    opened_at: Instant,
    state_changed_at: Instant,
}

impl TaskBridge {
    fn new(task: &Task, context_hash: String) -> Self {
        let now = Instant::now();
        Self {
            id: BridgeId::new(),
            task_id: task.id,
            source: task.origin_domain,
            target: task.target_domain,
            task_type: task.task_type.clone(),
            priority: task.priority,
            context_hash,
            status: BridgeStatus::Pending,
            context_preserved: false,
            created_at: Utc::now(),
            opened_at: now,
            state_changed_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// How long the record has sat in its current state.
    pub fn time_in_state(&self) -> Duration {
        self.state_changed_at.elapsed()
    }

    /// Milliseconds from record open to now (or to the terminal
    /// transition, when called right after it).
    fn lag_ms(&self) -> u64 {
        self.opened_at.elapsed().as_millis() as u64
    }

    /// Transition `pending → in_transit`.
    pub fn mark_in_transit(&mut self) -> Result<()> {
        match self.status {
            BridgeStatus::Pending => {
                self.status = BridgeStatus::InTransit;
                self.state_changed_at = Instant::now();
                Ok(())
            }
            ref other => Err(Error::InvalidTransition {
                from: other.to_string(),
                to: "in_transit".to_string(),
            }),
        }
    }

    /// Transition `in_transit → delivered`. Implies context preserved.
    pub fn mark_delivered(&mut self) -> Result<()> {
        match self.status {
            BridgeStatus::InTransit => {
                self.status = BridgeStatus::Delivered;
                self.context_preserved = true;
                self.state_changed_at = Instant::now();
                Ok(())
            }
            ref other => Err(Error::InvalidTransition {
                from: other.to_string(),
                to: "delivered".to_string(),
            }),
        }
    }

    /// Transition any live state to `failed`. Corruption clears the
    /// preserved flag.
    pub fn mark_failed(&mut self, reason: FailureReason) -> Result<()> {
        match self.status {
            BridgeStatus::Pending | BridgeStatus::InTransit => {
                if reason == FailureReason::ContextCorrupted {
                    self.context_preserved = false;
                }
                self.status = BridgeStatus::Failed { reason };
                self.state_changed_at = Instant::now();
                Ok(())
            }
            ref other => Err(Error::InvalidTransition {
                from: other.to_string(),
                to: format!("failed({})", reason),
            }),
        }
    }
}

/// Cheap handle to one hop, returned by [`CoordinationBridge::forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskBridgeHandle {
    pub bridge_id: BridgeId,
    pub task_id: TaskId,
}

/// Live and cumulative record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatusCounts {
    /// Live records not yet handed to the target queue.
    pub pending: usize,
    /// Live records awaiting a target worker.
    pub in_transit: usize,
    /// Cumulative delivered hops.
    pub delivered: u64,
    /// Cumulative failed hops (all reasons).
    pub failed: u64,
}

/// Terminal transition sample, consumed by health sampling and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSample {
    pub bridge_id: BridgeId,
    pub delivered: bool,
    /// Milliseconds from record open to the terminal transition.
    pub lag_ms: u64,
}

/// Forwarding stage entry; drains in the same order as `DomainQueue`.
struct StageEntry {
    task: Task,
    bridge_id: BridgeId,
    seq: u64,
}

impl PartialEq for StageEntry {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for StageEntry {}

impl PartialOrd for StageEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StageEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.task.priority.cmp(&other.task.priority) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

#[derive(Default)]
struct Ledger {
    records: HashMap<BridgeId, TaskBridge>,
    by_task: HashMap<TaskId, BridgeId>,
    terminal_order: VecDeque<BridgeId>,
    completions: VecDeque<CompletionSample>,
    /// Settle-time status per staged hop, consumed by its `forward` call.
    /// Outlives the record itself, which pruning may remove first.
    settled: HashMap<BridgeId, BridgeStatus>,
    delivered_total: u64,
    failed_total: u64,
}

impl Ledger {
    /// Record a terminal transition: counters, completion sample, and
    /// pruning of the oldest terminal records beyond the history limit.
    fn finish(&mut self, bridge_id: BridgeId, delivered: bool, lag_ms: u64, history_limit: usize) {
        if delivered {
            self.delivered_total += 1;
        } else {
            self.failed_total += 1;
        }

        self.completions.push_back(CompletionSample {
            bridge_id,
            delivered,
            lag_ms,
        });
        while self.completions.len() > history_limit {
            self.completions.pop_front();
        }

        self.terminal_order.push_back(bridge_id);
        while self.terminal_order.len() > history_limit {
            if let Some(old) = self.terminal_order.pop_front() {
                if let Some(record) = self.records.remove(&old) {
                    // Keep the task mapping if a newer record owns it.
                    if self.by_task.get(&record.task_id) == Some(&old) {
                        self.by_task.remove(&record.task_id);
                    }
                }
            }
        }
    }
}

/// The only cross-domain mutation path.
///
/// Holds a queue per registered domain; producers forward through here
/// and target workers acknowledge back. All state lives in the ledger of
/// `TaskBridge` records.
pub struct CoordinationBridge {
    queues: HashMap<Domain, std::sync::Arc<DomainQueue>>,
    ledger: Mutex<Ledger>,
    stage: Mutex<BinaryHeap<StageEntry>>,
    /// Serializes stage draining so racing forwards are processed in
    /// priority order rather than call order.
    forward_lock: Mutex<()>,
    seq: AtomicU64,
    history_limit: usize,
    event_tx: mpsc::Sender<CoordinationEvent>,
}

impl CoordinationBridge {
    /// Create a bridge over the given domain queues.
    ///
    /// A `history_limit` of zero is raised to one: the newest terminal
    /// record and its completion sample must survive their own settling.
    pub fn new(
        queues: Vec<std::sync::Arc<DomainQueue>>,
        history_limit: usize,
        event_tx: mpsc::Sender<CoordinationEvent>,
    ) -> Self {
        let queues = queues.into_iter().map(|q| (q.domain(), q)).collect();
        Self {
            queues,
            ledger: Mutex::new(Ledger::default()),
            stage: Mutex::new(BinaryHeap::new()),
            forward_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
            history_limit: history_limit.max(1),
            event_tx,
        }
    }

    /// Forward a cross-domain task into its target queue.
    ///
    /// Opens a `TaskBridge` record in `pending`, stages the task, and
    /// drains the stage in (priority, arrival) order. On enqueue success
    /// the record moves to `in_transit`; if the target queue is at
    /// capacity the record fails with `target_saturated` and the error is
    /// returned synchronously. The task itself is never modified.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if the task is not cross-domain, the target
    ///   has no registered queue, or the task's previous record is still
    ///   live
    /// - `Error::TargetSaturated` if the target queue rejected the task
    pub async fn forward(&self, task: Task) -> Result<TaskBridgeHandle> {
        if !task.is_cross_domain() {
            return Err(Error::Validation(format!(
                "task {} targets its own domain '{}'",
                task.id.short(),
                task.target_domain
            )));
        }
        if !self.queues.contains_key(&task.target_domain) {
            return Err(Error::Validation(format!(
                "no queue registered for domain '{}'",
                task.target_domain
            )));
        }

        let context_hash = task.context.content_hash()?;
        let record = TaskBridge::new(&task, context_hash);
        let handle = TaskBridgeHandle {
            bridge_id: record.id,
            task_id: task.id,
        };
        let target = task.target_domain;

        {
            let mut ledger = self.ledger.lock().await;
            // A task has at most one live record; re-forwarding is legal
            // only once the previous hop is terminal.
            let prior = ledger.by_task.get(&task.id).copied();
            if let Some(prior_id) = prior {
                match ledger.records.get(&prior_id) {
                    Some(existing) if !existing.is_terminal() => {
                        return Err(Error::Validation(format!(
                            "task {} already has a live bridge record {}",
                            task.id.short(),
                            prior_id.short()
                        )));
                    }
                    _ => {}
                }
            }
            ledger.by_task.insert(task.id, record.id);
            ledger.records.insert(record.id, record);
        }
        emit(
            &self.event_tx,
            CoordinationEvent::BridgeOpened {
                bridge_id: handle.bridge_id,
                task_id: handle.task_id,
                source: task.origin_domain,
                target,
            },
        );
        tlog_debug!(
            "bridge {} opened for task {} ({} -> {})",
            handle.bridge_id.short(),
            handle.task_id.short(),
            task.origin_domain,
            target
        );

        // Stage first, then drain under the forward lock. The holder of
        // the lock drains every staged hop highest-priority-first, so a
        // high-priority forward racing this one is never starved behind
        // lower-priority hops already staged.
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.stage.lock().await.push(StageEntry {
            task,
            bridge_id: handle.bridge_id,
            seq,
        });
        {
            let _drain = self.forward_lock.lock().await;
            loop {
                let entry = self.stage.lock().await.pop();
                match entry {
                    Some(entry) => self.process_stage_entry(entry).await,
                    None => break,
                }
            }
        }

        // Our own hop was processed either by this drain or by the lock
        // holder that preceded it. The settle-time status was deposited
        // for this call; the record itself may already be pruned.
        let status = self
            .ledger
            .lock()
            .await
            .settled
            .remove(&handle.bridge_id)
            .ok_or_else(|| Error::UnknownBridge(handle.bridge_id.to_string()))?;
        match status {
            BridgeStatus::Failed {
                reason: FailureReason::TargetSaturated,
            } => Err(Error::TargetSaturated { domain: target }),
            _ => Ok(handle),
        }
    }

    /// Attempt the target enqueue for one staged hop and settle its record.
    ///
    /// The ledger stays locked across the enqueue so a worker on the
    /// target side cannot observe (and acknowledge) the task before its
    /// record reads `in_transit`.
    async fn process_stage_entry(&self, entry: StageEntry) {
        let StageEntry {
            task, bridge_id, ..
        } = entry;
        let task_id = task.id;
        let target = task.target_domain;
        let Some(queue) = self.queues.get(&target) else {
            return;
        };

        let mut ledger = self.ledger.lock().await;
        match ledger.records.get_mut(&bridge_id) {
            // Cancelled while staged; drop the hop without enqueueing.
            Some(record) if record.is_terminal() => {
                let status = record.status.clone();
                ledger.settled.insert(bridge_id, status);
                return;
            }
            Some(_) => {}
            // Cancelled and already pruned from the audit history.
            None => {
                ledger.settled.insert(
                    bridge_id,
                    BridgeStatus::Failed {
                        reason: FailureReason::Cancelled,
                    },
                );
                return;
            }
        }

        match queue.enqueue(task).await {
            Ok(()) => {
                if let Some(record) = ledger.records.get_mut(&bridge_id) {
                    if record.mark_in_transit().is_ok() {
                        ledger.settled.insert(bridge_id, BridgeStatus::InTransit);
                        drop(ledger);
                        emit(
                            &self.event_tx,
                            CoordinationEvent::BridgeForwarded { bridge_id, task_id },
                        );
                        tlog_debug!(
                            "bridge {} in transit to '{}' queue",
                            bridge_id.short(),
                            target
                        );
                    }
                }
            }
            // Enqueue only rejects on capacity.
            Err(_) => {
                if let Some(record) = ledger.records.get_mut(&bridge_id) {
                    if record.mark_failed(FailureReason::TargetSaturated).is_ok() {
                        let lag_ms = record.lag_ms();
                        ledger.settled.insert(
                            bridge_id,
                            BridgeStatus::Failed {
                                reason: FailureReason::TargetSaturated,
                            },
                        );
                        ledger.finish(bridge_id, false, lag_ms, self.history_limit);
                        drop(ledger);
                        emit(
                            &self.event_tx,
                            CoordinationEvent::BridgeFailed {
                                bridge_id,
                                task_id,
                                reason: FailureReason::TargetSaturated,
                            },
                        );
                        tlog_warn!(
                            "bridge {} failed: '{}' queue saturated",
                            bridge_id.short(),
                            target
                        );
                    }
                }
            }
        }
    }

    /// Report the processing outcome for an in-transit hop.
    ///
    /// The received context hash is compared against the hash recorded at
    /// forward time. A mismatch fails the hop with `context_corrupted`
    /// regardless of the reported outcome, is logged at error level, and
    /// is returned as `Error::ContextMismatch`; corruption is never
    /// retried by the bridge. With a matching hash, `Success` delivers
    /// the hop and `Error` fails it with `target_processing_error`.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownBridge` for a pruned or foreign handle
    /// - `Error::InvalidTransition` unless the record is `in_transit`
    /// - `Error::ContextMismatch` when the hash differs
    pub async fn acknowledge(
        &self,
        handle: TaskBridgeHandle,
        received_context_hash: &str,
        outcome: TaskOutcome,
    ) -> Result<BridgeStatus> {
        let mut ledger = self.ledger.lock().await;
        let record = ledger
            .records
            .get_mut(&handle.bridge_id)
            .ok_or_else(|| Error::UnknownBridge(handle.bridge_id.to_string()))?;

        let hash_ok = received_context_hash == record.context_hash;
        if record.status != BridgeStatus::InTransit {
            let attempted = if !hash_ok {
                "failed(context_corrupted)".to_string()
            } else {
                match outcome {
                    TaskOutcome::Success => "delivered".to_string(),
                    TaskOutcome::Error { .. } => "failed(target_processing_error)".to_string(),
                }
            };
            return Err(Error::InvalidTransition {
                from: record.status.to_string(),
                to: attempted,
            });
        }

        if !hash_ok {
            record.mark_failed(FailureReason::ContextCorrupted)?;
            let lag_ms = record.lag_ms();
            ledger.finish(handle.bridge_id, false, lag_ms, self.history_limit);
            drop(ledger);
            emit(
                &self.event_tx,
                CoordinationEvent::BridgeFailed {
                    bridge_id: handle.bridge_id,
                    task_id: handle.task_id,
                    reason: FailureReason::ContextCorrupted,
                },
            );
            tlog_error!(
                "context corrupted crossing bridge {} for task {}",
                handle.bridge_id.short(),
                handle.task_id.short()
            );
            return Err(Error::ContextMismatch {
                task_id: handle.task_id,
            });
        }

        record.context_preserved = true;
        match outcome {
            TaskOutcome::Success => {
                record.mark_delivered()?;
                let lag_ms = record.lag_ms();
                ledger.finish(handle.bridge_id, true, lag_ms, self.history_limit);
                drop(ledger);
                emit(
                    &self.event_tx,
                    CoordinationEvent::BridgeDelivered {
                        bridge_id: handle.bridge_id,
                        task_id: handle.task_id,
                        lag_ms,
                    },
                );
                tlog_debug!(
                    "bridge {} delivered task {} in {}ms",
                    handle.bridge_id.short(),
                    handle.task_id.short(),
                    lag_ms
                );
                Ok(BridgeStatus::Delivered)
            }
            TaskOutcome::Error { message } => {
                record.mark_failed(FailureReason::TargetProcessingError)?;
                let lag_ms = record.lag_ms();
                ledger.finish(handle.bridge_id, false, lag_ms, self.history_limit);
                drop(ledger);
                emit(
                    &self.event_tx,
                    CoordinationEvent::BridgeFailed {
                        bridge_id: handle.bridge_id,
                        task_id: handle.task_id,
                        reason: FailureReason::TargetProcessingError,
                    },
                );
                tlog_warn!(
                    "bridge {} failed processing task {}: {}",
                    handle.bridge_id.short(),
                    handle.task_id.short(),
                    message
                );
                Ok(BridgeStatus::Failed {
                    reason: FailureReason::TargetProcessingError,
                })
            }
        }
    }

    /// Cancel a live hop.
    ///
    /// Valid from `pending` and `in_transit` only; the record fails with
    /// reason `cancelled`. A hop already handed to the target queue may
    /// still be processed, but its acknowledge will then be rejected as
    /// an invalid transition.
    pub async fn cancel(&self, handle: TaskBridgeHandle) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        let record = ledger
            .records
            .get_mut(&handle.bridge_id)
            .ok_or_else(|| Error::UnknownBridge(handle.bridge_id.to_string()))?;

        record.mark_failed(FailureReason::Cancelled)?;
        let lag_ms = record.lag_ms();
        ledger.finish(handle.bridge_id, false, lag_ms, self.history_limit);
        drop(ledger);

        emit(
            &self.event_tx,
            CoordinationEvent::BridgeFailed {
                bridge_id: handle.bridge_id,
                task_id: handle.task_id,
                reason: FailureReason::Cancelled,
            },
        );
        tlog_debug!("bridge {} cancelled", handle.bridge_id.short());
        Ok(())
    }

    /// Clone of the current record, if it has not been pruned.
    pub async fn record(&self, handle: TaskBridgeHandle) -> Option<TaskBridge> {
        self.ledger
            .lock()
            .await
            .records
            .get(&handle.bridge_id)
            .cloned()
    }

    /// Handle for the most recent hop of a task.
    ///
    /// Workers use this to find the record to acknowledge after
    /// processing a task that arrived over the bridge.
    pub async fn handle_for(&self, task_id: TaskId) -> Option<TaskBridgeHandle> {
        let ledger = self.ledger.lock().await;
        let bridge_id = *ledger.by_task.get(&task_id)?;
        Some(TaskBridgeHandle { bridge_id, task_id })
    }

    /// Live gauges plus cumulative terminal counts.
    pub async fn status_counts(&self) -> BridgeStatusCounts {
        let ledger = self.ledger.lock().await;
        let mut counts = BridgeStatusCounts {
            delivered: ledger.delivered_total,
            failed: ledger.failed_total,
            ..Default::default()
        };
        for record in ledger.records.values() {
            match record.status {
                BridgeStatus::Pending => counts.pending += 1,
                BridgeStatus::InTransit => counts.in_transit += 1,
                _ => {}
            }
        }
        counts
    }

    /// Live hops sitting in `pending`/`in_transit` longer than `threshold`.
    pub async fn stale_in_flight(&self, threshold: Duration) -> usize {
        let ledger = self.ledger.lock().await;
        ledger
            .records
            .values()
            .filter(|record| !record.is_terminal() && record.time_in_state() >= threshold)
            .count()
    }

    /// Drain the completion samples accumulated since the last call.
    pub async fn take_completions(&self) -> Vec<CompletionSample> {
        self.ledger.lock().await.completions.drain(..).collect()
    }
}

//! Event stream for coordination observability.
//!
//! Components emit these events on a shared channel so embedders and
//! tests can react to lifecycle changes without polling. Emission uses
//! `try_send`: events are observability, never a control path, and are
//! dropped rather than applying backpressure to the hot path.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::coordination::bridge::{BridgeId, FailureReason};
use crate::core::task::{Domain, Priority, TaskId};

/// Events emitted by queues, workers, the bridge, and the health monitor.
#[derive(Debug, Clone)]
pub enum CoordinationEvent {
    /// A task was accepted into its local domain queue.
    TaskQueued {
        domain: Domain,
        task_id: TaskId,
        priority: Priority,
    },
    /// A worker picked the task up and is running its handler.
    TaskStarted { domain: Domain, task_id: TaskId },
    /// The handler finished successfully.
    TaskCompleted { domain: Domain, task_id: TaskId },
    /// The handler failed (includes missing-handler failures).
    TaskFailed {
        domain: Domain,
        task_id: TaskId,
        message: String,
    },
    /// A cross-domain hop was recorded (bridge record opened).
    BridgeOpened {
        bridge_id: BridgeId,
        task_id: TaskId,
        source: Domain,
        target: Domain,
    },
    /// The hop was handed to the target queue.
    BridgeForwarded { bridge_id: BridgeId, task_id: TaskId },
    /// The hop reached the target worker with its context intact.
    BridgeDelivered {
        bridge_id: BridgeId,
        task_id: TaskId,
        lag_ms: u64,
    },
    /// The hop ended in a failure state.
    BridgeFailed {
        bridge_id: BridgeId,
        task_id: TaskId,
        reason: FailureReason,
    },
    /// A health probe exceeded its timeout.
    ProbeTimedOut {
        domain: Domain,
        timeout: Duration,
        consecutive: u32,
    },
}

/// Best-effort emission shared by all coordination components.
pub(crate) fn emit(tx: &mpsc::Sender<CoordinationEvent>, event: CoordinationEvent) {
    if tx.try_send(event).is_err() {
        crate::log::trace("event channel full or closed; event dropped");
    }
}

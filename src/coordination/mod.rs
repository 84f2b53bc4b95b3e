//! Cross-domain task coordination layer.
//!
//! This module holds the moving parts that connect the business and
//! technical domains: per-domain orchestrators, the bridge that carries
//! tasks between them with context integrity checks, health monitoring
//! over both, and windowed metrics derived from the health snapshots.

mod bridge;
mod event;
mod health;
mod metrics;
mod orchestrator;

pub use bridge::{
    BridgeId, BridgeStatus, BridgeStatusCounts, CompletionSample, CoordinationBridge,
    FailureReason, TaskBridge, TaskBridgeHandle, TaskOutcome, DEFAULT_HISTORY_LIMIT,
};
pub use event::CoordinationEvent;
pub use health::{
    BridgeHealth, HealthConfig, HealthMonitor, HealthSnapshot, OrchestratorHealth,
    OrchestratorProbe, SnapshotFeed, DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_PROBE_TIMEOUT_MS,
    DEFAULT_STALENESS_SECS,
};
pub use metrics::{CoordinationMetrics, MetricsAggregator, DEFAULT_WINDOW_SECS};
pub use orchestrator::{
    Orchestrator, OrchestratorState, OrchestratorStatus, PerformanceCounters, SubmitOutcome,
    TaskHandler, DEFAULT_GRACE_WINDOW_SECS, DEFAULT_MAX_TASKS, OVERLOAD_THRESHOLD,
};

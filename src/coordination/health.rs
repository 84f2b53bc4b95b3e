//! Cross-domain health monitoring.
//!
//! The `HealthMonitor` probes every orchestrator and the bridge on a
//! fixed interval and folds the results into a serializable
//! [`HealthSnapshot`]. Probes run concurrently, each under its own
//! timeout, so even several unresponsive orchestrators delay a cycle by
//! at most one timeout and are reported in the `error` state instead of
//! stalling monitoring.
//!
//! Snapshots flow two ways: into the
//! [`MetricsAggregator`](crate::coordination::MetricsAggregator) for
//! windowed rates, and onto a latest-wins feed that dashboards can poll
//! without ever blocking the monitor.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordination::bridge::{CompletionSample, CoordinationBridge};
use crate::coordination::event::{emit, CoordinationEvent};
use crate::coordination::metrics::MetricsAggregator;
use crate::coordination::orchestrator::{
    Orchestrator, OrchestratorState, OrchestratorStatus, PerformanceCounters,
};
use crate::core::task::Domain;
use crate::tlog_warn;

/// Default seconds between probe cycles.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;

/// Default milliseconds before a single probe is abandoned.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;

/// Default time an in-flight bridge record may sit in one state before
/// it counts as stale.
pub const DEFAULT_STALENESS_SECS: u64 = 30;

/// Configuration for health monitoring.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time between probe cycles.
    pub probe_interval: Duration,
    /// Budget for a single orchestrator probe.
    pub probe_timeout: Duration,
    /// Age at which an in-flight bridge record counts as stale.
    pub staleness_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            staleness_threshold: Duration::from_secs(DEFAULT_STALENESS_SECS),
        }
    }
}

impl HealthConfig {
    /// Create a config with the specified probe interval.
    pub fn with_probe_interval(interval: Duration) -> Self {
        Self {
            probe_interval: interval,
            ..Default::default()
        }
    }

    /// Create a config with the specified probe timeout.
    pub fn with_probe_timeout(timeout: Duration) -> Self {
        Self {
            probe_timeout: timeout,
            ..Default::default()
        }
    }

    /// Create a config with the specified staleness threshold.
    pub fn with_staleness_threshold(threshold: Duration) -> Self {
        Self {
            staleness_threshold: threshold,
            ..Default::default()
        }
    }
}

/// Something the monitor can ask for a status.
///
/// `Orchestrator` implements this directly; tests substitute their own
/// probes to simulate hangs and failures.
#[async_trait]
pub trait OrchestratorProbe: Send + Sync {
    fn domain(&self) -> Domain;
    async fn probe(&self) -> OrchestratorStatus;
}

#[async_trait]
impl OrchestratorProbe for Orchestrator {
    fn domain(&self) -> Domain {
        Orchestrator::domain(self)
    }

    async fn probe(&self) -> OrchestratorStatus {
        self.status().await
    }
}

/// One orchestrator's health as seen by the monitor.
///
/// When a probe times out the numeric fields are zeroed, the state is
/// forced to `error`, and `probe_failures` carries the consecutive
/// timeout count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorHealth {
    pub domain: Domain,
    pub state: OrchestratorState,
    pub utilization: f64,
    pub active_tasks: usize,
    pub queue_size: usize,
    pub performance: PerformanceCounters,
    /// Consecutive probe timeouts; 0 while the orchestrator responds.
    pub probe_failures: u32,
}

/// Bridge-side view for one probe cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub pending: usize,
    pub in_transit: usize,
    pub delivered: u64,
    pub failed: u64,
    /// In-flight records older than the staleness threshold.
    pub stale_in_flight: usize,
    /// Terminal transitions since the previous cycle.
    pub completions: Vec<CompletionSample>,
}

/// Point-in-time view of the whole coordination layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub sampled_at: DateTime<Utc>,
    pub orchestrators: BTreeMap<Domain, OrchestratorHealth>,
    pub bridge: BridgeHealth,
    /// Overloaded orchestrators plus stale in-flight bridge records.
    pub bottleneck_count: usize,
}

/// Read side of the snapshot feed.
///
/// The feed holds at most one snapshot; a fast monitor overwrites what
/// a slow consumer has not read yet. Intended for a single consumer.
pub struct SnapshotFeed {
    rx: crossbeam_channel::Receiver<HealthSnapshot>,
}

impl SnapshotFeed {
    /// Most recent snapshot published since the last call, if any.
    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.rx.try_iter().last()
    }
}

/// Probes orchestrators and the bridge on an interval.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use trestle::coordination::{HealthConfig, HealthMonitor};
///
/// let monitor = Arc::new(HealthMonitor::new(
///     HealthConfig::default(),
///     vec![business.clone(), technical.clone()],
///     bridge,
///     metrics,
///     event_tx,
/// ));
/// let feed = monitor.feed();
/// let handle = monitor.run();
/// // ... feed.latest() from the dashboard loop ...
/// monitor.shutdown();
/// ```
pub struct HealthMonitor {
    config: HealthConfig,
    probes: Vec<Arc<dyn OrchestratorProbe>>,
    bridge: Arc<CoordinationBridge>,
    metrics: Arc<MetricsAggregator>,
    /// Consecutive timeout counts per domain.
    failures: Mutex<HashMap<Domain, u32>>,
    event_tx: mpsc::Sender<CoordinationEvent>,
    feed_tx: crossbeam_channel::Sender<HealthSnapshot>,
    feed_rx: crossbeam_channel::Receiver<HealthSnapshot>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        probes: Vec<Arc<dyn OrchestratorProbe>>,
        bridge: Arc<CoordinationBridge>,
        metrics: Arc<MetricsAggregator>,
        event_tx: mpsc::Sender<CoordinationEvent>,
    ) -> Self {
        let (feed_tx, feed_rx) = crossbeam_channel::bounded(1);
        Self {
            config,
            probes,
            bridge,
            metrics,
            failures: Mutex::new(HashMap::new()),
            event_tx,
            feed_tx,
            feed_rx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// A handle for reading published snapshots.
    pub fn feed(&self) -> SnapshotFeed {
        SnapshotFeed {
            rx: self.feed_rx.clone(),
        }
    }

    /// Run one probe cycle and build a snapshot.
    ///
    /// Orchestrators are probed concurrently with `probe_timeout` each;
    /// a timeout marks that domain `error` for this cycle and bumps its
    /// consecutive failure count. A responsive probe resets the count.
    pub async fn sample(&self) -> HealthSnapshot {
        let results = join_all(self.probes.iter().map(|probe| async move {
            let domain = probe.domain();
            let outcome = tokio::time::timeout(self.config.probe_timeout, probe.probe()).await;
            (domain, outcome)
        }))
        .await;

        let mut orchestrators = BTreeMap::new();
        let mut failures = self.failures.lock().await;

        for (domain, outcome) in results {
            match outcome {
                Ok(status) => {
                    failures.remove(&domain);
                    orchestrators.insert(
                        domain,
                        OrchestratorHealth {
                            domain,
                            state: status.status,
                            utilization: status.utilization(),
                            active_tasks: status.active_tasks,
                            queue_size: status.queue_size,
                            performance: status.performance,
                            probe_failures: 0,
                        },
                    );
                }
                Err(_) => {
                    let count = failures.entry(domain).or_insert(0);
                    *count += 1;
                    let consecutive = *count;
                    emit(
                        &self.event_tx,
                        CoordinationEvent::ProbeTimedOut {
                            domain,
                            timeout: self.config.probe_timeout,
                            consecutive,
                        },
                    );
                    tlog_warn!(
                        "probe of '{}' orchestrator timed out after {:?} ({} consecutive)",
                        domain,
                        self.config.probe_timeout,
                        consecutive
                    );
                    orchestrators.insert(
                        domain,
                        OrchestratorHealth {
                            domain,
                            state: OrchestratorState::Error,
                            utilization: 0.0,
                            active_tasks: 0,
                            queue_size: 0,
                            performance: PerformanceCounters::default(),
                            probe_failures: consecutive,
                        },
                    );
                }
            }
        }
        drop(failures);

        let counts = self.bridge.status_counts().await;
        let stale_in_flight = self
            .bridge
            .stale_in_flight(self.config.staleness_threshold)
            .await;
        let completions = self.bridge.take_completions().await;
        let bridge = BridgeHealth {
            pending: counts.pending,
            in_transit: counts.in_transit,
            delivered: counts.delivered,
            failed: counts.failed,
            stale_in_flight,
            completions,
        };

        let overloaded = orchestrators
            .values()
            .filter(|health| health.state == OrchestratorState::Overloaded)
            .count();
        let bottleneck_count = overloaded + stale_in_flight;

        HealthSnapshot {
            sampled_at: Utc::now(),
            orchestrators,
            bridge,
            bottleneck_count,
        }
    }

    /// Push a snapshot onto the feed, displacing an unread one.
    fn publish(&self, snapshot: HealthSnapshot) {
        if self.feed_tx.is_full() {
            let _ = self.feed_rx.try_recv();
        }
        let _ = self.feed_tx.try_send(snapshot);
    }

    /// Spawn the probe loop.
    ///
    /// Every `probe_interval` the loop samples, feeds the aggregator,
    /// and publishes to the feed, until [`shutdown`](Self::shutdown).
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.probe_interval);
            loop {
                tokio::select! {
                    _ = monitor.cancel.cancelled() => {
                        break;
                    }
                    _ = interval.tick() => {
                        let snapshot = monitor.sample().await;
                        monitor.metrics.observe(snapshot.clone()).await;
                        monitor.publish(snapshot);
                    }
                }
            }
        })
    }

    /// Signal the probe loop to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

//! Windowed coordination metrics.
//!
//! The `MetricsAggregator` keeps the health snapshots observed over a
//! sliding time window and derives flow, reliability, and lag figures
//! from the bridge completion samples they carry. Everything is computed
//! on demand so the aggregator itself stays cheap to feed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::coordination::health::HealthSnapshot;

/// Default sliding window length.
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// Derived view over the current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationMetrics {
    /// Delivered cross-domain tasks per minute.
    pub task_flow_rate: f64,
    /// Percentage of terminal hops that delivered; 100.0 with no data.
    pub bridge_health: f64,
    /// 95th percentile hop lag in milliseconds.
    pub synchronization_lag: u64,
    pub window_secs: u64,
    /// Snapshots currently inside the window.
    pub sample_count: usize,
}

/// Sliding-window aggregator over health snapshots.
pub struct MetricsAggregator {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, HealthSnapshot)>>,
}

impl MetricsAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Add a snapshot and drop the ones that have aged out.
    pub async fn observe(&self, snapshot: HealthSnapshot) {
        let mut samples = self.samples.lock().await;
        samples.push_back((Instant::now(), snapshot));
        Self::prune(&mut samples, self.window);
    }

    /// Compute metrics over the snapshots still in the window.
    ///
    /// The flow rate is normalized over the actual span covered (oldest
    /// snapshot to now, at least one second), so a window that is not
    /// yet full is not under-reported.
    pub async fn metrics(&self) -> CoordinationMetrics {
        let mut samples = self.samples.lock().await;
        Self::prune(&mut samples, self.window);

        let mut delivered = 0u64;
        let mut failed = 0u64;
        let mut lags: Vec<u64> = Vec::new();
        for (_, snapshot) in samples.iter() {
            for sample in &snapshot.bridge.completions {
                if sample.delivered {
                    delivered += 1;
                    lags.push(sample.lag_ms);
                } else {
                    failed += 1;
                }
            }
        }

        let span_secs = samples
            .front()
            .map(|(at, _)| at.elapsed().as_secs_f64())
            .unwrap_or(0.0)
            .max(1.0);
        let task_flow_rate = delivered as f64 * 60.0 / span_secs;

        let terminal = delivered + failed;
        let bridge_health = if terminal == 0 {
            100.0
        } else {
            delivered as f64 / terminal as f64 * 100.0
        };

        lags.sort_unstable();
        let synchronization_lag = percentile(&lags, 0.95);

        CoordinationMetrics {
            task_flow_rate,
            bridge_health,
            synchronization_lag,
            window_secs: self.window.as_secs(),
            sample_count: samples.len(),
        }
    }

    fn prune(samples: &mut VecDeque<(Instant, HealthSnapshot)>, window: Duration) {
        while samples
            .front()
            .map(|(at, _)| at.elapsed() > window)
            .unwrap_or(false)
        {
            samples.pop_front();
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}

/// Nearest-rank percentile over a sorted slice; 0 when empty.
fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

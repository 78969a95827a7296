//! Rolling statistics over sync outcomes.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent durations the rolling average covers.
pub const AVERAGE_WINDOW: usize = 10;

/// A snapshot of sync performance.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceMetrics {
    /// Total syncs recorded.
    pub total_syncs: u64,
    /// Failed syncs recorded.
    pub failed_syncs: u64,
    /// Percentage of successful syncs; 100 when nothing was recorded.
    pub success_rate: f64,
    /// Mean duration of the most recent syncs.
    pub average_sync_time: Duration,
    /// Duration of the last sync.
    pub last_sync_duration: Duration,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_syncs: 0,
            failed_syncs: 0,
            success_rate: 100.0,
            average_sync_time: Duration::ZERO,
            last_sync_duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    metrics: PerformanceMetrics,
    window: VecDeque<Duration>,
}

/// Collects sync outcomes.
///
/// Updates are append-only; only [`reset_metrics`](Self::reset_metrics)
/// clears them. Each update publishes a new metrics value as a whole.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    state: RwLock<MonitorState>,
}

impl PerformanceMonitor {
    /// Creates a monitor with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one sync.
    pub fn record_sync_result(&self, success: bool, duration: Duration) {
        let mut state = self.state.write();

        state.window.push_back(duration);
        if state.window.len() > AVERAGE_WINDOW {
            state.window.pop_front();
        }
        let sum: Duration = state.window.iter().sum();
        let average_sync_time = sum / state.window.len() as u32;

        let total_syncs = state.metrics.total_syncs + 1;
        let failed_syncs = state.metrics.failed_syncs + u64::from(!success);
        let success_rate = (total_syncs - failed_syncs) as f64 / total_syncs as f64 * 100.0;

        state.metrics = PerformanceMetrics {
            total_syncs,
            failed_syncs,
            success_rate,
            average_sync_time,
            last_sync_duration: duration,
        };
    }

    /// Returns the current metrics.
    pub fn metrics(&self) -> PerformanceMetrics {
        self.state.read().metrics.clone()
    }

    /// Zeroes every counter.
    pub fn reset_metrics(&self) {
        *self.state.write() = MonitorState::default();
    }
}

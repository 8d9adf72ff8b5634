use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::engine::SimulationState;
use crate::types::SimTime;

/// Point-in-time performance snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatistics {
    pub state: SimulationState,
    pub current_cycle: u64,
    pub simulation_time: SimTime,
    pub cycles_per_second: f64,
    pub actual_frequency: f64,
    pub target_frequency: f64,
    pub simulation_ratio: f64,
    pub component_count: usize,
    pub bus_count: usize,
    pub signal_count: usize,
    pub event_queue_size: usize,
}

/// Counts cycles against wall-clock running time. Paused spans are excluded.
#[derive(Debug, Default)]
pub struct StatsTracker {
    running_since: Option<Instant>,
    accumulated: Duration,
    cycles: u64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn begin(&mut self) {
        self.reset();
        self.running_since = Some(Instant::now());
    }

    pub fn suspend(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn record(&mut self, cycle: u64) {
        self.cycles = cycle;
    }

    pub fn running_time(&self) -> Duration {
        self.accumulated + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn cycles_per_second(&self) -> f64 {
        let secs = self.running_time().as_secs_f64();
        if secs > 0.0 {
            self.cycles as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rate_is_zero_before_running() {
        let tracker = StatsTracker::new();
        assert_eq!(tracker.cycles_per_second(), 0.0);
        assert_eq!(tracker.running_time(), Duration::ZERO);
    }

    #[test]
    fn test_suspend_freezes_running_time() {
        let mut tracker = StatsTracker::new();
        tracker.begin();
        thread::sleep(Duration::from_millis(5));
        tracker.record(10);
        tracker.suspend();

        let frozen = tracker.running_time();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.running_time(), frozen);
        assert!(tracker.cycles_per_second() > 0.0);

        tracker.resume();
        thread::sleep(Duration::from_millis(1));
        assert!(tracker.running_time() > frozen);
    }
}

//! Run configuration for the simulation engine.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```json
//! { "clock_frequency": 1000.0, "max_cycles": 512, "trace_enabled": true }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{SimError, SimResult};
use crate::types::SimTime;

/// Shortest real-time tick the engine will schedule.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Parameters fixed for the duration of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Master clock frequency in Hz
    #[serde(default = "default_clock_frequency")]
    pub clock_frequency: f64,

    /// Cycle limit, -1 for unlimited
    #[serde(default = "default_max_cycles")]
    pub max_cycles: i64,

    /// Pace cycles against the wall clock instead of running back-to-back
    #[serde(default)]
    pub real_time: bool,

    /// Enter Paused after start and wait for explicit steps
    #[serde(default)]
    pub step_mode: bool,

    /// Extra tracing of component failures
    #[serde(default)]
    pub debug: bool,

    /// Simulated seconds per free-run cycle; defaults to 1 / clock_frequency
    #[serde(default)]
    pub time_step: Option<f64>,

    /// Free-run cycles executed between scheduler yields
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Record every bus line into the trace log each cycle
    #[serde(default)]
    pub trace_enabled: bool,

    #[serde(default = "default_history_limit")]
    pub signal_history_limit: usize,

    #[serde(default = "default_trace_limit")]
    pub trace_limit: usize,

    /// Cycles between statistics notifications
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,

    /// How long stop() waits for a background driver
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_clock_frequency() -> f64 {
    1_000_000.0
}

fn default_max_cycles() -> i64 {
    -1
}

fn default_max_iterations() -> u32 {
    1000
}

fn default_history_limit() -> usize {
    crate::signal::DEFAULT_HISTORY_LIMIT
}

fn default_trace_limit() -> usize {
    1000
}

fn default_stats_interval() -> u64 {
    100
}

fn default_stop_timeout_ms() -> u64 {
    1000
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clock_frequency: default_clock_frequency(),
            max_cycles: default_max_cycles(),
            real_time: false,
            step_mode: false,
            debug: false,
            time_step: None,
            max_iterations: default_max_iterations(),
            trace_enabled: false,
            signal_history_limit: default_history_limit(),
            trace_limit: default_trace_limit(),
            stats_interval: default_stats_interval(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> SimResult<()> {
        if !(self.clock_frequency.is_finite() && self.clock_frequency > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "clock_frequency must be positive, got {}",
                self.clock_frequency
            )));
        }
        if self.max_cycles < -1 {
            return Err(SimError::InvalidConfig(format!(
                "max_cycles must be -1 or non-negative, got {}",
                self.max_cycles
            )));
        }
        if let Some(step) = self.time_step {
            if !(step.is_finite() && step > 0.0) {
                return Err(SimError::InvalidConfig(format!(
                    "time_step must be positive, got {}",
                    step
                )));
            }
        }
        if self.max_iterations == 0 {
            return Err(SimError::InvalidConfig("max_iterations must be at least 1".into()));
        }
        if self.signal_history_limit == 0 {
            return Err(SimError::InvalidConfig("signal_history_limit must be at least 1".into()));
        }
        if self.trace_limit == 0 {
            return Err(SimError::InvalidConfig("trace_limit must be at least 1".into()));
        }
        if self.stats_interval == 0 {
            return Err(SimError::InvalidConfig("stats_interval must be at least 1".into()));
        }
        Ok(())
    }

    pub fn effective_time_step(&self) -> SimTime {
        self.time_step.unwrap_or(1.0 / self.clock_frequency)
    }

    pub fn cycle_limit(&self) -> Option<u64> {
        u64::try_from(self.max_cycles).ok()
    }

    /// Real-time period between cycles, never below [`MIN_TICK_INTERVAL`].
    pub fn tick_interval(&self) -> Duration {
        let period = Duration::try_from_secs_f64(1.0 / self.clock_frequency).unwrap_or(Duration::MAX);
        period.max(MIN_TICK_INTERVAL)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn with_clock_frequency(mut self, hz: f64) -> Self {
        self.clock_frequency = hz;
        self
    }

    pub fn with_max_cycles(mut self, cycles: i64) -> Self {
        self.max_cycles = cycles;
        self
    }

    pub fn with_real_time(mut self, real_time: bool) -> Self {
        self.real_time = real_time;
        self
    }

    pub fn with_step_mode(mut self, step_mode: bool) -> Self {
        self.step_mode = step_mode;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_time_step(mut self, seconds: f64) -> Self {
        self.time_step = Some(seconds);
        self
    }

    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    pub fn with_signal_history_limit(mut self, limit: usize) -> Self {
        self.signal_history_limit = limit;
        self
    }

    pub fn with_stats_interval(mut self, cycles: u64) -> Self {
        self.stats_interval = cycles;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.clock_frequency, 1_000_000.0);
        assert_eq!(config.cycle_limit(), None);
        assert!(!config.real_time);
        assert_eq!(config.effective_time_step(), 1e-6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = SimulationConfig::from_json(r#"{"clock_frequency": 2.0, "max_cycles": 10}"#).unwrap();
        assert_eq!(config.effective_time_step(), 0.5);
        assert_eq!(config.cycle_limit(), Some(10));
        assert_eq!(config.stats_interval, 100);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(SimulationConfig::new().with_clock_frequency(0.0).validate().is_err());
        assert!(SimulationConfig::new().with_clock_frequency(f64::NAN).validate().is_err());
        assert!(SimulationConfig::new().with_max_cycles(-2).validate().is_err());
        assert!(SimulationConfig::new().with_time_step(-1.0).validate().is_err());
        assert!(SimulationConfig::new().with_signal_history_limit(0).validate().is_err());
        assert!(SimulationConfig::from_json(r#"{"clock_frequency": -5.0}"#).is_err());
    }

    #[test]
    fn test_tick_interval_is_clamped() {
        let fast = SimulationConfig::new().with_clock_frequency(1e9);
        assert_eq!(fast.tick_interval(), MIN_TICK_INTERVAL);
        let slow = SimulationConfig::new().with_clock_frequency(2.0);
        assert_eq!(slow.tick_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_explicit_time_step_wins() {
        let config = SimulationConfig::new().with_clock_frequency(10.0).with_time_step(0.25);
        assert_eq!(config.effective_time_step(), 0.25);
    }
}

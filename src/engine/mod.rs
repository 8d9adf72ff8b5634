//! The simulation engine.
//!
//! [`SimulationEngine`] is an owned handle around the shared engine core and,
//! while running, a background driver thread. All control operations take
//! the core lock, so they are serialized with cycles and never observe a
//! half-finished step.
//!
//! ```no_run
//! use rusty_sim::{SimulationConfig, SimulationEngine};
//! use rusty_sim::components::BinaryCounter;
//!
//! let config = SimulationConfig::new().with_clock_frequency(1000.0).with_max_cycles(100);
//! let mut engine = SimulationEngine::new(config)?;
//! engine.add_component(BinaryCounter::new("counter", 8)?)?;
//! engine.start()?;
//! engine.wait_for_stop(std::time::Duration::from_secs(1));
//! # Ok::<(), rusty_sim::SimError>(())
//! ```

mod machine;
mod driver;
pub mod export;
pub mod validation;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

use self::machine::{EngineCore, Pacing};
use self::driver::DriverControl;
use crate::bus::BusState;
use crate::component::SimComponent;
use crate::config::SimulationConfig;
use crate::debug::{BreakpointInfo, EngineSnapshot, TraceEntry, WatchpointInfo};
use crate::error::{SimError, SimResult};
use crate::event::{EventContext, SimEvent};
use crate::notification::SimNotification;
use crate::signal::SignalSample;
use crate::stats::SimulationStatistics;
use crate::types::{BitWidth, SimTime};

pub use self::machine::{CLOCK_BUS, CLOCK_LINE, CONTROL_BUS, RESET_LINE};
pub use self::export::{BusExport, ComponentExport, EngineStateExport, ImportSummary, SignalExport};
pub use self::validation::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationState {
    Stopped,
    Running,
    Paused,
    /// Transient: a single step is executing.
    Step,
    Error,
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimulationState::Stopped => "stopped",
            SimulationState::Running => "running",
            SimulationState::Paused => "paused",
            SimulationState::Step => "step",
            SimulationState::Error => "error",
        };
        f.write_str(name)
    }
}

pub struct SimulationEngine {
    core: Arc<Mutex<EngineCore>>,
    control: Arc<DriverControl>,
    driver: Option<JoinHandle<()>>,
}

impl SimulationEngine {
    pub fn new(config: SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        let control = Arc::new(DriverControl::new());
        let core = EngineCore::new(config, Arc::clone(&control));
        Ok(SimulationEngine {
            core: Arc::new(Mutex::new(core)),
            control,
            driver: None,
        })
    }

    fn lock(&self) -> SimResult<MutexGuard<'_, EngineCore>> {
        self.core
            .lock()
            .map_err(|err| SimError::LockPoisoned(err.to_string()))
    }

    /// Read access that tolerates a poisoned lock. Steps never leave the
    /// core half-updated past their own failure boundary.
    fn inspect(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_idle(core: &EngineCore, operation: &'static str) -> SimResult<()> {
        match core.state {
            SimulationState::Stopped | SimulationState::Error => Ok(()),
            state => Err(SimError::InvalidState { operation, state }),
        }
    }

    pub fn config(&self) -> SimulationConfig {
        self.inspect().config.clone()
    }

    /// Replace the configuration. Only allowed while stopped.
    pub fn set_config(&mut self, config: SimulationConfig) -> SimResult<()> {
        config.validate()?;
        let mut core = self.lock()?;
        Self::require_idle(&core, "change the configuration")?;
        core.debug.trace_mut().set_limit(config.trace_limit);
        core.config = config;
        core.build_buses();
        Ok(())
    }

    pub fn add_component<C: SimComponent + 'static>(&mut self, component: C) -> SimResult<()> {
        self.add_boxed_component(Box::new(component))
    }

    pub fn add_boxed_component(&mut self, component: Box<dyn SimComponent>) -> SimResult<()> {
        let mut core = self.lock()?;
        Self::require_idle(&core, "add a component")?;
        core.add_component(component)
    }

    pub fn remove_component(&mut self, id: &str) -> SimResult<Box<dyn SimComponent>> {
        let mut core = self.lock()?;
        Self::require_idle(&core, "remove a component")?;
        core.remove_component(id)
    }

    pub fn component_ids(&self) -> Vec<String> {
        self.inspect().components.iter().map(|slot| slot.id.clone()).collect()
    }

    /// Add a custom bus next to the default ones.
    pub fn add_bus(&mut self, name: &str, bit_width: u32) -> SimResult<()> {
        let width = BitWidth::new(bit_width)?;
        let mut core = self.lock()?;
        Self::require_idle(&core, "add a bus")?;
        core.add_bus(name, width)
    }

    /// Receive every notification from now on.
    ///
    /// The receiver is unbounded and gets a `CycleCompleted` per cycle; drain it
    /// regularly during long free runs or drop it. Dropped receivers are pruned
    /// on the next publish.
    pub fn subscribe(&self) -> UnboundedReceiver<SimNotification> {
        self.inspect().notifier.subscribe()
    }

    pub fn start(&mut self) -> SimResult<()> {
        {
            let core = self.lock()?;
            match core.state {
                SimulationState::Stopped | SimulationState::Error => {}
                state => return Err(SimError::InvalidState { operation: "start", state }),
            }
        }

        self.control.request_halt();
        self.join_driver(self.config().stop_timeout());
        self.control.clear();

        let (real_time, tick, batch) = {
            let mut core = self.lock()?;
            core.prepare_run();
            if core.config.step_mode {
                self.control.set_paused(true);
                core.stats.suspend();
                core.set_state(SimulationState::Paused);
                info!("started in step mode");
                return Ok(());
            }
            core.set_state(SimulationState::Running);
            (core.config.real_time, core.config.tick_interval(), core.config.max_iterations)
        };

        self.spawn_driver(real_time, tick, batch)
    }

    fn spawn_driver(&mut self, real_time: bool, tick: Duration, batch: u32) -> SimResult<()> {
        match driver::spawn(Arc::clone(&self.core), Arc::clone(&self.control), real_time, tick, batch) {
            Ok(handle) => {
                self.driver = Some(handle);
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.lock()?.fail(err);
                Err(SimError::DriverSpawn(message))
            }
        }
    }

    /// Wait for the driver thread to exit; detach it after `timeout`.
    fn join_driver(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.driver.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(?timeout, "driver did not stop in time, detaching it");
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if handle.join().is_err() {
            error!("driver thread panicked");
        }
        true
    }

    pub fn stop(&mut self) -> SimResult<()> {
        self.control.request_halt();
        let timeout = self.config().stop_timeout();
        self.join_driver(timeout);

        let mut core = self.lock()?;
        if core.state != SimulationState::Stopped {
            core.halt();
        }
        Ok(())
    }

    pub fn pause(&mut self) -> SimResult<()> {
        let mut core = self.lock()?;
        if core.state != SimulationState::Running {
            return Err(SimError::InvalidState {
                operation: "pause",
                state: core.state,
            });
        }
        self.control.set_paused(true);
        core.stats.suspend();
        core.set_state(SimulationState::Paused);
        Ok(())
    }

    pub fn resume(&mut self) -> SimResult<()> {
        let (real_time, tick, batch) = {
            let mut core = self.lock()?;
            if core.state != SimulationState::Paused {
                return Err(SimError::InvalidState {
                    operation: "resume",
                    state: core.state,
                });
            }
            core.clear_pacing();
            core.stats.resume();
            core.set_state(SimulationState::Running);
            self.control.set_paused(false);
            (core.config.real_time, core.config.tick_interval(), core.config.max_iterations)
        };

        let driver_alive = self.driver.as_ref().is_some_and(|h| !h.is_finished());
        if driver_alive {
            return Ok(());
        }
        self.join_driver(Duration::ZERO);
        self.spawn_driver(real_time, tick, batch)
    }

    /// Run exactly one cycle synchronously and settle in Paused.
    ///
    /// Reaching the cycle limit ends in Stopped; an engine failure ends in Error.
    pub fn step(&mut self) -> SimResult<()> {
        let state = self.lock()?.state;
        match state {
            SimulationState::Stopped => {
                self.control.request_halt();
                self.join_driver(self.config().stop_timeout());
                self.control.clear();
                self.control.set_paused(true);
                self.lock()?.prepare_step();
            }
            SimulationState::Paused => {}
            state => return Err(SimError::InvalidState { operation: "step", state }),
        }

        let mut core = self.lock()?;
        core.set_state(SimulationState::Step);
        core.stats.resume();
        match core.run_cycle(Pacing::Fixed) {
            machine::CycleOutcome::Stopped | machine::CycleOutcome::Failed => {}
            _ => {
                core.stats.suspend();
                core.set_state(SimulationState::Paused);
            }
        }
        Ok(())
    }

    /// Stop if needed, then return every line, counter and component to power-on state.
    pub fn reset(&mut self) -> SimResult<()> {
        if self.state() != SimulationState::Stopped {
            self.stop()?;
        }
        self.lock()?.reset();
        Ok(())
    }

    /// Block until the engine is Stopped or Error with no live driver.
    pub fn wait_for_stop(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let driver_done = self.driver.as_ref().map_or(true, |h| h.is_finished());
            let state = self.state();
            if driver_done && matches!(state, SimulationState::Stopped | SimulationState::Error) {
                self.join_driver(Duration::ZERO);
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn state(&self) -> SimulationState {
        self.inspect().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SimulationState::Running
    }

    pub fn current_cycle(&self) -> u64 {
        self.inspect().cycle
    }

    pub fn simulation_time(&self) -> SimTime {
        self.inspect().simulation_time
    }

    pub fn statistics(&self) -> SimulationStatistics {
        self.inspect().statistics()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.inspect().snapshot()
    }

    /// Current value of a `bus.line` signal.
    pub fn signal_value(&self, qualified: &str) -> Option<u64> {
        let (bus, line) = qualified.split_once('.')?;
        self.inspect().buses.get(bus)?.read_line(line)
    }

    /// Full history of a `bus.line` signal, oldest first.
    pub fn signal_history(&self, qualified: &str) -> Option<Vec<SignalSample>> {
        let (bus, line) = qualified.split_once('.')?;
        let core = self.inspect();
        let signal = core.buses.get(bus)?.signal(line)?;
        Some(signal.history().iter().copied().collect())
    }

    pub fn bus_value(&self, bus: &str) -> Option<u64> {
        self.inspect().buses.get(bus).map(|b| b.read_bus())
    }

    pub fn bus_state(&self, bus: &str) -> Option<BusState> {
        self.inspect().buses.get(bus).map(|b| b.state())
    }

    pub fn bus_names(&self) -> Vec<String> {
        self.inspect().buses.keys().cloned().collect()
    }

    pub fn event_queue_len(&self) -> usize {
        self.inspect().events.len()
    }

    /// Queue an event at `simulation_time + delay`.
    pub fn schedule_event(&mut self, delay: SimTime, event_type: &str, payload: Value) -> SimResult<()> {
        if !(delay.is_finite() && delay >= 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "event delay must be a non-negative number, got {}",
                delay
            )));
        }
        let mut core = self.lock()?;
        let timestamp = core.simulation_time + delay;
        core.events.push(SimEvent {
            timestamp,
            event_type: event_type.to_string(),
            payload,
        });
        Ok(())
    }

    pub fn on_event<F>(&mut self, event_type: &str, handler: F) -> SimResult<()>
    where
        F: FnMut(&SimEvent, &mut EventContext<'_>) -> Result<(), String> + Send + 'static,
    {
        self.lock()?
            .handlers
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(handler));
        Ok(())
    }

    pub fn add_breakpoint<F>(&mut self, predicate: F, description: &str) -> SimResult<u32>
    where
        F: Fn(&EngineSnapshot) -> bool + Send + 'static,
    {
        Ok(self.lock()?.debug.add_breakpoint(Box::new(predicate), description))
    }

    /// Parse and register a text condition such as `cycle >= 100` or `data.Q == 0x2A`.
    pub fn add_breakpoint_condition(&mut self, condition: &str) -> SimResult<u32> {
        self.lock()?.debug.add_breakpoint_condition(condition)
    }

    pub fn remove_breakpoint(&mut self, id: u32) -> SimResult<bool> {
        Ok(self.lock()?.debug.remove_breakpoint(id))
    }

    pub fn set_breakpoint_enabled(&mut self, id: u32, enabled: bool) -> SimResult<bool> {
        Ok(self.lock()?.debug.set_breakpoint_enabled(id, enabled))
    }

    pub fn breakpoints(&self) -> Vec<BreakpointInfo> {
        self.inspect().debug.breakpoints()
    }

    /// Watch a `bus.line` signal; fires when it changes to `trigger`.
    pub fn add_watchpoint(&mut self, signal: &str, trigger: u64, description: &str) -> SimResult<u32> {
        let mut core = self.lock()?;
        let (bus, line) = signal
            .split_once('.')
            .ok_or_else(|| SimError::InvalidWatchpoint(format!("'{}' is not a bus.line name", signal)))?;
        let bus = core
            .buses
            .get(bus)
            .ok_or_else(|| SimError::InvalidWatchpoint(format!("unknown bus '{}'", bus)))?;
        if line.is_empty() {
            return Err(SimError::InvalidWatchpoint(format!("'{}' has no line name", signal)));
        }
        let baseline = bus.read_line(line);
        Ok(core.debug.add_watchpoint(signal, trigger, description, baseline))
    }

    pub fn remove_watchpoint(&mut self, id: u32) -> SimResult<bool> {
        Ok(self.lock()?.debug.remove_watchpoint(id))
    }

    pub fn set_watchpoint_enabled(&mut self, id: u32, enabled: bool) -> SimResult<bool> {
        Ok(self.lock()?.debug.set_watchpoint_enabled(id, enabled))
    }

    pub fn watchpoints(&self) -> Vec<WatchpointInfo> {
        self.inspect().debug.watchpoints()
    }

    pub fn recent_traces(&self, count: usize) -> Vec<TraceEntry> {
        self.inspect().debug.recent_traces(count)
    }

    pub fn log_trace(&mut self, component: &str, action: &str, payload: Value) -> SimResult<()> {
        self.lock()?.log_trace(component, action, payload);
        Ok(())
    }

    pub fn inspect_registers(&self, component_id: &str) -> SimResult<BTreeMap<String, u64>> {
        Ok(self.inspect().component(component_id)?.registers())
    }

    pub fn read_memory(&self, component_id: &str, address: usize, length: usize) -> SimResult<Option<Vec<u64>>> {
        Ok(self.inspect().component(component_id)?.read_memory(address, length))
    }

    pub fn validate_setup(&self) -> ValidationReport {
        validation::validate(&self.inspect())
    }

    pub fn export_state(&self) -> EngineStateExport {
        export::export(&self.inspect())
    }

    /// Restore signal values and component state. Unknown ids are skipped.
    pub fn import_state(&mut self, snapshot: &EngineStateExport) -> SimResult<ImportSummary> {
        let mut core = self.lock()?;
        if matches!(core.state, SimulationState::Running | SimulationState::Step) {
            return Err(SimError::InvalidState {
                operation: "import state",
                state: core.state,
            });
        }
        Ok(export::import(&mut core, snapshot))
    }
}

impl Default for SimulationEngine {
    fn default() -> Self {
        let control = Arc::new(DriverControl::new());
        let core = EngineCore::new(SimulationConfig::default(), Arc::clone(&control));
        SimulationEngine {
            core: Arc::new(Mutex::new(core)),
            control,
            driver: None,
        }
    }
}

impl fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inspect();
        f.debug_struct("SimulationEngine")
            .field("state", &core.state)
            .field("cycle", &core.cycle)
            .field("components", &core.components.len())
            .field("buses", &core.buses.len())
            .finish()
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        self.control.request_halt();
        let timeout = self.inspect().config.stop_timeout();
        self.join_driver(timeout);
    }
}

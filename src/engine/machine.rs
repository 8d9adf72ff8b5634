use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::driver::DriverControl;
use super::SimulationState;
use crate::bus::{BusMap, SimulationBus};
use crate::component::{PortSpec, SimComponent, StepContext};
use crate::config::SimulationConfig;
use crate::debug::{DebugInterface, EngineSnapshot, TraceEntry};
use crate::error::{panic_message, ComponentError, SimError, SimResult};
use crate::event::{EventContext, EventHandler, EventQueue};
use crate::notification::{Notifier, SimNotification};
use crate::stats::{SimulationStatistics, StatsTracker};
use crate::types::{BitWidth, SimTime};

pub const CLOCK_BUS: &str = "clock";
pub const CLOCK_LINE: &str = "clk";
pub const CONTROL_BUS: &str = "control";
pub const RESET_LINE: &str = "reset";

/// Buses every engine starts with: name, width, lines.
const DEFAULT_BUSES: &[(&str, u32, &[&str])] = &[
    ("address", 16, &[]),
    ("data", 8, &[]),
    (CONTROL_BUS, 8, &[RESET_LINE, "read", "write", "irq"]),
    (CLOCK_BUS, 1, &[CLOCK_LINE]),
    ("power", 1, &["vcc", "gnd"]),
];

/// How a cycle advances simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pacing {
    WallClock,
    Fixed,
}

/// Origin of a run of fixed steps. Time is derived from the step count so
/// rounding never accumulates across cycles.
#[derive(Debug, Clone, Copy)]
struct FixedClock {
    origin: SimTime,
    steps: u64,
    time_step: Option<f64>,
    frequency: f64,
}

impl FixedClock {
    fn anchored(origin: SimTime, config: &SimulationConfig) -> Self {
        FixedClock {
            origin,
            steps: 0,
            time_step: config.time_step,
            frequency: config.clock_frequency,
        }
    }

    fn matches(&self, config: &SimulationConfig) -> bool {
        self.time_step == config.time_step && self.frequency == config.clock_frequency
    }

    fn tick(&mut self) -> SimTime {
        self.steps += 1;
        let elapsed = match self.time_step {
            Some(step) => self.steps as f64 * step,
            None => self.steps as f64 / self.frequency,
        };
        self.origin + elapsed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    Continue,
    /// Nothing ran because the engine is not running.
    Idle,
    Paused,
    Stopped,
    Failed,
}

pub(crate) struct ComponentSlot {
    pub id: String,
    pub ports: Vec<PortSpec>,
    pub component: Box<dyn SimComponent>,
}

/// Everything a driver mutates. Lives behind the engine's mutex.
pub(crate) struct EngineCore {
    pub config: SimulationConfig,
    pub state: SimulationState,
    pub components: Vec<ComponentSlot>,
    pub buses: BusMap,
    pub custom_buses: Vec<(String, BitWidth)>,
    pub events: EventQueue,
    pub handlers: HashMap<String, Vec<EventHandler>>,
    pub debug: DebugInterface,
    pub stats: StatsTracker,
    pub notifier: Notifier,
    pub cycle: u64,
    pub simulation_time: SimTime,
    pub last_tick: Option<Instant>,
    fixed_clock: Option<FixedClock>,
    control: Arc<DriverControl>,
}

impl EngineCore {
    pub fn new(config: SimulationConfig, control: Arc<DriverControl>) -> Self {
        let mut core = EngineCore {
            debug: DebugInterface::new(config.trace_limit),
            config,
            state: SimulationState::Stopped,
            components: Vec::new(),
            buses: BusMap::new(),
            custom_buses: Vec::new(),
            events: EventQueue::new(),
            handlers: HashMap::new(),
            stats: StatsTracker::new(),
            notifier: Notifier::new(),
            cycle: 0,
            simulation_time: 0.0,
            last_tick: None,
            fixed_clock: None,
            control,
        };
        core.build_buses();
        core
    }

    pub fn set_state(&mut self, to: SimulationState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(%from, %to, "simulation state changed");
        self.notifier.publish(SimNotification::StateChanged { from, to });
    }

    /// Fresh buses with default lines, then every component's ports bound again.
    pub fn build_buses(&mut self) {
        let limit = self.config.signal_history_limit;
        let mut buses = BusMap::new();
        for (name, bits, lines) in DEFAULT_BUSES {
            let mut bus = SimulationBus::with_history_limit(*name, BitWidth::saturating(*bits), limit);
            for line in lines.iter() {
                bus.add_signal(line);
            }
            buses.insert(name.to_string(), bus);
        }
        for (name, width) in &self.custom_buses {
            buses.insert(name.clone(), SimulationBus::with_history_limit(name.clone(), *width, limit));
        }
        self.buses = buses;

        for slot in &self.components {
            bind_ports(&mut self.buses, &slot.id, &slot.ports);
        }
    }

    pub fn add_component(&mut self, component: Box<dyn SimComponent>) -> SimResult<()> {
        let id = component.id().to_string();
        if self.components.iter().any(|slot| slot.id == id) {
            return Err(SimError::DuplicateComponent(id));
        }
        let ports = component.ports().to_vec();
        bind_ports(&mut self.buses, &id, &ports);
        debug!(component = %id, ports = ports.len(), "component registered");
        self.components.push(ComponentSlot { id, ports, component });
        Ok(())
    }

    pub fn remove_component(&mut self, id: &str) -> SimResult<Box<dyn SimComponent>> {
        let index = self
            .components
            .iter()
            .position(|slot| slot.id == id)
            .ok_or_else(|| SimError::UnknownComponent(id.to_string()))?;
        let slot = self.components.remove(index);
        for bus in self.buses.values_mut() {
            bus.disconnect_component(id);
        }
        debug!(component = %id, "component removed");
        Ok(slot.component)
    }

    pub fn add_bus(&mut self, name: &str, width: BitWidth) -> SimResult<()> {
        if self.buses.contains_key(name) {
            return Err(SimError::DuplicateBus(name.to_string()));
        }
        self.custom_buses.push((name.to_string(), width));
        self.buses.insert(
            name.to_string(),
            SimulationBus::with_history_limit(name, width, self.config.signal_history_limit),
        );
        Ok(())
    }

    pub fn component(&self, id: &str) -> SimResult<&dyn SimComponent> {
        self.components
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.component.as_ref())
            .ok_or_else(|| SimError::UnknownComponent(id.to_string()))
    }

    fn set_components_active(&mut self, active: bool) {
        for slot in self.components.iter_mut() {
            slot.component.set_active(active);
            slot.component.reset();
            self.notifier.publish(SimNotification::ComponentStateChanged {
                component_id: slot.id.clone(),
                active,
            });
        }
    }

    /// Forget how time was last advanced; the next cycle measures from `simulation_time`.
    pub fn clear_pacing(&mut self) {
        self.last_tick = None;
        self.fixed_clock = None;
    }

    /// Zero the run state and activate every component.
    ///
    /// Pending events keep their remaining delay on the new time base.
    pub fn prepare_run(&mut self) {
        if !self.events.is_empty() {
            debug!(pending = self.events.len(), "carrying pending events into new run");
            self.events.rebase(self.simulation_time);
        }
        self.cycle = 0;
        self.simulation_time = 0.0;
        self.clear_pacing();
        self.build_buses();
        self.debug.reset_baselines();
        self.debug.trace_mut().set_limit(self.config.trace_limit);
        self.set_components_active(true);
        self.stats.begin();
    }

    /// Activate components for a single step from Stopped. Cycle, time,
    /// events and line values carry on from where the last run halted.
    pub fn prepare_step(&mut self) {
        self.clear_pacing();
        self.debug.trace_mut().set_limit(self.config.trace_limit);
        self.set_components_active(true);
    }

    /// Deactivate and reset components, then settle in Stopped.
    pub fn halt(&mut self) {
        self.control.request_halt();
        self.set_components_active(false);
        self.stats.suspend();
        self.set_state(SimulationState::Stopped);
    }

    /// Back to power-on: counters, events, trace and line values cleared.
    pub fn reset(&mut self) {
        self.cycle = 0;
        self.simulation_time = 0.0;
        self.clear_pacing();
        self.events.clear();
        self.build_buses();
        self.debug.trace_mut().clear();
        self.debug.reset_baselines();
        for slot in self.components.iter_mut() {
            slot.component.reset();
        }
        self.stats.reset();

        if let Some(line) = self
            .buses
            .get_mut(CONTROL_BUS)
            .and_then(|bus| bus.signal_mut(RESET_LINE))
        {
            line.set_value(1, 0.0);
            line.set_value(0, 0.0);
        }
        info!("simulation reset");
    }

    pub fn fail(&mut self, err: SimError) {
        error!(error = %err, cycle = self.cycle, "simulation failed");
        self.control.request_halt();
        self.stats.suspend();
        self.set_state(SimulationState::Error);
        self.notifier.publish(SimNotification::Error {
            message: err.to_string(),
            fatal: true,
        });
    }

    /// Entry point for background drivers.
    pub fn driver_cycle(&mut self, pacing: Pacing) -> CycleOutcome {
        if self.control.halted() {
            return CycleOutcome::Stopped;
        }
        if self.state != SimulationState::Running {
            return CycleOutcome::Idle;
        }
        self.run_cycle(pacing)
    }

    /// One cycle with the engine-fatal failure boundary around it.
    pub fn run_cycle(&mut self, pacing: Pacing) -> CycleOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.simulate_step(pacing)));
        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                self.fail(err);
                CycleOutcome::Failed
            }
            Err(payload) => {
                self.fail(SimError::StepPanicked(panic_message(payload.as_ref())));
                CycleOutcome::Failed
            }
        }
    }

    fn advance_time(&mut self, pacing: Pacing) {
        match pacing {
            Pacing::WallClock => {
                self.fixed_clock = None;
                let now = Instant::now();
                let dt = match self.last_tick {
                    Some(last) => now.duration_since(last).as_secs_f64(),
                    None => self.config.tick_interval().as_secs_f64(),
                };
                self.last_tick = Some(now);
                self.simulation_time += dt;
            }
            Pacing::Fixed => {
                self.last_tick = None;
                if !self.fixed_clock.is_some_and(|clock| clock.matches(&self.config)) {
                    self.fixed_clock = Some(FixedClock::anchored(self.simulation_time, &self.config));
                }
                if let Some(clock) = self.fixed_clock.as_mut() {
                    self.simulation_time = clock.tick();
                }
            }
        }
    }

    fn simulate_step(&mut self, pacing: Pacing) -> SimResult<CycleOutcome> {
        self.advance_time(pacing);
        let now = self.simulation_time;
        let cycle = self.cycle;

        let level = if cycle % 2 == 0 { 1 } else { 0 };
        self.buses
            .get_mut(CLOCK_BUS)
            .ok_or_else(|| SimError::UnknownBus(CLOCK_BUS.to_string()))?
            .broadcast(level, now);

        self.step_components(cycle, now);
        self.fire_events(now)?;

        self.cycle += 1;
        let cycle = self.cycle;
        self.notifier.publish(SimNotification::CycleCompleted {
            cycle,
            simulation_time: now,
        });
        trace!(cycle, time = now, "cycle completed");

        let mut snapshot = None;
        let mut breakpoint_hit = false;
        if self.debug.needs_snapshot() {
            let snap = EngineSnapshot::capture(cycle, now, &self.buses);
            let hits = self.debug.evaluate(&snap);
            for (id, signal, value) in hits.watchpoints {
                debug!(id, %signal, value, cycle, "watchpoint hit");
                self.notifier.publish(SimNotification::WatchpointHit { id, signal, value, cycle });
            }
            for (id, description) in hits.breakpoints {
                info!(id, %description, cycle, "breakpoint hit");
                self.notifier.publish(SimNotification::BreakpointHit { id, description, cycle });
                breakpoint_hit = true;
            }
            snapshot = Some(snap);
        }

        if self.config.trace_enabled {
            let snap = snapshot.unwrap_or_else(|| EngineSnapshot::capture(cycle, now, &self.buses));
            self.debug.log_trace(TraceEntry {
                timestamp: now,
                component: "engine".to_string(),
                action: "signal_trace".to_string(),
                payload: json!(snap.signals),
            });
        }

        self.stats.record(cycle);
        if cycle % self.config.stats_interval == 0 {
            let stats = self.statistics();
            self.notifier.publish(SimNotification::StatisticsUpdated(stats));
        }

        if let Some(limit) = self.config.cycle_limit() {
            if cycle >= limit {
                info!(cycle, "cycle limit reached");
                self.halt();
                return Ok(CycleOutcome::Stopped);
            }
        }

        if breakpoint_hit {
            self.control.set_paused(true);
            self.stats.suspend();
            self.set_state(SimulationState::Paused);
            return Ok(CycleOutcome::Paused);
        }

        Ok(CycleOutcome::Continue)
    }

    fn step_components(&mut self, cycle: u64, now: SimTime) {
        let mut traces = Vec::new();
        let mut failures = Vec::new();

        for slot in self.components.iter_mut() {
            if !slot.component.is_active() {
                continue;
            }
            let component = &mut slot.component;
            let mut ctx = StepContext::new(&slot.id, &slot.ports, &mut self.buses, &mut traces, now);
            let result = panic::catch_unwind(AssertUnwindSafe(|| component.simulate_step(cycle, &mut ctx)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push(err),
                Err(payload) => failures.push(ComponentError::new(
                    slot.id.clone(),
                    format!("panicked: {}", panic_message(payload.as_ref())),
                )),
            }
        }

        for entry in traces {
            self.debug.log_trace(entry);
        }

        for failure in failures {
            warn!(component = %failure.component_id, cycle, "{}", failure.message);
            if self.config.debug {
                self.debug.log_trace(TraceEntry {
                    timestamp: now,
                    component: failure.component_id.clone(),
                    action: "step_failed".to_string(),
                    payload: json!({ "cycle": cycle, "message": failure.message }),
                });
            }
            self.notifier.publish(SimNotification::Error {
                message: failure.to_string(),
                fatal: false,
            });
        }
    }

    fn fire_events(&mut self, now: SimTime) -> SimResult<()> {
        let mut follow_ups = Vec::new();

        for event in self.events.drain_due(now) {
            let Some(handlers) = self.handlers.get_mut(&event.event_type) else {
                trace!(event_type = %event.event_type, "event without handler discarded");
                self.debug.log_trace(TraceEntry {
                    timestamp: now,
                    component: "engine".to_string(),
                    action: "unhandled_event".to_string(),
                    payload: json!({ "event_type": event.event_type, "payload": event.payload }),
                });
                continue;
            };

            for handler in handlers.iter_mut() {
                let mut ctx = EventContext::new(&mut self.buses, now);
                handler(&event, &mut ctx).map_err(|message| SimError::EventHandler {
                    event_type: event.event_type.clone(),
                    message,
                })?;
                follow_ups.extend(ctx.into_scheduled());
            }
        }

        for event in follow_ups {
            self.events.push(event);
        }
        Ok(())
    }

    pub fn signal_count(&self) -> usize {
        self.buses.values().map(SimulationBus::signal_count).sum()
    }

    pub fn statistics(&self) -> SimulationStatistics {
        let cycles_per_second = self.stats.cycles_per_second();
        let target_frequency = self.config.clock_frequency;
        SimulationStatistics {
            state: self.state,
            current_cycle: self.cycle,
            simulation_time: self.simulation_time,
            cycles_per_second,
            actual_frequency: cycles_per_second,
            target_frequency,
            simulation_ratio: cycles_per_second / target_frequency,
            component_count: self.components.len(),
            bus_count: self.buses.len(),
            signal_count: self.signal_count(),
            event_queue_size: self.events.len(),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot::capture(self.cycle, self.simulation_time, &self.buses)
    }

    pub fn log_trace(&mut self, component: &str, action: &str, payload: Value) {
        self.debug.log_trace(TraceEntry {
            timestamp: self.simulation_time,
            component: component.to_string(),
            action: action.to_string(),
            payload,
        });
    }
}

/// Ports whose bus does not exist are left unbound; validation reports them.
fn bind_ports(buses: &mut BusMap, component_id: &str, ports: &[PortSpec]) {
    for port in ports {
        if let Some(bus) = buses.get_mut(port.bus_name()) {
            bus.add_signal(&port.name);
            bus.connect_component(component_id, &port.name, port.is_driver);
        }
    }
}

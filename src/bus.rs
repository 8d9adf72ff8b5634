use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::signal::{Signal, DEFAULT_HISTORY_LIMIT};
use crate::types::{BitWidth, SimTime};

/// All buses of an engine, keyed by bus name.
pub type BusMap = BTreeMap<String, SimulationBus>;

/// Advisory driver health, reported by validation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusHealth {
    Floating,
    Driven,
    Conflict,
}

/// One line as seen by an inspector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineState {
    pub value: u64,
    pub previous_value: u64,
    pub timestamp: SimTime,
}

/// Inspection view of a whole bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    pub name: String,
    pub bit_width: u32,
    pub value: u64,
    pub drivers: Vec<String>,
    pub lines: BTreeMap<String, LineState>,
}

/// A named set of lines shared by several components.
///
/// Drivers are registered as `"{component_id}.{port}"`. A write from an
/// id that never registered as a driver is dropped.
#[derive(Debug, Clone)]
pub struct SimulationBus {
    name: String,
    bit_width: BitWidth,
    signals: Vec<(String, Signal)>,
    connected: Vec<(String, String)>,
    drivers: Vec<String>,
    history_limit: usize,
}

impl SimulationBus {
    pub fn new(name: impl Into<String>, bit_width: BitWidth) -> Self {
        Self::with_history_limit(name, bit_width, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(
        name: impl Into<String>,
        bit_width: BitWidth,
        history_limit: usize,
    ) -> Self {
        SimulationBus {
            name: name.into(),
            bit_width,
            signals: Vec::new(),
            connected: Vec::new(),
            drivers: Vec::new(),
            history_limit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bit_width(&self) -> BitWidth {
        self.bit_width
    }

    /// Create a line at the bus width. Adding an existing line returns it untouched.
    pub fn add_signal(&mut self, line: &str) -> &mut Signal {
        let index = match self.signals.iter().position(|(name, _)| name == line) {
            Some(index) => index,
            None => {
                let qualified = format!("{}.{}", self.name, line);
                let signal = Signal::with_history_limit(qualified, self.bit_width, self.history_limit);
                self.signals.push((line.to_string(), signal));
                self.signals.len() - 1
            }
        };
        &mut self.signals[index].1
    }

    pub fn signal(&self, line: &str) -> Option<&Signal> {
        self.signals
            .iter()
            .find(|(name, _)| name == line)
            .map(|(_, signal)| signal)
    }

    pub fn signal_mut(&mut self, line: &str) -> Option<&mut Signal> {
        self.signals
            .iter_mut()
            .find(|(name, _)| name == line)
            .map(|(_, signal)| signal)
    }

    /// Lines in creation order as `(line name, signal)`.
    pub fn signals(&self) -> impl Iterator<Item = (&str, &Signal)> {
        self.signals.iter().map(|(name, signal)| (name.as_str(), signal))
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn connect_component(&mut self, component_id: &str, port: &str, is_driver: bool) {
        let already = self
            .connected
            .iter()
            .any(|(id, p)| id == component_id && p == port);
        if !already {
            self.connected.push((component_id.to_string(), port.to_string()));
        }

        if is_driver {
            let driver_id = format!("{}.{}", component_id, port);
            if !self.drivers.contains(&driver_id) {
                self.drivers.push(driver_id);
            }
        }
    }

    pub fn disconnect_component(&mut self, component_id: &str) {
        self.connected.retain(|(id, _)| id != component_id);
        let prefix = format!("{}.", component_id);
        self.drivers.retain(|driver| !driver.starts_with(&prefix));
    }

    /// `(component id, port)` pairs bound to this bus.
    pub fn connected(&self) -> &[(String, String)] {
        &self.connected
    }

    pub fn connected_component_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for (id, _) in &self.connected {
            if !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn drivers(&self) -> &[String] {
        &self.drivers
    }

    pub fn is_driver(&self, driver_id: &str) -> bool {
        self.drivers.iter().any(|d| d == driver_id)
    }

    /// Write `value` to every line. Returns `false` when `driver_id` is not registered.
    pub fn drive_bus(&mut self, driver_id: &str, value: u64, timestamp: SimTime) -> bool {
        if !self.is_driver(driver_id) {
            return false;
        }
        self.broadcast(value, timestamp);
        true
    }

    /// Write a single line. Returns `false` for unregistered drivers or unknown lines.
    pub fn drive_line(&mut self, driver_id: &str, line: &str, value: u64, timestamp: SimTime) -> bool {
        if !self.is_driver(driver_id) {
            return false;
        }
        match self.signal_mut(line) {
            Some(signal) => {
                signal.set_value(value, timestamp);
                true
            }
            None => false,
        }
    }

    /// Engine-side write that bypasses driver bookkeeping (clock, reset pulse).
    pub(crate) fn broadcast(&mut self, value: u64, timestamp: SimTime) {
        for (_, signal) in self.signals.iter_mut() {
            signal.set_value(value, timestamp);
        }
    }

    /// Value of the first line, or 0 for a bus without lines.
    pub fn read_bus(&self) -> u64 {
        self.signals.first().map(|(_, s)| s.value()).unwrap_or(0)
    }

    pub fn read_line(&self, line: &str) -> Option<u64> {
        self.signal(line).map(Signal::value)
    }

    /// Zero every line and drop its history. Bindings are kept.
    pub fn clear(&mut self) {
        for (_, signal) in self.signals.iter_mut() {
            signal.clear();
        }
    }

    pub fn state(&self) -> BusState {
        let lines = self
            .signals
            .iter()
            .map(|(line, signal)| {
                let state = LineState {
                    value: signal.value(),
                    previous_value: signal.previous_value(),
                    timestamp: signal.timestamp(),
                };
                (line.clone(), state)
            })
            .collect();
        BusState {
            name: self.name.clone(),
            bit_width: self.bit_width.bits(),
            value: self.read_bus(),
            drivers: self.drivers.clone(),
            lines,
        }
    }

    pub fn health(&self) -> BusHealth {
        match self.drivers.len() {
            0 => BusHealth::Floating,
            1 => BusHealth::Driven,
            _ => BusHealth::Conflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_bus() -> SimulationBus {
        let mut bus = SimulationBus::new("data", BitWidth::BYTE);
        bus.add_signal("D");
        bus.add_signal("Q");
        bus
    }

    #[test]
    fn test_add_signal_is_idempotent() {
        let mut bus = data_bus();
        bus.add_signal("D").set_value(3, 0.0);
        bus.add_signal("D");
        assert_eq!(bus.signal_count(), 2);
        assert_eq!(bus.read_line("D"), Some(3));
        assert_eq!(bus.signal("D").unwrap().name(), "data.D");
    }

    #[test]
    fn test_connect_component_registers_driver_once() {
        let mut bus = data_bus();
        bus.connect_component("cpu", "D", true);
        bus.connect_component("cpu", "D", true);
        bus.connect_component("ram", "D", false);
        assert_eq!(bus.drivers(), &["cpu.D".to_string()]);
        assert_eq!(bus.connected().len(), 2);
        assert_eq!(bus.connected_component_ids(), vec!["cpu", "ram"]);
    }

    #[test]
    fn test_drive_bus_writes_every_line() {
        let mut bus = data_bus();
        bus.connect_component("cpu", "D", true);
        assert!(bus.drive_bus("cpu.D", 0x1AB, 1.0));
        assert_eq!(bus.read_line("D"), Some(0xAB));
        assert_eq!(bus.read_line("Q"), Some(0xAB));
        assert_eq!(bus.read_bus(), 0xAB);
    }

    #[test]
    fn test_unregistered_driver_is_ignored() {
        let mut bus = data_bus();
        bus.connect_component("ram", "D", false);
        assert!(!bus.drive_bus("ram.D", 0x42, 1.0));
        assert!(!bus.drive_line("ghost.D", "D", 0x42, 1.0));
        assert_eq!(bus.read_bus(), 0);
        assert!(bus.signal("D").unwrap().history().is_empty());
    }

    #[test]
    fn test_drive_line() {
        let mut bus = SimulationBus::new("control", BitWidth::BYTE);
        bus.add_signal("reset");
        bus.add_signal("write");
        bus.connect_component("cpu", "write", true);
        assert!(bus.drive_line("cpu.write", "write", 1, 0.0));
        assert!(!bus.drive_line("cpu.write", "missing", 1, 0.0));
        assert_eq!(bus.read_line("write"), Some(1));
        assert_eq!(bus.read_line("reset"), Some(0));
    }

    #[test]
    fn test_read_empty_bus() {
        let bus = SimulationBus::new("empty", BitWidth::BYTE);
        assert_eq!(bus.read_bus(), 0);
    }

    #[test]
    fn test_health() {
        let mut bus = data_bus();
        assert_eq!(bus.health(), BusHealth::Floating);
        bus.connect_component("a", "D", true);
        assert_eq!(bus.health(), BusHealth::Driven);
        bus.connect_component("b", "D", true);
        assert_eq!(bus.health(), BusHealth::Conflict);
        bus.disconnect_component("b");
        assert_eq!(bus.health(), BusHealth::Driven);
    }

    #[test]
    fn test_state_view() {
        let mut bus = data_bus();
        bus.connect_component("cpu", "D", true);
        bus.drive_bus("cpu.D", 7, 0.5);
        let state = bus.state();
        assert_eq!(state.bit_width, 8);
        assert_eq!(state.value, 7);
        assert_eq!(state.lines["Q"].timestamp, 0.5);
        assert_eq!(state.drivers, vec!["cpu.D".to_string()]);
    }

    #[test]
    fn test_clear_keeps_bindings() {
        let mut bus = data_bus();
        bus.connect_component("cpu", "D", true);
        bus.drive_bus("cpu.D", 9, 2.0);
        bus.clear();
        assert_eq!(bus.read_bus(), 0);
        assert!(bus.signal("Q").unwrap().history().is_empty());
        assert_eq!(bus.drivers().len(), 1);
    }
}

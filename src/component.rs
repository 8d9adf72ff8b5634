use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::bus::BusMap;
use crate::debug::TraceEntry;
use crate::error::ComponentError;
use crate::signal::Signal;
use crate::types::SimTime;

/// Which default bus a port attaches to when it names none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortClass {
    Data,
    Address,
    Control,
    Clock,
    Power,
}

impl PortClass {
    pub fn default_bus(&self) -> &'static str {
        match self {
            PortClass::Data => "data",
            PortClass::Address => "address",
            PortClass::Control => "control",
            PortClass::Clock => "clock",
            PortClass::Power => "power",
        }
    }

    /// Control, clock and power ports own a single line instead of the whole bus.
    pub fn is_line(&self) -> bool {
        matches!(self, PortClass::Control | PortClass::Power | PortClass::Clock)
    }
}

/// A declared port. Binding creates a line named after the port on the target bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub class: PortClass,
    #[serde(default)]
    pub bus: Option<String>,
    #[serde(default)]
    pub is_driver: bool,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, class: PortClass) -> Self {
        PortSpec {
            name: name.into(),
            class,
            bus: None,
            is_driver: false,
        }
    }

    pub fn driver(mut self) -> Self {
        self.is_driver = true;
        self
    }

    pub fn on_bus(mut self, bus: impl Into<String>) -> Self {
        self.bus = Some(bus.into());
        self
    }

    pub fn bus_name(&self) -> &str {
        self.bus.as_deref().unwrap_or_else(|| self.class.default_bus())
    }
}

/// Contract between the engine and a simulated part.
///
/// `simulate_step` is called once per cycle while the component is active.
/// Errors and panics are caught by the engine and never stop the run.
pub trait SimComponent: Send {
    fn id(&self) -> &str;

    fn ports(&self) -> &[PortSpec];

    fn simulate_step(&mut self, cycle: u64, ctx: &mut StepContext<'_>) -> Result<(), ComponentError>;

    fn reset(&mut self);

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    fn component_type(&self) -> &str {
        "component"
    }

    fn properties(&self) -> Map<String, Value> {
        Map::new()
    }

    fn export_state(&self) -> Value {
        Value::Null
    }

    fn import_state(&mut self, _state: &Value) -> Result<(), ComponentError> {
        Ok(())
    }

    fn registers(&self) -> BTreeMap<String, u64> {
        BTreeMap::new()
    }

    fn read_memory(&self, _address: usize, _length: usize) -> Option<Vec<u64>> {
        None
    }
}

/// Bus access handed to a component for the duration of one step.
pub struct StepContext<'a> {
    component_id: &'a str,
    ports: &'a [PortSpec],
    buses: &'a mut BusMap,
    traces: &'a mut Vec<TraceEntry>,
    simulation_time: SimTime,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        component_id: &'a str,
        ports: &'a [PortSpec],
        buses: &'a mut BusMap,
        traces: &'a mut Vec<TraceEntry>,
        simulation_time: SimTime,
    ) -> Self {
        StepContext {
            component_id,
            ports,
            buses,
            traces,
            simulation_time,
        }
    }

    pub fn component_id(&self) -> &str {
        self.component_id
    }

    pub fn simulation_time(&self) -> SimTime {
        self.simulation_time
    }

    fn port(&self, port: &str) -> Result<&'a PortSpec, ComponentError> {
        self.ports
            .iter()
            .find(|port_spec| port_spec.name == port)
            .ok_or_else(|| ComponentError::new(self.component_id, format!("no port named '{}'", port)))
    }

    /// The line bound to one of this component's ports.
    pub fn port_signal(&self, port: &str) -> Option<&Signal> {
        let port_spec = self.port(port).ok()?;
        self.buses.get(port_spec.bus_name())?.signal(&port_spec.name)
    }

    pub fn read_port(&self, port: &str) -> u64 {
        self.port_signal(port).map(Signal::value).unwrap_or(0)
    }

    /// Drive a port. Line ports write their own line, the others write the whole bus.
    ///
    /// Returns `Ok(false)` when the bus dropped the write because the port
    /// is not registered as a driver.
    pub fn drive_port(&mut self, port: &str, value: u64) -> Result<bool, ComponentError> {
        let port_spec = self.port(port)?;
        let id = self.component_id;
        let driver_id = format!("{}.{}", id, port_spec.name);
        let bus = self.buses.get_mut(port_spec.bus_name()).ok_or_else(|| {
            ComponentError::new(id, format!("bus '{}' is not available", port_spec.bus_name()))
        })?;

        let written = if port_spec.class.is_line() {
            bus.drive_line(&driver_id, &port_spec.name, value, self.simulation_time)
        } else {
            bus.drive_bus(&driver_id, value, self.simulation_time)
        };
        Ok(written)
    }

    pub fn read_bus(&self, bus: &str) -> Option<u64> {
        self.buses.get(bus).map(|b| b.read_bus())
    }

    /// Look up a line by its qualified `bus.line` name.
    pub fn read_signal(&self, qualified: &str) -> Option<u64> {
        let (bus, line) = qualified.split_once('.')?;
        self.buses.get(bus)?.read_line(line)
    }

    pub fn trace(&mut self, action: impl Into<String>, payload: Value) {
        self.traces.push(TraceEntry {
            timestamp: self.simulation_time,
            component: self.component_id.to_string(),
            action: action.into(),
            payload,
        });
    }
}

/// Minimal component: declared ports and an active flag, no behaviour.
#[derive(Debug, Clone)]
pub struct BaseComponent {
    id: String,
    ports: Vec<PortSpec>,
    active: bool,
}

impl BaseComponent {
    pub fn new(id: impl Into<String>, ports: Vec<PortSpec>) -> Self {
        BaseComponent {
            id: id.into(),
            ports,
            active: false,
        }
    }
}

impl SimComponent for BaseComponent {
    fn id(&self) -> &str {
        &self.id
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn simulate_step(&mut self, _cycle: u64, _ctx: &mut StepContext<'_>) -> Result<(), ComponentError> {
        Ok(())
    }

    fn reset(&mut self) {}

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn component_type(&self) -> &str {
        "base"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulationBus;
    use crate::types::BitWidth;

    fn buses() -> BusMap {
        let mut buses = BusMap::new();
        let mut data = SimulationBus::new("data", BitWidth::BYTE);
        data.add_signal("D");
        data.connect_component("cpu", "D", true);
        buses.insert("data".into(), data);

        let mut control = SimulationBus::new("control", BitWidth::BYTE);
        control.add_signal("reset");
        control.add_signal("write");
        control.connect_component("cpu", "write", true);
        buses.insert("control".into(), control);
        buses
    }

    #[test]
    fn test_port_defaults() {
        let port = PortSpec::new("A", PortClass::Address).driver();
        assert_eq!(port.bus_name(), "address");
        assert!(port.is_driver);
        let port = PortSpec::new("X", PortClass::Data).on_bus("aux");
        assert_eq!(port.bus_name(), "aux");
    }

    #[test]
    fn test_step_context_drive_and_read() {
        let ports = vec![
            PortSpec::new("D", PortClass::Data).driver(),
            PortSpec::new("write", PortClass::Control).driver(),
        ];
        let mut buses = buses();
        let mut traces = Vec::new();
        let mut ctx = StepContext::new("cpu", &ports, &mut buses, &mut traces, 0.25);

        assert!(ctx.drive_port("D", 0x5A).unwrap());
        assert!(ctx.drive_port("write", 1).unwrap());
        assert!(ctx.drive_port("missing", 1).is_err());
        assert_eq!(ctx.read_port("D"), 0x5A);
        assert_eq!(ctx.read_bus("data"), Some(0x5A));
        assert_eq!(ctx.read_signal("control.write"), Some(1));
        assert_eq!(ctx.read_signal("control.reset"), Some(0));
        ctx.trace("wrote", serde_json::json!({"value": 0x5A}));

        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].component, "cpu");
        assert_eq!(traces[0].timestamp, 0.25);
    }

    #[test]
    fn test_base_component() {
        let mut base = BaseComponent::new("base", vec![PortSpec::new("clk", PortClass::Clock)]);
        assert!(!base.is_active());
        base.set_active(true);
        assert!(base.is_active());
        assert_eq!(base.ports().len(), 1);
        assert!(base.registers().is_empty());
        assert!(base.read_memory(0, 4).is_none());
    }
}

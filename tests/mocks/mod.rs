//! Mock components shared by the integration tests.
//!
//! Each mock records what it saw into shared handles so a test can inspect
//! behaviour after the component has been moved into an engine.

#![allow(dead_code)]

use rusty_sim::{ComponentError, PortClass, PortSpec, SimComponent, StepContext};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Shared log of `(cycle, clock level)` pairs.
pub type StepLog = Arc<Mutex<Vec<(u64, u64)>>>;

/// Records every step it receives together with the clock level.
pub struct RecordingComponent {
    id: String,
    ports: Vec<PortSpec>,
    active: bool,
    steps: StepLog,
    resets: Arc<Mutex<usize>>,
}

impl RecordingComponent {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ports: vec![PortSpec::new("clk", PortClass::Clock)],
            active: false,
            steps: Arc::new(Mutex::new(Vec::new())),
            resets: Arc::new(Mutex::new(0)),
        }
    }

    pub fn steps(&self) -> StepLog {
        Arc::clone(&self.steps)
    }

    pub fn resets(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.resets)
    }
}

impl SimComponent for RecordingComponent {
    fn id(&self) -> &str {
        &self.id
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn simulate_step(&mut self, cycle: u64, ctx: &mut StepContext<'_>) -> Result<(), ComponentError> {
        let level = ctx.read_port("clk");
        self.steps.lock().unwrap().push((cycle, level));
        Ok(())
    }

    fn reset(&mut self) {
        *self.resets.lock().unwrap() += 1;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn component_type(&self) -> &str {
        "recorder"
    }

    fn export_state(&self) -> Value {
        json!({ "steps": self.steps.lock().unwrap().len() })
    }

    fn registers(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([("steps".to_string(), self.steps.lock().unwrap().len() as u64)])
    }
}

/// Returns an error from every step.
pub struct FailingComponent {
    id: String,
    ports: Vec<PortSpec>,
    active: bool,
}

impl FailingComponent {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ports: vec![PortSpec::new("clk", PortClass::Clock)],
            active: false,
        }
    }
}

impl SimComponent for FailingComponent {
    fn id(&self) -> &str {
        &self.id
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn simulate_step(&mut self, cycle: u64, _ctx: &mut StepContext<'_>) -> Result<(), ComponentError> {
        Err(ComponentError::new(&self.id, format!("simulated fault at cycle {}", cycle)))
    }

    fn reset(&mut self) {}

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

/// Panics from every step.
pub struct PanickingComponent {
    id: String,
    ports: Vec<PortSpec>,
    active: bool,
}

impl PanickingComponent {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ports: vec![PortSpec::new("clk", PortClass::Clock)],
            active: false,
        }
    }
}

impl SimComponent for PanickingComponent {
    fn id(&self) -> &str {
        &self.id
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn simulate_step(&mut self, _cycle: u64, _ctx: &mut StepContext<'_>) -> Result<(), ComponentError> {
        panic!("mock component blew up");
    }

    fn reset(&mut self) {}

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

/// Drives a fixed value onto its `out` port every step.
pub struct ConstantDriver {
    id: String,
    ports: Vec<PortSpec>,
    value: u64,
    active: bool,
}

impl ConstantDriver {
    pub fn new(id: &str, bus: &str, value: u64) -> Self {
        Self {
            id: id.to_string(),
            ports: vec![PortSpec::new("out", PortClass::Data).on_bus(bus).driver()],
            value,
            active: false,
        }
    }
}

impl SimComponent for ConstantDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn simulate_step(&mut self, _cycle: u64, ctx: &mut StepContext<'_>) -> Result<(), ComponentError> {
        ctx.drive_port("out", self.value)?;
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
        "constant_driver"
    }

    fn export_state(&self) -> Value {
        json!({ "value": self.value })
    }

    fn import_state(&mut self, state: &Value) -> Result<(), ComponentError> {
        if let Some(value) = state.get("value").and_then(Value::as_u64) {
            self.value = value;
        }
        Ok(())
    }
}

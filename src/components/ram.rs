use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::component::{PortClass, PortSpec, SimComponent, StepContext};
use crate::error::{ComponentError, SimError, SimResult};

/// Static RAM latched on the rising clock edge.
///
/// Address comes from port `A`, data from `D`, and a store happens when
/// the `control.write` line is high at the edge. Addresses wrap modulo
/// the memory size. Contents survive `reset()`; use [`StaticRam::clear`]
/// to wipe them.
pub struct StaticRam {
    id: String,
    ports: Vec<PortSpec>,
    memory: Vec<u64>,
    active: bool,
    last_address: usize,
    last_data: u64,
    writes: u64,
}

impl StaticRam {
    pub fn new(id: impl Into<String>, size: usize) -> SimResult<Self> {
        let id = id.into();
        if size == 0 {
            return Err(SimError::InvalidConfig(format!("RAM '{}' needs a non-zero size", id)));
        }
        Ok(StaticRam {
            id,
            ports: vec![
                PortSpec::new("clk", PortClass::Clock),
                PortSpec::new("A", PortClass::Address),
                PortSpec::new("D", PortClass::Data),
                PortSpec::new("write", PortClass::Control),
            ],
            memory: vec![0; size],
            active: false,
            last_address: 0,
            last_data: 0,
            writes: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    pub fn load_data(&mut self, offset: usize, data: &[u64]) -> Result<(), ComponentError> {
        let fits = offset
            .checked_add(data.len())
            .is_some_and(|end| end <= self.memory.len());
        if !fits {
            return Err(ComponentError::new(
                &self.id,
                format!(
                    "data exceeds RAM capacity: offset {} + length {} > size {}",
                    offset,
                    data.len(),
                    self.memory.len()
                ),
            ));
        }
        self.memory[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.memory.iter_mut().for_each(|cell| *cell = 0);
    }
}

impl SimComponent for StaticRam {
    fn id(&self) -> &str {
        &self.id
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn simulate_step(&mut self, _cycle: u64, ctx: &mut StepContext<'_>) -> Result<(), ComponentError> {
        let rising = ctx.port_signal("clk").is_some_and(|clk| clk.is_rising_edge());
        if !rising {
            return Ok(());
        }

        let address = (ctx.read_port("A") % self.memory.len() as u64) as usize;
        self.last_address = address;

        if ctx.read_port("write") != 0 {
            let data = ctx.read_port("D");
            self.memory[address] = data;
            self.last_data = data;
            self.writes += 1;
            ctx.trace("write", json!({ "address": address, "data": data }));
        } else {
            self.last_data = self.memory[address];
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.last_address = 0;
        self.last_data = 0;
        self.writes = 0;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn component_type(&self) -> &str {
        "static_ram"
    }

    fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("size".into(), json!(self.memory.len()));
        props
    }

    fn export_state(&self) -> Value {
        json!({
            "memory": self.memory,
            "last_address": self.last_address,
            "last_data": self.last_data,
            "writes": self.writes,
        })
    }

    fn import_state(&mut self, state: &Value) -> Result<(), ComponentError> {
        if let Some(image) = state.get("memory") {
            let memory: Vec<u64> = serde_json::from_value(image.clone())
                .map_err(|e| ComponentError::new(&self.id, format!("bad memory image: {}", e)))?;
            if memory.len() > self.memory.len() {
                return Err(ComponentError::new(
                    &self.id,
                    format!("memory image of {} words does not fit {}", memory.len(), self.memory.len()),
                ));
            }
            self.clear();
            self.memory[..memory.len()].copy_from_slice(&memory);
        }

        let field = |name: &str| state.get(name).and_then(Value::as_u64).unwrap_or(0);
        self.last_address = (field("last_address") as usize) % self.memory.len();
        self.last_data = field("last_data");
        self.writes = field("writes");
        Ok(())
    }

    fn registers(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("last_address".to_string(), self.last_address as u64),
            ("last_data".to_string(), self.last_data),
            ("writes".to_string(), self.writes),
        ])
    }

    /// Out-of-range starts return `None`; long reads are clipped.
    fn read_memory(&self, address: usize, length: usize) -> Option<Vec<u64>> {
        if address >= self.memory.len() {
            return None;
        }
        let end = address.saturating_add(length).min(self.memory.len());
        Some(self.memory[address..end].to_vec())
    }
}

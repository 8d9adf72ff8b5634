use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::component::{PortClass, PortSpec, SimComponent, StepContext};
use crate::error::{ComponentError, SimResult};
use crate::types::BitWidth;

/// Free-running binary counter.
///
/// On every rising clock edge the current count is driven onto the data
/// bus (port `Q`), then the count advances by `step`, wrapping at the
/// configured width. Optionally mirrors the count onto the address bus
/// (`A`) and raises the `control.write` strobe for half a clock period.
pub struct BinaryCounter {
    id: String,
    ports: Vec<PortSpec>,
    width: BitWidth,
    step: u64,
    count: u64,
    active: bool,
    drive_address: bool,
    write_strobe: bool,
}

impl BinaryCounter {
    pub fn new(id: impl Into<String>, bits: u32) -> SimResult<Self> {
        let width = BitWidth::new(bits)?;
        Ok(BinaryCounter {
            id: id.into(),
            ports: vec![
                PortSpec::new("clk", PortClass::Clock),
                PortSpec::new("Q", PortClass::Data).driver(),
            ],
            width,
            step: 1,
            count: 0,
            active: false,
            drive_address: false,
            write_strobe: false,
        })
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn with_address_output(mut self) -> Self {
        if !self.drive_address {
            self.ports.push(PortSpec::new("A", PortClass::Address).driver());
            self.drive_address = true;
        }
        self
    }

    pub fn with_write_strobe(mut self) -> Self {
        if !self.write_strobe {
            self.ports.push(PortSpec::new("write", PortClass::Control).driver());
            self.write_strobe = true;
        }
        self
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl SimComponent for BinaryCounter {
    fn id(&self) -> &str {
        &self.id
    }

    fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    fn simulate_step(&mut self, _cycle: u64, ctx: &mut StepContext<'_>) -> Result<(), ComponentError> {
        let (rising, falling) = match ctx.port_signal("clk") {
            Some(clk) => (clk.is_rising_edge(), clk.is_falling_edge()),
            None => return Ok(()),
        };

        if rising {
            let value = self.count;
            ctx.drive_port("Q", value)?;
            if self.drive_address {
                ctx.drive_port("A", value)?;
            }
            if self.write_strobe {
                ctx.drive_port("write", 1)?;
            }
            self.count = self.width.apply(self.count.wrapping_add(self.step));
            ctx.trace("count", json!({ "value": value }));
        } else if falling && self.write_strobe {
            ctx.drive_port("write", 0)?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.count = 0;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn component_type(&self) -> &str {
        "binary_counter"
    }

    fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("width".into(), json!(self.width.bits()));
        props.insert("step".into(), json!(self.step));
        props.insert("drive_address".into(), json!(self.drive_address));
        props.insert("write_strobe".into(), json!(self.write_strobe));
        props
    }

    fn export_state(&self) -> Value {
        json!({ "count": self.count })
    }

    fn import_state(&mut self, state: &Value) -> Result<(), ComponentError> {
        let count = state
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| ComponentError::new(&self.id, "state has no numeric 'count'"))?;
        self.count = self.width.apply(count);
        Ok(())
    }

    fn registers(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([("count".to_string(), self.count)])
    }
}

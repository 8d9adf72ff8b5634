use serde::{Deserialize, Serialize};

use super::machine::{EngineCore, CLOCK_BUS};
use crate::bus::BusHealth;
use crate::component::PortClass;

/// Outcome of a setup check. Warnings are advisory and never block a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn has_warning(&self, needle: &str) -> bool {
        self.warnings.iter().any(|w| w.contains(needle))
    }
}

pub(crate) fn validate(core: &EngineCore) -> ValidationReport {
    let mut report = ValidationReport::default();

    if let Err(err) = core.config.validate() {
        report.errors.push(err.to_string());
    }

    if core.components.is_empty() {
        report.warnings.push("no components registered".to_string());
    }

    for slot in &core.components {
        if slot.ports.is_empty() {
            report
                .warnings
                .push(format!("component '{}' declares no ports", slot.id));
        }
        for port in &slot.ports {
            if !core.buses.contains_key(port.bus_name()) {
                report.errors.push(format!(
                    "component '{}' port '{}' is unbound: unknown bus '{}'",
                    slot.id,
                    port.name,
                    port.bus_name()
                ));
            }
        }
    }

    for (name, bus) in &core.buses {
        if name == CLOCK_BUS || name == "power" || bus.connected().is_empty() {
            continue;
        }
        match bus.health() {
            BusHealth::Floating => report
                .warnings
                .push(format!("bus '{}' is floating: no component drives it", name)),
            BusHealth::Conflict => report.warnings.push(format!(
                "bus '{}' has multiple drivers ({}); potential conflict",
                name,
                bus.drivers().join(", ")
            )),
            BusHealth::Driven => {}
        }
    }

    let clock_consumed = core
        .components
        .iter()
        .flat_map(|slot| slot.ports.iter())
        .any(|port| port.class == PortClass::Clock);
    if !core.components.is_empty() && !clock_consumed {
        report.warnings.push("no component consumes the clock".to_string());
    }

    report.ok = report.errors.is_empty();
    report
}

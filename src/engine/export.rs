//! Serializable engine snapshots for save/restore.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use super::machine::EngineCore;
use super::SimulationState;
use crate::error::SimResult;
use crate::signal::SignalSample;
use crate::types::SimTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalExport {
    pub bit_width: u32,
    pub value: u64,
    pub previous_value: u64,
    pub timestamp: SimTime,
    pub history: Vec<SignalSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusExport {
    pub bit_width: u32,
    pub value: u64,
    pub drivers: Vec<String>,
    /// `component.port` pairs bound to the bus
    pub connected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentExport {
    pub component_type: String,
    pub active: bool,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStateExport {
    pub state: SimulationState,
    pub cycle: u64,
    pub simulation_time: SimTime,
    /// Keyed by `bus.line`
    pub signals: BTreeMap<String, SignalExport>,
    pub buses: BTreeMap<String, BusExport>,
    pub components: BTreeMap<String, ComponentExport>,
}

impl EngineStateExport {
    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> SimResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub signals_restored: usize,
    pub components_restored: usize,
    /// Signal and component ids that had no counterpart
    pub skipped: Vec<String>,
}

pub(crate) fn export(core: &EngineCore) -> EngineStateExport {
    let mut signals = BTreeMap::new();
    let mut buses = BTreeMap::new();

    for (bus_name, bus) in &core.buses {
        for (line, signal) in bus.signals() {
            signals.insert(
                format!("{}.{}", bus_name, line),
                SignalExport {
                    bit_width: signal.bit_width().bits(),
                    value: signal.value(),
                    previous_value: signal.previous_value(),
                    timestamp: signal.timestamp(),
                    history: signal.history().iter().copied().collect(),
                },
            );
        }
        buses.insert(
            bus_name.clone(),
            BusExport {
                bit_width: bus.bit_width().bits(),
                value: bus.read_bus(),
                drivers: bus.drivers().to_vec(),
                connected: bus
                    .connected()
                    .iter()
                    .map(|(id, port)| format!("{}.{}", id, port))
                    .collect(),
            },
        );
    }

    let components = core
        .components
        .iter()
        .map(|slot| {
            let component = &slot.component;
            let export = ComponentExport {
                component_type: component.component_type().to_string(),
                active: component.is_active(),
                state: component.export_state(),
                properties: component.properties(),
            };
            (slot.id.clone(), export)
        })
        .collect();

    EngineStateExport {
        state: core.state,
        cycle: core.cycle,
        simulation_time: core.simulation_time,
        signals,
        buses,
        components,
    }
}

/// Restores onto the current bus layout. Signals and components that do
/// not exist here are skipped, never created.
pub(crate) fn import(core: &mut EngineCore, snapshot: &EngineStateExport) -> ImportSummary {
    let mut summary = ImportSummary::default();

    for (name, saved) in &snapshot.signals {
        let signal = name
            .split_once('.')
            .and_then(|(bus, line)| core.buses.get_mut(bus)?.signal_mut(line));
        match signal {
            Some(signal) => {
                signal.restore(saved.value, saved.previous_value, saved.timestamp, &saved.history);
                summary.signals_restored += 1;
            }
            None => summary.skipped.push(name.clone()),
        }
    }

    for (id, saved) in &snapshot.components {
        let Some(slot) = core.components.iter_mut().find(|slot| &slot.id == id) else {
            summary.skipped.push(id.clone());
            continue;
        };
        if let Err(err) = slot.component.import_state(&saved.state) {
            warn!(component = %id, error = %err, "component rejected imported state");
            summary.skipped.push(id.clone());
            continue;
        }
        slot.component.set_active(saved.active);
        summary.components_restored += 1;
    }

    core.cycle = snapshot.cycle;
    core.simulation_time = snapshot.simulation_time;
    core.clear_pacing();
    debug!(
        signals = summary.signals_restored,
        components = summary.components_restored,
        skipped = summary.skipped.len(),
        "engine state imported"
    );
    summary
}

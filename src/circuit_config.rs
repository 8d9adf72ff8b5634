//! # JSON Circuit Configuration
//!
//! Describes a whole circuit in one JSON document: run parameters, extra
//! buses and the component instances to register. A [`CircuitFactory`]
//! turns the document into a ready-to-start [`SimulationEngine`].
//!
//! ```json
//! {
//!   "name": "CounterRam",
//!   "description": "8-bit counter writing into a small RAM",
//!   "simulation": { "clock_frequency": 1000.0, "max_cycles": 512 },
//!   "buses": [{ "name": "aux", "bit_width": 4 }],
//!   "components": {
//!     "counter": { "component_type": "binary_counter", "properties": { "width": 8 } },
//!     "ram": { "component_type": "static_ram", "properties": { "size": 256 } }
//!   }
//! }
//! ```
//!
//! Components are registered in id order, which is also their stepping order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::component::SimComponent;
use crate::components::{BinaryCounter, StaticRam};
use crate::config::SimulationConfig;
use crate::engine::SimulationEngine;
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub buses: Vec<BusConfig>,
    pub components: BTreeMap<String, ComponentConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub name: String,
    pub bit_width: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub component_type: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl ComponentConfig {
    fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.properties.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    /// Like `u64_or`, but a value that does not fit `T` is a config error.
    fn sized_or<T: TryFrom<u64>>(&self, key: &str, default: T) -> SimResult<T> {
        match self.properties.get(key).and_then(Value::as_u64) {
            None => Ok(default),
            Some(raw) => T::try_from(raw).map_err(|_| {
                SimError::InvalidConfig(format!("property '{}' is out of range: {}", key, raw))
            }),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.properties.get(key).and_then(Value::as_bool).unwrap_or(default)
    }
}

impl CircuitConfig {
    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: CircuitConfig = serde_json::from_str(json)?;
        config.simulation.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub type ComponentConstructor = fn(id: &str, config: &ComponentConfig) -> SimResult<Box<dyn SimComponent>>;

/// Builds components and engines from [`CircuitConfig`] documents.
#[derive(Debug)]
pub struct CircuitFactory {
    component_registry: HashMap<String, ComponentConstructor>,
}

impl Default for CircuitFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitFactory {
    pub fn new() -> Self {
        let mut factory = CircuitFactory {
            component_registry: HashMap::new(),
        };
        factory.register_default_components();
        factory
    }

    fn register_default_components(&mut self) {
        self.register("binary_counter", |id, config| {
            let width: u32 = config.sized_or("width", 8)?;
            let mut counter = BinaryCounter::new(id, width)?.with_step(config.u64_or("step", 1));
            if config.bool_or("drive_address", false) {
                counter = counter.with_address_output();
            }
            if config.bool_or("write_strobe", false) {
                counter = counter.with_write_strobe();
            }
            Ok(Box::new(counter))
        });

        self.register("static_ram", |id, config| {
            let size: usize = config.sized_or("size", 256)?;
            Ok(Box::new(StaticRam::new(id, size)?))
        });
    }

    /// Add or replace a constructor for `component_type`.
    pub fn register(&mut self, component_type: &str, constructor: ComponentConstructor) {
        self.component_registry.insert(component_type.to_string(), constructor);
    }

    pub fn component_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.component_registry.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn create_component(&self, id: &str, config: &ComponentConfig) -> SimResult<Box<dyn SimComponent>> {
        let constructor = self
            .component_registry
            .get(&config.component_type)
            .ok_or_else(|| SimError::UnknownComponentType(config.component_type.clone()))?;
        constructor(id, config)
    }

    pub fn build_engine(&self, config: &CircuitConfig) -> SimResult<SimulationEngine> {
        let mut engine = SimulationEngine::new(config.simulation.clone())?;
        for bus in &config.buses {
            engine.add_bus(&bus.name, bus.bit_width)?;
        }
        for (id, component_config) in &config.components {
            debug!(component = %id, kind = %component_config.component_type, "creating component");
            let component = self.create_component(id, component_config)?;
            engine.add_boxed_component(component)?;
        }
        Ok(engine)
    }

    pub fn load_json_config<P: AsRef<Path>>(&self, path: P) -> SimResult<CircuitConfig> {
        let content = std::fs::read_to_string(path.as_ref())?;
        CircuitConfig::from_json(&content)
    }

    pub fn create_from_json<P: AsRef<Path>>(&self, path: P) -> SimResult<Circuit> {
        let config = self.load_json_config(path)?;
        self.create(config)
    }

    pub fn create_from_str(&self, json: &str) -> SimResult<Circuit> {
        self.create(CircuitConfig::from_json(json)?)
    }

    pub fn create(&self, config: CircuitConfig) -> SimResult<Circuit> {
        let engine = self.build_engine(&config)?;
        info!(circuit = %config.name, components = config.components.len(), "circuit created");
        Ok(Circuit { config, engine })
    }
}

/// An engine together with the document it was built from.
#[derive(Debug)]
pub struct Circuit {
    config: CircuitConfig,
    engine: SimulationEngine,
}

impl Circuit {
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub fn engine(&self) -> &SimulationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SimulationEngine {
        &mut self.engine
    }

    pub fn into_engine(self) -> SimulationEngine {
        self.engine
    }

    pub fn info(&self) -> CircuitInfo {
        CircuitInfo {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            version: self.config.version.clone(),
            component_count: self.config.components.len(),
            bus_count: self.engine.bus_names().len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub component_count: usize,
    pub bus_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CIRCUIT: &str = r#"{
        "name": "Tiny",
        "simulation": { "clock_frequency": 100.0, "max_cycles": 8 },
        "buses": [{ "name": "aux", "bit_width": 4 }],
        "components": {
            "counter": { "component_type": "binary_counter", "properties": { "width": 4 } },
            "ram": { "component_type": "static_ram", "properties": { "size": 16 } }
        }
    }"#;

    #[test]
    fn test_factory_builds_engine() {
        let factory = CircuitFactory::new();
        let circuit = factory.create_from_str(CIRCUIT).unwrap();
        let info = circuit.info();
        assert_eq!(info.name, "Tiny");
        assert_eq!(info.version, "1.0");
        assert_eq!(info.component_count, 2);
        assert_eq!(info.bus_count, 6);
        assert_eq!(circuit.engine().component_ids(), vec!["counter", "ram"]);
        assert_eq!(circuit.engine().config().max_cycles, 8);
    }

    #[test]
    fn test_unknown_component_type() {
        let factory = CircuitFactory::new();
        let json = r#"{"name": "Bad", "components": {"x": {"component_type": "flux_capacitor"}}}"#;
        assert!(matches!(
            factory.create_from_str(json),
            Err(SimError::UnknownComponentType(t)) if t == "flux_capacitor"
        ));
    }

    #[test]
    fn test_custom_constructor() {
        let mut factory = CircuitFactory::new();
        factory.register("tiny_ram", |id, _| Ok(Box::new(StaticRam::new(id, 2)?)));
        assert!(factory.component_types().contains(&"tiny_ram".to_string()));
        let config = ComponentConfig {
            component_type: "tiny_ram".into(),
            properties: HashMap::new(),
        };
        let ram = factory.create_component("r", &config).unwrap();
        assert_eq!(ram.read_memory(0, 8).unwrap().len(), 2);
    }

    #[test]
    fn test_out_of_range_width_is_rejected() {
        let factory = CircuitFactory::new();
        let json = r#"{"name": "W", "components": {"c": {"component_type": "binary_counter", "properties": {"width": 4294967304}}}}"#;
        assert!(matches!(factory.create_from_str(json), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_simulation_block_is_rejected() {
        let json = r#"{"name": "Bad", "simulation": {"clock_frequency": 0}, "components": {}}"#;
        assert!(CircuitConfig::from_json(json).is_err());
    }
}

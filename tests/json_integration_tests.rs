//! JSON-Based Integration Tests
//!
//! These tests verify that circuit documents load through the factory and
//! that the resulting engines behave as described by the document.

use rusty_sim::circuit_config::{CircuitConfig, CircuitFactory};
use rusty_sim::{EngineStateExport, SimError, SimulationConfig, SimulationState};
use std::time::Duration;

#[cfg(test)]
mod json_circuit_tests {
    use super::*;

    #[test]
    fn test_factory_knows_builtin_types() {
        let factory = CircuitFactory::new();
        assert_eq!(factory.component_types(), vec!["binary_counter", "static_ram"]);
    }

    #[test]
    fn test_counter_ram_circuit_loading() {
        let factory = CircuitFactory::new();
        let result = factory.create_from_json("configs/counter_ram.json");
        assert!(result.is_ok(), "Failed to create circuit: {:?}", result.err());

        let circuit = result.unwrap();
        let info = circuit.info();
        assert_eq!(info.name, "CounterRam");
        assert_eq!(info.component_count, 2);
        assert_eq!(info.bus_count, 5);
        assert_eq!(circuit.config().metadata["category"], "demo");

        let engine = circuit.engine();
        assert_eq!(engine.config().max_cycles, 512);
        assert_eq!(engine.component_ids(), vec!["counter", "ram"]);

        let report = engine.validate_setup();
        assert!(report.ok, "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn test_counter_fills_ram() {
        let factory = CircuitFactory::new();
        let mut engine = factory
            .create_from_json("configs/counter_ram.json")
            .unwrap()
            .into_engine();

        engine.start().unwrap();
        assert!(engine.wait_for_stop(Duration::from_secs(10)));
        assert_eq!(engine.state(), SimulationState::Stopped);
        assert_eq!(engine.current_cycle(), 512);

        let memory = engine.read_memory("ram", 0, 256).unwrap().unwrap();
        let expected: Vec<u64> = (0..256).collect();
        assert_eq!(memory, expected);
        // Stopping resets components; RAM contents survive, the counter does not.
        assert_eq!(engine.inspect_registers("counter").unwrap()["count"], 0);
    }

    #[test]
    fn test_real_time_circuit_with_custom_bus() {
        let factory = CircuitFactory::new();
        let mut config = factory.load_json_config("configs/blinker_realtime.json").unwrap();
        assert!(config.simulation.real_time);
        config.simulation.max_cycles = 5;

        let mut circuit = factory.create(config).unwrap();
        assert_eq!(circuit.info().bus_count, 6);
        assert!(circuit.engine().bus_names().contains(&"leds".to_string()));

        let engine = circuit.engine_mut();
        engine.start().unwrap();
        assert!(engine.wait_for_stop(Duration::from_secs(5)));
        assert_eq!(engine.current_cycle(), 5);
        assert!(engine
            .recent_traces(10)
            .iter()
            .any(|t| t.action == "signal_trace"));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let factory = CircuitFactory::new();
        assert!(matches!(factory.create_from_str("{ not json"), Err(SimError::Json(_))));
        assert!(matches!(
            factory.create_from_json("configs/does_not_exist.json"),
            Err(SimError::Io(_))
        ));
    }

    #[test]
    fn test_unknown_component_type_is_rejected() {
        let factory = CircuitFactory::new();
        let json = r#"{
            "name": "Broken",
            "components": { "cpu": { "component_type": "mos_6502" } }
        }"#;
        assert!(matches!(
            factory.create_from_str(json),
            Err(SimError::UnknownComponentType(t)) if t == "mos_6502"
        ));
    }

    #[test]
    fn test_bad_component_properties_are_rejected() {
        let factory = CircuitFactory::new();
        let wide = r#"{"name": "W", "components": {"c": {"component_type": "binary_counter", "properties": {"width": 100}}}}"#;
        assert!(matches!(factory.create_from_str(wide), Err(SimError::InvalidBitWidth(100))));

        let empty = r#"{"name": "E", "components": {"r": {"component_type": "static_ram", "properties": {"size": 0}}}}"#;
        assert!(matches!(factory.create_from_str(empty), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_circuit_config_round_trip() {
        let factory = CircuitFactory::new();
        let config = factory.load_json_config("configs/counter_ram.json").unwrap();
        let reparsed = CircuitConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(reparsed.name, config.name);
        assert_eq!(reparsed.simulation, config.simulation);
        assert_eq!(
            reparsed.components.keys().collect::<Vec<_>>(),
            config.components.keys().collect::<Vec<_>>()
        );
    }
}

#[cfg(test)]
mod json_config_tests {
    use super::*;

    #[test]
    fn test_partial_simulation_config_uses_defaults() {
        let config = SimulationConfig::from_json(r#"{ "clock_frequency": 2000.0 }"#).unwrap();
        assert_eq!(config.clock_frequency, 2000.0);
        assert_eq!(config.max_cycles, -1);
        assert!(!config.real_time);
        assert_eq!(config.max_iterations, 1000);
        assert_eq!(config.effective_time_step(), 1.0 / 2000.0);
        assert_eq!(config.cycle_limit(), None);
    }

    #[test]
    fn test_invalid_simulation_config_is_rejected() {
        assert!(SimulationConfig::from_json(r#"{ "clock_frequency": -5.0 }"#).is_err());
        assert!(SimulationConfig::from_json(r#"{ "max_cycles": -7 }"#).is_err());
        assert!(SimulationConfig::from_json(r#"{ "time_step": 0.0 }"#).is_err());
        assert!(SimulationConfig::from_json(r#"{ "max_iterations": 0 }"#).is_err());
    }

    #[test]
    fn test_state_export_file_round_trip() {
        let factory = CircuitFactory::new();
        let mut engine = factory
            .create_from_json("configs/counter_ram.json")
            .unwrap()
            .into_engine();
        for _ in 0..8 {
            engine.step().unwrap();
        }
        let exported = engine.export_state();

        let path = std::env::temp_dir().join(format!("rusty_sim_state_{}.json", std::process::id()));
        exported.save(&path).unwrap();
        let loaded = EngineStateExport::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.cycle, exported.cycle);
        assert_eq!(loaded.components, exported.components);
        assert_eq!(
            loaded.signals.keys().collect::<Vec<_>>(),
            exported.signals.keys().collect::<Vec<_>>()
        );
        assert_eq!(loaded.components["ram"].component_type, "static_ram");
        assert_eq!(loaded.components["counter"].properties["width"], 8);
    }
}

//! # Rusty Sim
//!
//! A cycle-stepped simulation engine for retro digital circuits.
//!
//! This library provides:
//! - Width-checked [`Signal`]s with bounded history and edge detection
//! - Named [`SimulationBus`]es with driver bookkeeping
//! - A [`SimulationEngine`] that runs components in real time or as fast as possible
//! - Breakpoints, watchpoints and a bounded trace log through [`debug`]
//! - Timed events, statistics, notifications and state export/import
//! - JSON circuit descriptions built by [`circuit_config::CircuitFactory`]

pub mod bus;
pub mod circuit_config;
pub mod component;
pub mod components;
pub mod config;
pub mod console;
pub mod debug;
pub mod engine;
pub mod error;
pub mod event;
pub mod notification;
pub mod signal;
pub mod stats;
pub mod types;

// Re-export commonly used items for easier importing
pub use bus::{BusHealth, BusState, SimulationBus};
pub use circuit_config::{Circuit, CircuitConfig, CircuitFactory};
pub use component::{BaseComponent, PortClass, PortSpec, SimComponent, StepContext};
pub use config::SimulationConfig;
pub use debug::{BreakpointCondition, EngineSnapshot, TraceEntry};
pub use engine::{EngineStateExport, SimulationEngine, SimulationState, ValidationReport};
pub use error::{ComponentError, SimError, SimResult};
pub use event::{EventContext, SimEvent};
pub use notification::SimNotification;
pub use signal::{Signal, SignalSample};
pub use stats::SimulationStatistics;
pub use types::{BitWidth, SimTime};

/// Install a `tracing` subscriber for the binary and examples.
///
/// `RUST_LOG` wins over `level` when set. Calling it twice is harmless.
///
/// ```rust,ignore
/// rusty_sim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

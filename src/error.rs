//! Error types shared across the engine.

use thiserror::Error;

use crate::engine::SimulationState;

/// Failure reported by a single component while stepping.
///
/// These never escalate: the engine logs them and keeps stepping the
/// remaining components.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("component '{component_id}' failed: {message}")]
pub struct ComponentError {
    pub component_id: String,
    pub message: String,
}

impl ComponentError {
    pub fn new(component_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the simulation engine and its configuration layer.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("cannot {operation} while the simulation is {state}")]
    InvalidState {
        operation: &'static str,
        state: SimulationState,
    },

    #[error("bit width {0} is outside 1..=64")]
    InvalidBitWidth(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed breakpoint condition '{condition}': {reason}")]
    InvalidBreakpoint { condition: String, reason: String },

    #[error("invalid watchpoint: {0}")]
    InvalidWatchpoint(String),

    #[error("component '{0}' is already registered")]
    DuplicateComponent(String),

    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    #[error("unknown component type '{0}'")]
    UnknownComponentType(String),

    #[error("bus '{0}' already exists")]
    DuplicateBus(String),

    #[error("unknown bus '{0}'")]
    UnknownBus(String),

    #[error("event handler for '{event_type}' failed: {message}")]
    EventHandler { event_type: String, message: String },

    #[error("could not start simulation driver: {0}")]
    DriverSpawn(String),

    #[error("simulation step panicked: {0}")]
    StepPanicked(String),

    #[error("engine lock poisoned: {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type SimResult<T> = Result<T, SimError>;

/// Best-effort text for a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

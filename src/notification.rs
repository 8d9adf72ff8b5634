//! Engine notifications delivered over unbounded tokio channels.
//!
//! Publishing never blocks: a subscriber whose receiver was dropped is
//! removed on the next publish.

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::engine::SimulationState;
use crate::stats::SimulationStatistics;
use crate::types::SimTime;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimNotification {
    StateChanged {
        from: SimulationState,
        to: SimulationState,
    },
    CycleCompleted {
        cycle: u64,
        simulation_time: SimTime,
    },
    ComponentStateChanged {
        component_id: String,
        active: bool,
    },
    Error {
        message: String,
        fatal: bool,
    },
    StatisticsUpdated(SimulationStatistics),
    BreakpointHit {
        id: u32,
        description: String,
        cycle: u64,
    },
    WatchpointHit {
        id: u32,
        signal: String,
        value: u64,
        cycle: u64,
    },
}

/// Fan-out to every subscriber in registration order.
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Vec<UnboundedSender<SimNotification>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel is unbounded and `CycleCompleted` arrives every cycle, so a
    /// receiver that is kept but never drained grows without limit. Drop it instead.
    pub fn subscribe(&mut self) -> UnboundedReceiver<SimNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, notification: SimNotification) {
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

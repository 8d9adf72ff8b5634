use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

use crate::bus::BusMap;
use crate::types::SimTime;

/// A timed occurrence consumed once `timestamp <= simulation_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub timestamp: SimTime,
    pub event_type: String,
    pub payload: Value,
}

/// Callback for one event type. Returning `Err` puts the engine into Error.
pub type EventHandler = Box<dyn FnMut(&SimEvent, &mut EventContext<'_>) -> Result<(), String> + Send>;

/// Timestamp-ordered queue. Equal timestamps keep insertion order.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<SimEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SimEvent) {
        let index = self.events.partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(index, event);
    }

    /// Remove and return every event due at `now`, earliest first.
    pub fn drain_due(&mut self, now: SimTime) -> Vec<SimEvent> {
        let due = self.events.partition_point(|e| e.timestamp <= now);
        self.events.drain(..due).collect()
    }

    pub fn peek(&self) -> Option<&SimEvent> {
        self.events.front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Move every event onto a time base starting at `origin`. Overdue events land at 0.
    pub fn rebase(&mut self, origin: SimTime) {
        for event in self.events.iter_mut() {
            event.timestamp = (event.timestamp - origin).max(0.0);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimEvent> {
        self.events.iter()
    }
}

/// What a handler may touch while an event fires.
pub struct EventContext<'a> {
    buses: &'a mut BusMap,
    simulation_time: SimTime,
    scheduled: Vec<SimEvent>,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(buses: &'a mut BusMap, simulation_time: SimTime) -> Self {
        EventContext {
            buses,
            simulation_time,
            scheduled: Vec::new(),
        }
    }

    pub fn simulation_time(&self) -> SimTime {
        self.simulation_time
    }

    pub fn read_signal(&self, qualified: &str) -> Option<u64> {
        let (bus, line) = qualified.split_once('.')?;
        self.buses.get(bus)?.read_line(line)
    }

    pub fn read_bus(&self, bus: &str) -> Option<u64> {
        self.buses.get(bus).map(|b| b.read_bus())
    }

    /// Force a line to a value outside driver bookkeeping. Returns `false` for unknown lines.
    pub fn write_signal(&mut self, qualified: &str, value: u64) -> bool {
        let Some((bus, line)) = qualified.split_once('.') else {
            return false;
        };
        match self.buses.get_mut(bus).and_then(|b| b.signal_mut(line)) {
            Some(signal) => {
                signal.set_value(value, self.simulation_time);
                true
            }
            None => false,
        }
    }

    /// Queue a follow-up event; it is enqueued after the current drain finishes.
    pub fn schedule(&mut self, delay: SimTime, event_type: impl Into<String>, payload: Value) {
        self.scheduled.push(SimEvent {
            timestamp: self.simulation_time + delay.max(0.0),
            event_type: event_type.into(),
            payload,
        });
    }

    pub(crate) fn into_scheduled(self) -> Vec<SimEvent> {
        self.scheduled
    }
}

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::types::{BitWidth, SimTime};

pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// One recorded write to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub timestamp: SimTime,
    pub value: u64,
}

/// A bit-width-bounded, timestamped value with bounded history.
///
/// The stored value is always masked to the signal width. Edge detection
/// compares the whole value against zero, so a multi-bit signal has a
/// rising edge whenever it leaves zero.
#[derive(Debug, Clone)]
pub struct Signal {
    name: String,
    bit_width: BitWidth,
    value: u64,
    previous_value: u64,
    timestamp: SimTime,
    history: VecDeque<SignalSample>,
    history_limit: usize,
}

impl Signal {
    pub fn new(name: impl Into<String>, bit_width: BitWidth) -> Self {
        Self::with_history_limit(name, bit_width, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(
        name: impl Into<String>,
        bit_width: BitWidth,
        history_limit: usize,
    ) -> Self {
        Signal {
            name: name.into(),
            bit_width,
            value: 0,
            previous_value: 0,
            timestamp: 0.0,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bit_width(&self) -> BitWidth {
        self.bit_width
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn previous_value(&self) -> u64 {
        self.previous_value
    }

    pub fn timestamp(&self) -> SimTime {
        self.timestamp
    }

    pub fn history(&self) -> &VecDeque<SignalSample> {
        &self.history
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn set_value(&mut self, value: u64, timestamp: SimTime) {
        self.previous_value = self.value;
        self.value = self.bit_width.apply(value);
        self.timestamp = timestamp;

        self.history.push_back(SignalSample {
            timestamp,
            value: self.value,
        });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Bits at or above the width read as `false`.
    pub fn get_bit(&self, bit: u32) -> bool {
        bit < self.bit_width.bits() && (self.value >> bit) & 1 == 1
    }

    /// Bits at or above the width are ignored but still recorded as a write.
    pub fn set_bit(&mut self, bit: u32, high: bool, timestamp: SimTime) {
        let mut next = self.value;
        if bit < self.bit_width.bits() {
            if high {
                next |= 1 << bit;
            } else {
                next &= !(1 << bit);
            }
        }
        self.set_value(next, timestamp);
    }

    pub fn has_changed(&self) -> bool {
        self.value != self.previous_value
    }

    pub fn is_rising_edge(&self) -> bool {
        self.previous_value == 0 && self.value != 0
    }

    pub fn is_falling_edge(&self) -> bool {
        self.previous_value != 0 && self.value == 0
    }

    /// Back to the power-on state: zero value, zero time, empty history.
    pub fn clear(&mut self) {
        self.value = 0;
        self.previous_value = 0;
        self.timestamp = 0.0;
        self.history.clear();
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub(crate) fn restore(
        &mut self,
        value: u64,
        previous_value: u64,
        timestamp: SimTime,
        history: &[SignalSample],
    ) {
        self.value = self.bit_width.apply(value);
        self.previous_value = self.bit_width.apply(previous_value);
        self.timestamp = timestamp;
        let skip = history.len().saturating_sub(self.history_limit);
        self.history = history
            .iter()
            .skip(skip)
            .map(|sample| SignalSample {
                timestamp: sample.timestamp,
                value: self.bit_width.apply(sample.value),
            })
            .collect();
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = (self.bit_width.bits() as usize).div_ceil(4);
        write!(
            f,
            "{} [{}] = 0x{:0digits$X}",
            self.name,
            self.bit_width,
            self.value,
            digits = digits
        )
    }
}

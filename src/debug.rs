//! Breakpoints, watchpoints and the execution trace.
//!
//! The engine hands the [`DebugInterface`] a value-copied [`EngineSnapshot`]
//! after every completed cycle. Breakpoint predicates only ever see that
//! copy, never live engine state.
//!
//! Breakpoints come in two flavours: arbitrary closures and parsed text
//! conditions of the form `<operand> <op> <number>`:
//!
//! ```text
//! cycle >= 1000
//! time > 0.5
//! data == 0x2A
//! control.write != 0
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::bus::BusMap;
use crate::error::{SimError, SimResult};
use crate::types::SimTime;

/// Copy of the observable engine state at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub cycle: u64,
    pub simulation_time: SimTime,
    /// Line values keyed by `bus.line`
    pub signals: BTreeMap<String, u64>,
    /// Bus values as returned by `read_bus`
    pub buses: BTreeMap<String, u64>,
}

impl EngineSnapshot {
    pub fn capture(cycle: u64, simulation_time: SimTime, buses: &BusMap) -> Self {
        let mut signals = BTreeMap::new();
        let mut values = BTreeMap::new();
        for (bus_name, bus) in buses {
            values.insert(bus_name.clone(), bus.read_bus());
            for (line, signal) in bus.signals() {
                signals.insert(format!("{}.{}", bus_name, line), signal.value());
            }
        }
        EngineSnapshot {
            cycle,
            simulation_time,
            signals,
            buses: values,
        }
    }

    pub fn signal(&self, name: &str) -> Option<u64> {
        self.signals.get(name).copied()
    }

    pub fn bus(&self, name: &str) -> Option<u64> {
        self.buses.get(name).copied()
    }
}

pub type BreakpointPredicate = Box<dyn Fn(&EngineSnapshot) -> bool + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    fn holds<T: PartialOrd>(&self, lhs: T, rhs: T) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Cycle,
    Time,
    Bus(String),
    Signal(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Cycle => write!(f, "cycle"),
            Operand::Time => write!(f, "time"),
            Operand::Bus(name) | Operand::Signal(name) => write!(f, "{}", name),
        }
    }
}

/// Parsed `<operand> <op> <number>` breakpoint condition.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointCondition {
    pub operand: Operand,
    pub op: CompareOp,
    pub threshold: f64,
    threshold_int: Option<u64>,
}

impl BreakpointCondition {
    pub fn parse(text: &str) -> SimResult<Self> {
        let fail = |reason: &str| SimError::InvalidBreakpoint {
            condition: text.to_string(),
            reason: reason.to_string(),
        };

        let start = text
            .find(['=', '!', '<', '>'])
            .ok_or_else(|| fail("missing comparison operator"))?;
        let rest = &text[start..];
        let op_len = if rest[1..].starts_with('=') { 2 } else { 1 };
        let op = CompareOp::parse(&rest[..op_len]).ok_or_else(|| fail("unknown comparison operator"))?;

        let lhs = text[..start].trim();
        let rhs = rest[op_len..].trim();
        if lhs.is_empty() {
            return Err(fail("missing operand"));
        }
        if rhs.is_empty() {
            return Err(fail("missing value"));
        }

        let operand = match lhs {
            "cycle" => Operand::Cycle,
            "time" => Operand::Time,
            name => {
                let valid = name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
                if !valid || name.starts_with('.') || name.ends_with('.') || name.matches('.').count() > 1 {
                    return Err(fail("operand must be cycle, time, a bus or a bus.line signal"));
                }
                if name.contains('.') {
                    Operand::Signal(name.to_string())
                } else {
                    Operand::Bus(name.to_string())
                }
            }
        };

        let threshold_int = parse_integer(rhs);
        let threshold = match threshold_int {
            Some(value) => value as f64,
            None if operand == Operand::Time => rhs.parse::<f64>().map_err(|_| fail("value is not a number"))?,
            None => return Err(fail("value is not an unsigned integer")),
        };
        if !threshold.is_finite() {
            return Err(fail("value is not finite"));
        }

        Ok(BreakpointCondition {
            operand,
            op,
            threshold,
            threshold_int,
        })
    }

    /// Unknown buses or lines never match.
    pub fn evaluate(&self, snapshot: &EngineSnapshot) -> bool {
        let actual = match &self.operand {
            Operand::Time => return self.op.holds(snapshot.simulation_time, self.threshold),
            Operand::Cycle => Some(snapshot.cycle),
            Operand::Bus(name) => snapshot.bus(name),
            Operand::Signal(name) => snapshot.signal(name),
        };
        match (actual, self.threshold_int) {
            (Some(actual), Some(threshold)) => self.op.holds(actual, threshold),
            _ => false,
        }
    }
}

impl fmt::Display for BreakpointCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.operand, self.op.symbol(), self.threshold)
    }
}

fn parse_integer(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse::<u64>().ok(),
    }
}

struct Breakpoint {
    id: u32,
    description: String,
    enabled: bool,
    hit_count: u64,
    predicate: BreakpointPredicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub id: u32,
    pub description: String,
    pub enabled: bool,
    pub hit_count: u64,
}

/// Edge-triggered: fires when the signal changed since the last evaluation
/// and now equals `trigger`.
#[derive(Debug, Clone)]
struct Watchpoint {
    id: u32,
    signal: String,
    trigger: u64,
    description: String,
    enabled: bool,
    hit_count: u64,
    last_value: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchpointInfo {
    pub id: u32,
    pub signal: String,
    pub trigger: u64,
    pub description: String,
    pub enabled: bool,
    pub hit_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: SimTime,
    pub component: String,
    pub action: String,
    pub payload: Value,
}

/// Capped ring buffer of trace entries.
#[derive(Debug, Clone)]
pub struct TraceLog {
    entries: VecDeque<TraceEntry>,
    limit: usize,
}

impl TraceLog {
    pub fn new(limit: usize) -> Self {
        TraceLog {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    /// The last `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<TraceEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Results of one evaluation pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DebugHits {
    pub breakpoints: Vec<(u32, String)>,
    pub watchpoints: Vec<(u32, String, u64)>,
}

impl DebugHits {
    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty() && self.watchpoints.is_empty()
    }
}

pub struct DebugInterface {
    breakpoints: Vec<Breakpoint>,
    watchpoints: Vec<Watchpoint>,
    next_breakpoint_id: u32,
    next_watchpoint_id: u32,
    trace: TraceLog,
}

impl DebugInterface {
    pub fn new(trace_limit: usize) -> Self {
        DebugInterface {
            breakpoints: Vec::new(),
            watchpoints: Vec::new(),
            next_breakpoint_id: 1,
            next_watchpoint_id: 1,
            trace: TraceLog::new(trace_limit),
        }
    }

    pub fn add_breakpoint(&mut self, predicate: BreakpointPredicate, description: impl Into<String>) -> u32 {
        let id = self.next_breakpoint_id;
        self.next_breakpoint_id += 1;
        self.breakpoints.push(Breakpoint {
            id,
            description: description.into(),
            enabled: true,
            hit_count: 0,
            predicate,
        });
        id
    }

    pub fn add_breakpoint_condition(&mut self, condition: &str) -> SimResult<u32> {
        let parsed = BreakpointCondition::parse(condition)?;
        let description = parsed.to_string();
        Ok(self.add_breakpoint(Box::new(move |snapshot| parsed.evaluate(snapshot)), description))
    }

    pub fn remove_breakpoint(&mut self, id: u32) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|bp| bp.id != id);
        self.breakpoints.len() != before
    }

    pub fn set_breakpoint_enabled(&mut self, id: u32, enabled: bool) -> bool {
        match self.breakpoints.iter_mut().find(|bp| bp.id == id) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn breakpoints(&self) -> Vec<BreakpointInfo> {
        self.breakpoints
            .iter()
            .map(|bp| BreakpointInfo {
                id: bp.id,
                description: bp.description.clone(),
                enabled: bp.enabled,
                hit_count: bp.hit_count,
            })
            .collect()
    }

    /// `baseline` is the signal's current value, if known.
    pub fn add_watchpoint(
        &mut self,
        signal: impl Into<String>,
        trigger: u64,
        description: impl Into<String>,
        baseline: Option<u64>,
    ) -> u32 {
        let id = self.next_watchpoint_id;
        self.next_watchpoint_id += 1;
        self.watchpoints.push(Watchpoint {
            id,
            signal: signal.into(),
            trigger,
            description: description.into(),
            enabled: true,
            hit_count: 0,
            last_value: baseline,
        });
        id
    }

    pub fn remove_watchpoint(&mut self, id: u32) -> bool {
        let before = self.watchpoints.len();
        self.watchpoints.retain(|wp| wp.id != id);
        self.watchpoints.len() != before
    }

    pub fn set_watchpoint_enabled(&mut self, id: u32, enabled: bool) -> bool {
        match self.watchpoints.iter_mut().find(|wp| wp.id == id) {
            Some(wp) => {
                wp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn watchpoints(&self) -> Vec<WatchpointInfo> {
        self.watchpoints
            .iter()
            .map(|wp| WatchpointInfo {
                id: wp.id,
                signal: wp.signal.clone(),
                trigger: wp.trigger,
                description: wp.description.clone(),
                enabled: wp.enabled,
                hit_count: wp.hit_count,
            })
            .collect()
    }

    /// Forget watchpoint baselines; the next evaluation compares against 0.
    pub fn reset_baselines(&mut self) {
        for wp in &mut self.watchpoints {
            wp.last_value = None;
        }
    }

    pub fn needs_snapshot(&self) -> bool {
        self.breakpoints.iter().any(|bp| bp.enabled) || !self.watchpoints.is_empty()
    }

    pub fn evaluate(&mut self, snapshot: &EngineSnapshot) -> DebugHits {
        let mut hits = DebugHits::default();

        for bp in self.breakpoints.iter_mut().filter(|bp| bp.enabled) {
            if (bp.predicate)(snapshot) {
                bp.hit_count += 1;
                hits.breakpoints.push((bp.id, bp.description.clone()));
            }
        }

        for wp in &mut self.watchpoints {
            let Some(current) = snapshot.signal(&wp.signal) else {
                continue;
            };
            let previous = wp.last_value.unwrap_or(0);
            wp.last_value = Some(current);
            if wp.enabled && current != previous && current == wp.trigger {
                wp.hit_count += 1;
                hits.watchpoints.push((wp.id, wp.signal.clone(), current));
            }
        }

        hits
    }

    pub fn log_trace(&mut self, entry: TraceEntry) {
        self.trace.push(entry);
    }

    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut TraceLog {
        &mut self.trace
    }

    pub fn recent_traces(&self, count: usize) -> Vec<TraceEntry> {
        self.trace.recent(count)
    }
}

impl fmt::Debug for DebugInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugInterface")
            .field("breakpoints", &self.breakpoints())
            .field("watchpoints", &self.watchpoints)
            .field("trace_len", &self.trace.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cycle: u64, signals: &[(&str, u64)]) -> EngineSnapshot {
        let mut snap = EngineSnapshot {
            cycle,
            simulation_time: cycle as f64 * 0.5,
            signals: BTreeMap::new(),
            buses: BTreeMap::new(),
        };
        for (name, value) in signals {
            snap.signals.insert(name.to_string(), *value);
            let bus = name.split('.').next().unwrap();
            snap.buses.entry(bus.to_string()).or_insert(*value);
        }
        snap
    }

    #[test]
    fn test_parse_conditions() {
        let c = BreakpointCondition::parse("cycle >= 10").unwrap();
        assert_eq!(c.operand, Operand::Cycle);
        assert_eq!(c.op, CompareOp::Ge);

        let c = BreakpointCondition::parse("data.D==0x2A").unwrap();
        assert_eq!(c.operand, Operand::Signal("data.D".into()));
        assert_eq!(c.threshold, 42.0);

        let c = BreakpointCondition::parse("time > 0.25").unwrap();
        assert_eq!(c.operand, Operand::Time);

        assert!(matches!(
            BreakpointCondition::parse("address < 4").unwrap().operand,
            Operand::Bus(_)
        ));
    }

    #[test]
    fn test_malformed_conditions_are_rejected() {
        for text in [
            "",
            "cycle",
            "cycle = 5",
            "== 5",
            "cycle ==",
            "cycle == banana",
            "cycle == 1.5",
            "cycle => 3",
            "a.b.c == 1",
            "data- == 1",
            "time > inf",
        ] {
            assert!(
                matches!(BreakpointCondition::parse(text), Err(SimError::InvalidBreakpoint { .. })),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_condition_evaluation() {
        let snap = snapshot(6, &[("data.D", 0x2A)]);
        assert!(BreakpointCondition::parse("cycle == 6").unwrap().evaluate(&snap));
        assert!(BreakpointCondition::parse("time >= 3").unwrap().evaluate(&snap));
        assert!(BreakpointCondition::parse("data == 42").unwrap().evaluate(&snap));
        assert!(BreakpointCondition::parse("data.D != 0").unwrap().evaluate(&snap));
        assert!(!BreakpointCondition::parse("data.Q == 0").unwrap().evaluate(&snap));
        assert!(!BreakpointCondition::parse("cycle < 6").unwrap().evaluate(&snap));
    }

    #[test]
    fn test_breakpoints() {
        let mut debug = DebugInterface::new(10);
        let id = debug.add_breakpoint(Box::new(|s| s.cycle == 3), "third cycle");
        assert!(debug.needs_snapshot());

        assert!(debug.evaluate(&snapshot(2, &[])).is_empty());
        let hits = debug.evaluate(&snapshot(3, &[]));
        assert_eq!(hits.breakpoints, vec![(id, "third cycle".to_string())]);
        assert_eq!(debug.breakpoints()[0].hit_count, 1);

        assert!(debug.set_breakpoint_enabled(id, false));
        assert!(!debug.needs_snapshot());
        assert!(debug.evaluate(&snapshot(3, &[])).is_empty());
        assert!(debug.remove_breakpoint(id));
        assert!(!debug.remove_breakpoint(id));
    }

    #[test]
    fn test_watchpoint_is_edge_triggered() {
        let mut debug = DebugInterface::new(10);
        let id = debug.add_watchpoint("data.D", 5, "five", None);

        assert!(debug.evaluate(&snapshot(1, &[("data.D", 5)])).watchpoints.len() == 1);
        // Still 5: no change, no hit.
        assert!(debug.evaluate(&snapshot(2, &[("data.D", 5)])).is_empty());
        assert!(debug.evaluate(&snapshot(3, &[("data.D", 1)])).is_empty());
        let hits = debug.evaluate(&snapshot(4, &[("data.D", 5)]));
        assert_eq!(hits.watchpoints, vec![(id, "data.D".to_string(), 5)]);
        assert_eq!(debug.watchpoints()[0].hit_count, 2);
    }

    #[test]
    fn test_watchpoint_baseline() {
        let mut debug = DebugInterface::new(10);
        debug.add_watchpoint("data.D", 5, "five", Some(5));
        assert!(debug.evaluate(&snapshot(1, &[("data.D", 5)])).is_empty());

        debug.reset_baselines();
        assert_eq!(debug.evaluate(&snapshot(1, &[("data.D", 5)])).watchpoints.len(), 1);
    }

    #[test]
    fn test_trace_ring_buffer() {
        let mut log = TraceLog::new(3);
        for i in 0..5 {
            log.push(TraceEntry {
                timestamp: i as f64,
                component: "c".into(),
                action: format!("a{}", i),
                payload: Value::Null,
            });
        }
        assert_eq!(log.len(), 3);
        let recent: Vec<_> = log.recent(2).into_iter().map(|e| e.action).collect();
        assert_eq!(recent, vec!["a3", "a4"]);
        assert_eq!(log.recent(10).len(), 3);

        log.set_limit(1);
        assert_eq!(log.recent(5)[0].action, "a4");
    }
}

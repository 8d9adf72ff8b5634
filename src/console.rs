//! # Console Monitor
//!
//! Terminal front end for a running [`SimulationEngine`]: live statistics,
//! bus values, recent trace entries and engine notifications.
//!
//! ## Keys
//! - `space` pause / resume
//! - `n` single step
//! - `r` reset
//! - `s` start / stop
//! - `h` toggle help
//! - `q` / `Esc` quit

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::engine::{SimulationEngine, SimulationState};
use crate::error::{SimError, SimResult};
use crate::notification::SimNotification;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub refresh_rate_ms: u64,
    pub trace_rows: usize,
    pub notification_rows: usize,
    /// Leave the console once the engine stops on its own
    pub exit_on_stop: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 100,
            trace_rows: 12,
            notification_rows: 6,
            exit_on_stop: false,
        }
    }
}

pub struct ConsoleApp {
    engine: Arc<Mutex<SimulationEngine>>,
    notifications: UnboundedReceiver<SimNotification>,
    recent: VecDeque<String>,
    config: ConsoleConfig,
    running: bool,
    show_help: bool,
    status: String,
}

impl ConsoleApp {
    pub fn new(engine: Arc<Mutex<SimulationEngine>>, config: ConsoleConfig) -> SimResult<Self> {
        let notifications = lock(&engine)?.subscribe();
        Ok(Self {
            engine,
            notifications,
            recent: VecDeque::new(),
            config,
            running: false,
            show_help: false,
            status: "ready".to_string(),
        })
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        enable_raw_mode().map_err(|e| format!("Failed to enable raw mode: {}", e))?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)
            .map_err(|e| format!("Failed to enter alternate screen: {}", e))?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        self.running = true;
        let refresh = Duration::from_millis(self.config.refresh_rate_ms);
        let mut last_draw = Instant::now() - refresh;

        while self.running {
            if event::poll(Duration::from_millis(10))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code);
                    }
                }
            }

            self.drain_notifications();

            if last_draw.elapsed() >= refresh {
                terminal.draw(|f| self.draw_ui(f))?;
                last_draw = Instant::now();
            }

            if self.config.exit_on_stop {
                let stopped = lock(&self.engine)
                    .map(|engine| engine.state() == SimulationState::Stopped)
                    .unwrap_or(true);
                if stopped {
                    terminal.draw(|f| self.draw_ui(f))?;
                    std::thread::sleep(Duration::from_millis(500));
                    break;
                }
            }
        }

        disable_raw_mode().map_err(|e| format!("Failed to disable raw mode: {}", e))?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)
            .map_err(|e| format!("Failed to leave alternate screen: {}", e))?;
        terminal
            .show_cursor()
            .map_err(|e| format!("Failed to show cursor: {}", e))?;
        Ok(())
    }

    fn handle_key(&mut self, key: KeyCode) {
        let result = match key {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.running = false;
                self.with_engine(|engine| engine.stop()).map(|_| "quit")
            }
            KeyCode::Char('h') | KeyCode::Char('H') => {
                self.show_help = !self.show_help;
                Ok("help toggled")
            }
            KeyCode::Char(' ') => self.with_engine(|engine| match engine.state() {
                SimulationState::Running => engine.pause().map(|_| "paused"),
                _ => engine.resume().map(|_| "resumed"),
            }),
            KeyCode::Char('n') | KeyCode::Char('N') => {
                self.with_engine(|engine| engine.step().map(|_| "stepped"))
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.with_engine(|engine| engine.reset().map(|_| "reset"))
            }
            KeyCode::Char('s') | KeyCode::Char('S') => self.with_engine(|engine| match engine.state() {
                SimulationState::Stopped | SimulationState::Error => engine.start().map(|_| "started"),
                _ => engine.stop().map(|_| "stopped"),
            }),
            _ => return,
        };

        match result {
            Ok(message) => {
                debug!(action = message, "console command");
                self.status = message.to_string();
            }
            Err(err) => {
                warn!(error = %err, "console command failed");
                self.status = err.to_string();
            }
        }
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut SimulationEngine) -> SimResult<T>) -> SimResult<T> {
        let mut engine = lock(&self.engine)?;
        f(&mut engine)
    }

    fn drain_notifications(&mut self) {
        while let Ok(notification) = self.notifications.try_recv() {
            let line = match notification {
                SimNotification::StateChanged { from, to } => format!("state {} -> {}", from, to),
                SimNotification::BreakpointHit { id, description, cycle } => {
                    format!("breakpoint #{} '{}' at cycle {}", id, description, cycle)
                }
                SimNotification::WatchpointHit { id, signal, value, cycle } => {
                    format!("watchpoint #{} {} = {:#x} at cycle {}", id, signal, value, cycle)
                }
                SimNotification::Error { message, fatal } => {
                    format!("{}: {}", if fatal { "FATAL" } else { "error" }, message)
                }
                _ => continue,
            };
            self.recent.push_back(line);
            while self.recent.len() > self.config.notification_rows {
                self.recent.pop_front();
            }
        }
    }

    fn draw_ui(&self, f: &mut Frame) {
        let size = f.size();
        if self.show_help {
            self.draw_help_screen(f, size);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),
                Constraint::Min(8),
                Constraint::Length(3),
            ])
            .split(size);

        let title = Paragraph::new(vec![
            Line::from(vec![Span::styled(
                "rusty_sim console",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )]),
            Line::from(vec![
                Span::styled("space", Style::default().fg(Color::Yellow)),
                Span::raw("=pause/resume  "),
                Span::styled("n", Style::default().fg(Color::Yellow)),
                Span::raw("=step  "),
                Span::styled("r", Style::default().fg(Color::Yellow)),
                Span::raw("=reset  "),
                Span::styled("s", Style::default().fg(Color::Yellow)),
                Span::raw("=start/stop  "),
                Span::styled("h", Style::default().fg(Color::Yellow)),
                Span::raw("=help  "),
                Span::styled("q", Style::default().fg(Color::Yellow)),
                Span::raw("=quit"),
            ]),
        ])
        .block(Block::default().borders(Borders::ALL).title("rusty_sim"))
        .wrap(Wrap { trim: true });
        f.render_widget(title, chunks[0]);

        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(chunks[1]);
        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(10), Constraint::Min(4)])
            .split(panes[0]);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(4),
                Constraint::Length(self.config.notification_rows as u16 + 2),
            ])
            .split(panes[1]);

        match lock(&self.engine) {
            Ok(engine) => {
                self.draw_statistics(f, left[0], &engine);
                self.draw_buses(f, left[1], &engine);
                self.draw_trace(f, right[0], &engine);
            }
            Err(err) => {
                let message = Paragraph::new(err.to_string())
                    .block(Block::default().borders(Borders::ALL).title("Engine"));
                f.render_widget(message, chunks[1]);
            }
        }
        self.draw_notifications(f, right[1]);

        let status = Paragraph::new(self.status.as_str())
            .style(Style::default().fg(Color::White))
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[2]);
    }

    fn draw_statistics(&self, f: &mut Frame, area: Rect, engine: &SimulationEngine) {
        let stats = engine.statistics();
        let state_color = match stats.state {
            SimulationState::Running => Color::Green,
            SimulationState::Paused | SimulationState::Step => Color::Yellow,
            SimulationState::Stopped => Color::Gray,
            SimulationState::Error => Color::Red,
        };
        let lines = vec![
            Line::from(vec![
                Span::raw("State:     "),
                Span::styled(stats.state.to_string(), Style::default().fg(state_color)),
            ]),
            Line::from(format!("Cycle:     {}", stats.current_cycle)),
            Line::from(format!("Sim time:  {:.6} s", stats.simulation_time)),
            Line::from(format!("Rate:      {:.0} cycles/s", stats.cycles_per_second)),
            Line::from(format!("Target:    {:.0} Hz", stats.target_frequency)),
            Line::from(format!("Ratio:     {:.3}", stats.simulation_ratio)),
            Line::from(format!(
                "Parts:     {} components, {} buses, {} signals",
                stats.component_count, stats.bus_count, stats.signal_count
            )),
            Line::from(format!("Events:    {}", stats.event_queue_size)),
        ];
        let widget = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Statistics"));
        f.render_widget(widget, area);
    }

    fn draw_buses(&self, f: &mut Frame, area: Rect, engine: &SimulationEngine) {
        let mut lines = Vec::new();
        for name in engine.bus_names() {
            let Some(bus) = engine.bus_state(&name) else {
                continue;
            };
            lines.push(Line::from(vec![
                Span::styled(format!("{:<8}", name), Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(format!(" {:>2}b  {:#06x}", bus.bit_width, bus.value)),
            ]));
            for (line, state) in &bus.lines {
                lines.push(Line::from(format!("  .{:<6} {:#x}", line, state.value)));
            }
        }
        let widget = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Buses"));
        f.render_widget(widget, area);
    }

    fn draw_trace(&self, f: &mut Frame, area: Rect, engine: &SimulationEngine) {
        let lines: Vec<Line> = engine
            .recent_traces(self.config.trace_rows)
            .into_iter()
            .map(|entry| {
                Line::from(vec![
                    Span::styled(format!("{:>10.6} ", entry.timestamp), Style::default().fg(Color::DarkGray)),
                    Span::styled(format!("{:<8} ", entry.component), Style::default().fg(Color::Cyan)),
                    Span::raw(format!("{} {}", entry.action, entry.payload)),
                ])
            })
            .collect();
        let widget = Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Trace"));
        f.render_widget(widget, area);
    }

    fn draw_notifications(&self, f: &mut Frame, area: Rect) {
        let lines: Vec<Line> = self.recent.iter().map(|s| Line::from(s.as_str())).collect();
        let widget = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Notifications"));
        f.render_widget(widget, area);
    }

    fn draw_help_screen(&self, f: &mut Frame, area: Rect) {
        let key = |k: &'static str, what: &'static str| {
            Line::from(vec![
                Span::styled(format!("  {:<8}", k), Style::default().fg(Color::Yellow)),
                Span::raw(what),
            ])
        };
        let help = vec![
            Line::from(vec![Span::styled(
                "rusty_sim console help",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )]),
            Line::from(""),
            key("space", "pause or resume the running simulation"),
            key("n", "execute exactly one cycle (from stopped or paused)"),
            key("r", "stop and reset counters, lines and components"),
            key("s", "start when stopped, stop otherwise"),
            key("h", "show or hide this help"),
            key("q", "stop the engine and quit"),
            Line::from(""),
            Line::from("Press h to return to the main view."),
        ];
        let widget = Paragraph::new(help)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Help"));
        f.render_widget(widget, area);
    }
}

fn lock(engine: &Mutex<SimulationEngine>) -> SimResult<MutexGuard<'_, SimulationEngine>> {
    engine
        .lock()
        .map_err(|err| SimError::LockPoisoned(err.to_string()))
}

//! Background drivers.
//!
//! Free-run mode is a plain named thread that loops cycles back to back.
//! Real-time mode runs a current-thread tokio runtime on its own thread and
//! fires one cycle per interval tick. Both take the core lock once per cycle,
//! so pause and stop always land between cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error};

use super::machine::{CycleOutcome, EngineCore, Pacing};
use crate::error::{SimError, SimResult};

const PAUSE_POLL: Duration = Duration::from_millis(2);

/// Cooperative flags shared between the engine handle and its driver.
#[derive(Debug, Default)]
pub(crate) struct DriverControl {
    halt: AtomicBool,
    paused: AtomicBool,
    wake: Notify,
}

impl DriverControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.halt.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn request_halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        if !paused {
            self.wake.notify_one();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

pub(crate) fn spawn(
    core: Arc<Mutex<EngineCore>>,
    control: Arc<DriverControl>,
    real_time: bool,
    tick: Duration,
    batch: u32,
) -> SimResult<JoinHandle<()>> {
    let builder = thread::Builder::new();
    let handle = if real_time {
        builder
            .name("rusty-sim-realtime".into())
            .spawn(move || real_time_loop(core, control, tick))?
    } else {
        builder
            .name("rusty-sim-free-run".into())
            .spawn(move || free_run_loop(core, control, batch))?
    };
    Ok(handle)
}

fn locked_cycle(core: &Mutex<EngineCore>, pacing: Pacing) -> CycleOutcome {
    match core.lock() {
        Ok(mut core) => core.driver_cycle(pacing),
        Err(err) => {
            error!(error = %SimError::LockPoisoned(err.to_string()), "driver cannot reach engine");
            CycleOutcome::Failed
        }
    }
}

fn free_run_loop(core: Arc<Mutex<EngineCore>>, control: Arc<DriverControl>, batch: u32) {
    debug!("free-run driver started");
    let mut since_yield = 0u32;

    while !control.halted() {
        if control.is_paused() {
            thread::sleep(PAUSE_POLL);
            continue;
        }

        match locked_cycle(&core, Pacing::Fixed) {
            CycleOutcome::Continue => {
                since_yield += 1;
                if since_yield >= batch {
                    since_yield = 0;
                    thread::yield_now();
                }
            }
            CycleOutcome::Idle => thread::sleep(PAUSE_POLL),
            CycleOutcome::Paused => {}
            CycleOutcome::Stopped | CycleOutcome::Failed => break,
        }
    }
    debug!("free-run driver exited");
}

fn real_time_loop(core: Arc<Mutex<EngineCore>>, control: Arc<DriverControl>, period: Duration) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            if let Ok(mut core) = core.lock() {
                core.fail(SimError::Io(err));
            }
            return;
        }
    };

    debug!(?period, "real-time driver started");
    runtime.block_on(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !control.halted() {
            if control.is_paused() {
                control.wake.notified().await;
                ticker.reset();
                continue;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = control.wake.notified() => continue,
            }

            match locked_cycle(&core, Pacing::WallClock) {
                CycleOutcome::Continue | CycleOutcome::Idle | CycleOutcome::Paused => {}
                CycleOutcome::Stopped | CycleOutcome::Failed => break,
            }
        }
    });
    debug!("real-time driver exited");
}

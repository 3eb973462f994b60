//! Driver thread: owns the pipeline and ticks it at a fixed rate.
//!
//! Everything that touches capture or transports happens on this one thread.
//! Other threads steer it with [`DriverCommand`]s over an `mpsc` channel and
//! read [`DriverStatus`] through a shared mutex.
//!
//! Ticks are paced against a monotonic deadline with `recv_timeout`, so a
//! command wakes the loop immediately without disturbing the cadence. While
//! resources cannot be acquired the driver throttles to the slower
//! `throttleTimer` interval. Once running, transports that closed after a
//! failed write (or never connected) are retried at that same interval.

use crate::Color;
use crate::pipeline::AmbientPipeline;
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ── Commands ─────────────────────────────────────────────────────────

/// Session events delivered to the driver thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverCommand {
    /// Session became visible (start, unlock, console connect): start ticking.
    Attach,
    /// Session went away (lock, console disconnect): blank the LEDs, release everything.
    Detach,
    /// Displays were added, removed or changed mode: detach and attach again.
    DisplayChange,
    /// Blank the LEDs, release everything and end the thread.
    Shutdown,
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    /// Detached; no ticks.
    Stopped,
    /// Waiting for capture or an output, polling at the throttle interval.
    Throttled,
    /// Sampling at the frame rate.
    Running,
}

/// Shared status the HTTP server reads.
#[derive(Clone, Debug, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct DriverStatus {
    pub state: DriverState,
    pub capture_acquired: bool,
    pub serial_open: bool,
    /// Connected OPC servers.
    pub opc_connections: usize,
    pub led_count: usize,
    /// Frames sampled since capture was acquired.
    pub frames: u64,
    /// Achieved rate since acquisition, or over the last session.
    pub frame_rate: Option<f64>,
    /// Gamma-corrected color of every LED, in strand order.
    #[serde(skip)]
    pub leds: Vec<Color>,
    pub version: String,
}

impl DriverStatus {
    pub fn new(led_count: usize) -> Self {
        Self {
            state: DriverState::Stopped,
            capture_acquired: false,
            serial_open: false,
            opc_connections: 0,
            led_count,
            frames: 0,
            frame_rate: None,
            leds: vec![Color::BLACK; led_count],
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub type SharedStatus = Arc<Mutex<DriverStatus>>;

/// Lock the status, ignoring poisoning; every writer leaves it consistent.
pub fn lock_status(status: &SharedStatus) -> MutexGuard<'_, DriverStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Schedule ─────────────────────────────────────────────────────────

/// Fixed-interval deadlines that skip a backlog instead of bursting to catch up.
#[derive(Clone, Copy, Debug)]
pub struct TickSchedule {
    next: Instant,
    interval: Duration,
}

impl TickSchedule {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            next: now + interval,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_tick(&self) -> Instant {
        self.next
    }

    /// Time left before the next tick is due.
    pub fn wait(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }

    /// Move to the following deadline after a tick that started at `started`.
    ///
    /// More than two intervals behind means ticks overran; the cadence then
    /// restarts from `started` and the effective rate simply drops.
    pub fn advance(&mut self, started: Instant) {
        if started > self.next + 2 * self.interval {
            self.next = started;
        }
        self.next += self.interval;
    }

    /// Start over with a new interval, first tick one interval from `now`.
    pub fn restart(&mut self, interval: Duration, now: Instant) {
        self.interval = interval;
        self.next = now + interval;
    }
}

// ── Driver ───────────────────────────────────────────────────────────

pub struct Driver {
    pipeline: AmbientPipeline,
    status: SharedStatus,
    attached: bool,
    throttled: bool,
    frame_interval: Duration,
    throttle_interval: Duration,
    schedule: TickSchedule,
    /// Earliest time closed transports may be retried while running.
    reconnect_due: Instant,
}

impl Driver {
    pub fn new(pipeline: AmbientPipeline, status: SharedStatus) -> Self {
        let frame_interval = pipeline.settings().frame_interval();
        let throttle_interval = pipeline.settings().throttle_interval();

        Self {
            pipeline,
            status,
            attached: false,
            throttled: false,
            frame_interval,
            throttle_interval,
            schedule: TickSchedule::new(frame_interval, Instant::now()),
            reconnect_due: Instant::now(),
        }
    }

    pub fn state(&self) -> DriverState {
        match (self.attached, self.throttled) {
            (false, _) => DriverState::Stopped,
            (true, true) => DriverState::Throttled,
            (true, false) => DriverState::Running,
        }
    }

    pub fn pipeline(&self) -> &AmbientPipeline {
        &self.pipeline
    }

    pub fn schedule(&self) -> &TickSchedule {
        &self.schedule
    }

    fn current_interval(&self) -> Duration {
        if self.throttled {
            self.throttle_interval
        } else {
            self.frame_interval
        }
    }

    /// Start ticking at the frame rate.
    pub fn attach(&mut self) {
        if !self.attached {
            info!("Attached, sampling every {:?}", self.frame_interval);
        }
        self.attached = true;
        self.throttled = false;
        self.schedule.restart(self.frame_interval, Instant::now());
        self.publish();
    }

    /// Stop ticking, blank the LEDs and release capture and transports.
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }

        self.attached = false;
        self.pipeline.send_all_off();
        self.pipeline.free_resources();
        self.pipeline.close_outputs();
        info!("Detached");
        self.publish();
    }

    pub fn handle(&mut self, command: DriverCommand) {
        debug!("Command {command:?}");
        match command {
            DriverCommand::Attach => self.attach(),
            DriverCommand::Detach => self.detach(),
            DriverCommand::DisplayChange => {
                self.detach();
                self.attach();
            }
            DriverCommand::Shutdown => self.detach(),
        }
    }

    /// One capture, render and send cycle.
    pub fn tick(&mut self) {
        let started = Instant::now();
        let was_throttled = self.throttled;

        if !self.pipeline.is_acquired() {
            if self.pipeline.open_outputs() && self.pipeline.create_resources() {
                self.resume();
            } else if self.throttle() {
                self.pipeline.clear_serial();
            }
            self.reconnect_due = started + self.throttle_interval;
        } else if self.pipeline.has_closed_outputs() && started >= self.reconnect_due {
            // Serial discovery may block for up to the configured timeout.
            self.pipeline.reopen_closed_outputs();
            self.reconnect_due = started + self.throttle_interval;
        }

        self.pipeline.take_samples();
        self.pipeline.render();
        self.pipeline.send();

        if self.throttled == was_throttled {
            self.schedule.advance(started);
        } else {
            self.schedule.restart(self.current_interval(), Instant::now());
        }

        self.publish();
    }

    /// Switch to the slow interval. True if this call changed the mode.
    fn throttle(&mut self) -> bool {
        if self.throttled {
            return false;
        }
        self.throttled = true;
        info!("Capture or outputs unavailable, retrying every {:?}", self.throttle_interval);
        true
    }

    fn resume(&mut self) {
        if self.throttled {
            self.throttled = false;
            info!("Resources acquired, resuming at {:?}", self.frame_interval);
        }
    }

    fn publish(&self) {
        let mut status = lock_status(&self.status);
        status.state = self.state();
        status.capture_acquired = self.pipeline.is_acquired();
        status.serial_open = self.pipeline.serial_open();
        status.opc_connections = self.pipeline.opc_open_count();
        status.frames = self.pipeline.frames();
        status.frame_rate = self.pipeline.frame_rate();
        status.leds = self.pipeline.led_colors();
    }

    /// Run until [`DriverCommand::Shutdown`] arrives or every sender is gone.
    pub fn run(mut self, commands: Receiver<DriverCommand>) {
        info!("Driver thread started");
        self.attach();

        loop {
            let received = if self.attached {
                commands.recv_timeout(self.schedule.wait(Instant::now()))
            } else {
                commands.recv().map_err(|_| RecvTimeoutError::Disconnected)
            };

            match received {
                Ok(DriverCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => self.tick(),
            }
        }

        self.detach();
        info!("Driver thread stopped");
    }
}

/// Start the driver on its own thread.
pub fn spawn(
    pipeline: AmbientPipeline,
    status: SharedStatus,
) -> std::io::Result<(Sender<DriverCommand>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel();
    let driver = Driver::new(pipeline, status);
    let handle = thread::Builder::new()
        .name("driver".to_string())
        .spawn(move || driver.run(rx))?;
    Ok((tx, handle))
}

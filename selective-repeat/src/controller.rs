//! Simulation controller: run/stop/reset lifecycle over the engines.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  start(config) / stop() / reset()      subscribe() ─▶ watch<bool>
//!      ▼
//!  Simulation
//!    ├── SimulationState   (window pointers, in-flight, buffers)
//!    ├── TimerService      (virtual clock, pending events)
//!    ├── ModeResolver      (fault decisions, trigger ledger)
//!    └── Journal           (trace, stats, log sink, timeline layout)
//!      │
//!      │ step(): pop next event, lend an EngineCtx to
//!      ▼
//!  sr_sender::{send, on_ack, on_timeout}   sr_receiver::receive
//! ```
//!
//! # Two ways to drive a run
//!
//! **Fast-forward**, deterministic and without sleeping:
//! ```ignore
//! let mut sim = Simulation::new();
//! sim.start(SimConfig::new(8, 4).with_seed(1))?;
//! let status = sim.run_to_completion();
//! ```
//!
//! **Paced**, replaying the timeline in wall-clock time for live viewing:
//! ```ignore
//! sim.start(config)?;
//! let status = sim.run_paced(0.5).await; // twice as fast as simulated time
//! ```
//!
//! Stopping cancels every retransmit timer immediately.  Frames and ACKs
//! already on the channel still fire later, but they carry the epoch of the
//! run that sent them and are ignored once that run is over.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::SimConfig;
use crate::error::SimError;
use crate::mode::ModeResolver;
use crate::sink::{LogSink, Renderer};
use crate::sr_receiver;
use crate::sr_sender;
use crate::state::{EngineCtx, RunStatus, SimEvent, SimulationState, Tagged};
use crate::timer::TimerService;
use crate::trace::{Journal, ProtocolEvent, SimStats, TraceRecord};

/// Slowest replay `run_paced` will perform, relative to simulated time.
pub const MAX_PACE_FACTOR: f64 = 1000.0;

fn pace_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        return 0.0;
    }
    factor.clamp(0.0, MAX_PACE_FACTOR)
}

/// `gap * factor`, saturating instead of panicking on overflow.
fn scaled(gap: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(gap.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Owner of all state for one simulated sender/receiver pair.
pub struct Simulation {
    config: SimConfig,
    state: SimulationState,
    timers: TimerService<Tagged>,
    resolver: ModeResolver,
    journal: Journal,
    running_tx: watch::Sender<bool>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// A simulation that logs through the `log` facade and draws nothing.
    pub fn new() -> Self {
        Self::with_journal(Journal::default())
    }

    /// A simulation reporting to the given sinks.
    pub fn with_sinks(log: Box<dyn LogSink + Send>, renderer: Box<dyn Renderer + Send>) -> Self {
        Self::with_journal(Journal::new(log, renderer))
    }

    fn with_journal(journal: Journal) -> Self {
        let (running_tx, _) = watch::channel(false);
        Self {
            config: SimConfig::default(),
            state: SimulationState::default(),
            timers: TimerService::new(),
            resolver: ModeResolver::seeded(0),
            journal,
            running_tx,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Begin a new run.
    ///
    /// The configuration is clamped into range first.  Fails with
    /// [`SimError::AlreadyRunning`] while a run is in progress; the running
    /// simulation is left untouched.
    pub fn start(&mut self, config: SimConfig) -> Result<(), SimError> {
        if self.is_running() {
            log::warn!("[sim] start rejected: already running");
            return Err(SimError::AlreadyRunning);
        }

        let config = config.normalized();
        self.resolver = match config.seed {
            Some(seed) => ModeResolver::seeded(seed),
            None => ModeResolver::from_entropy(),
        };
        self.state = SimulationState::new(
            config.total_frames,
            config.window_size,
            self.state.epoch + 1,
            self.timers.now(),
        );
        self.state.status = RunStatus::Running;
        self.journal.begin(config.total_frames);
        self.config = config;
        self.running_tx.send_replace(true);

        log::debug!(
            "[sim] run {} started: {} frames, window {}, modes {:?}",
            self.state.epoch,
            self.config.total_frames,
            self.config.window_size,
            self.config.modes
        );

        let mut ctx = self.ctx();
        ctx.emit(ProtocolEvent::Started {
            total_frames: ctx.state.total_frames,
            window_size: ctx.state.window_size,
        });
        sr_sender::fill_window(&mut ctx);
        Ok(())
    }

    /// Stop the current run.
    ///
    /// Cancels every retransmit timer and marks the run `Stopped`; the trace
    /// and counters stay readable until the next `start` or `reset`.
    /// Returns `false` if no run was in progress.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        for frame in std::mem::take(&mut self.state.in_flight).into_values() {
            self.timers.cancel(frame.retransmit_timer);
        }
        self.state.status = RunStatus::Stopped;
        self.ctx().emit(ProtocolEvent::Stopped);
        self.running_tx.send_replace(false);
        log::debug!("[sim] run {} stopped", self.state.epoch);
        true
    }

    /// Stop any run and discard all of its state, trace and counters.
    pub fn reset(&mut self) {
        self.stop();
        self.state = SimulationState::idle(self.state.epoch);
        self.journal.clear();
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Observe the running flag.  It flips to `false` exactly once per run,
    /// on completion or stop.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.running_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Driving the timeline
    // -----------------------------------------------------------------------

    /// Fire the next pending event.  Returns `false` when nothing is pending.
    pub fn step(&mut self) -> bool {
        let Some(fired) = self.timers.pop_next() else {
            return false;
        };
        self.dispatch(fired.event);
        true
    }

    /// Fast-forward until the run completes or nothing is left to fire.
    pub fn run_to_completion(&mut self) -> RunStatus {
        while self.is_running() && self.step() {}
        self.status()
    }

    /// Fire every event due within `elapsed` of the run's start.
    pub fn run_for(&mut self, elapsed: Duration) -> RunStatus {
        let deadline = self.state.started_at + elapsed;
        while self.is_running() {
            match self.timers.next_deadline() {
                Some(at) if at <= deadline => {
                    self.step();
                }
                _ => break,
            }
        }
        self.status()
    }

    /// Replay the run in wall-clock time, each simulated gap scaled by
    /// `factor` (1.0 = real time, 0.0 = no sleeping).  Negative and NaN
    /// factors count as 0.0; factors above [`MAX_PACE_FACTOR`] are capped.
    pub async fn run_paced(&mut self, factor: f64) -> RunStatus {
        self.run_paced_until(factor, std::future::pending()).await
    }

    /// Like [`run_paced`](Self::run_paced), but stops the run as soon as
    /// `shutdown` resolves.
    pub async fn run_paced_until<F>(&mut self, factor: f64, shutdown: F) -> RunStatus
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let factor = pace_factor(factor);

        while self.is_running() {
            let Some(at) = self.timers.next_deadline() else {
                break;
            };
            let gap = scaled(at.saturating_sub(self.timers.now()), factor);

            tokio::select! {
                _ = tokio::time::sleep(gap) => {
                    self.step();
                }
                _ = &mut shutdown => {
                    log::info!("[sim] shutdown requested");
                    self.stop();
                }
            }
        }
        self.status()
    }

    fn dispatch(&mut self, tagged: Tagged) {
        if tagged.epoch != self.state.epoch || !self.is_running() {
            log::trace!("[sim] dropping {:?} from a finished run", tagged.event);
            return;
        }

        let mut ctx = self.ctx();
        match tagged.event {
            SimEvent::Send {
                seq,
                retransmission,
            } => sr_sender::send(&mut ctx, seq, retransmission),
            SimEvent::FrameArrival { seq } => sr_receiver::receive(&mut ctx, seq),
            SimEvent::AckArrival { seq } => sr_sender::on_ack(&mut ctx, seq),
            SimEvent::RetransmitTimeout { seq } => sr_sender::on_timeout(&mut ctx, seq),
        }

        debug_assert!(
            self.state.check_invariants().is_ok(),
            "{:?}",
            self.state.check_invariants()
        );

        if !self.is_running() {
            log::debug!("[sim] run {} finished: {}", self.state.epoch, self.state.status);
            self.running_tx.send_replace(false);
        }
    }

    fn ctx(&mut self) -> EngineCtx<'_> {
        EngineCtx {
            state: &mut self.state,
            timers: &mut self.timers,
            resolver: &mut self.resolver,
            modes: &self.config.modes,
            timing: &self.config.timing,
            journal: &mut self.journal,
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Configuration of the current (or last) run, after clamping.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn trace(&self) -> &[TraceRecord] {
        self.journal.records()
    }

    pub fn stats(&self) -> SimStats {
        self.journal.stats()
    }

    /// Simulated time elapsed since the current run started.
    pub fn elapsed(&self) -> Duration {
        self.timers.now().saturating_sub(self.state.started_at)
    }

    /// Number of live retransmit timers for `seq`.
    pub fn live_retransmit_timers(&self, seq: u32) -> usize {
        self.timers
            .iter_pending()
            .filter(|t| t.epoch == self.state.epoch)
            .filter(|t| t.event == SimEvent::RetransmitTimeout { seq })
            .count()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

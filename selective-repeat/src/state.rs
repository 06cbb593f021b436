//! Simulation state and the context handed to the protocol engines.
//!
//! [`SimulationState`] is the single mutable record of one run: window
//! pointers, in-flight frames, the acknowledged set and the receiver
//! buffer.  It is owned by [`crate::controller::Simulation`] and lent to
//! the engines through [`EngineCtx`] for the duration of one event, so
//! event boundaries are the only visible state transitions.
//!
//! ```text
//!  window_base      next_seq         window_base + window_size
//!      │                │                     │
//!  ────┼────────────────┼─────────────────────┼──────▶ seq space
//!      │ <── in flight ─▶ <──── sendable ────▶│
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::config::FaultModes;
use crate::mode::ModeResolver;
use crate::timer::{TimerHandle, TimerService, TimingConfig};
use crate::trace::{Journal, ProtocolEvent};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of one run.
///
/// ```text
///  Idle ──start──▶ Running ──window_base > total──▶ Completed
///                     │
///                     └──stop──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Sender-side status of one sequence number.
///
/// A retransmission moves a frame back through `Lost` or `AwaitingAck`;
/// [`InFlightFrame::transmissions`] tells first sends and retries apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    #[default]
    NotSent,
    /// Transmitted but dropped by the channel; waiting for the timeout.
    Lost,
    /// Transmitted and on its way (or arrived); waiting for the ACK.
    AwaitingAck,
    Acknowledged,
}

/// A frame that has been transmitted and not yet acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightFrame {
    pub seq: u32,
    /// The one live retransmit timer for this sequence number.
    pub retransmit_timer: TimerHandle,
    /// Total number of transmissions so far (1 = first send).
    pub transmissions: u32,
}

// ---------------------------------------------------------------------------
// SimulationState
// ---------------------------------------------------------------------------

/// Mutable record of one run.  Created fresh by every `start`.
#[derive(Debug, Clone, Default)]
pub struct SimulationState {
    pub total_frames: u32,
    pub window_size: u32,

    /// Oldest unacknowledged sequence number (sender).
    pub window_base: u32,
    /// Next sequence number eligible to be scheduled for sending.
    pub next_seq: u32,
    /// Sent-but-unacknowledged frames, keyed by sequence number.
    pub in_flight: BTreeMap<u32, InFlightFrame>,
    /// Sequence numbers the sender has seen an ACK for.
    pub acknowledged: BTreeSet<u32>,

    /// Oldest sequence number not yet delivered in order (receiver).
    pub receiver_base: u32,
    /// Received but not yet delivered sequence numbers.
    pub receiver_buffer: BTreeSet<u32>,

    pub status: RunStatus,
    /// Incremented on every start; scheduled events carry the epoch that
    /// produced them.
    pub epoch: u64,
    /// Timeline instant at which this run started.
    pub started_at: Duration,

    /// Per-frame sender status; absent entries are `NotSent`.
    frames: BTreeMap<u32, FrameStatus>,
}

impl SimulationState {
    pub fn new(total_frames: u32, window_size: u32, epoch: u64, started_at: Duration) -> Self {
        Self {
            total_frames,
            window_size,
            window_base: 1,
            next_seq: 1,
            in_flight: BTreeMap::new(),
            acknowledged: BTreeSet::new(),
            receiver_base: 1,
            receiver_buffer: BTreeSet::new(),
            status: RunStatus::Idle,
            epoch,
            started_at,
            frames: BTreeMap::new(),
        }
    }

    /// Empty placeholder between runs that remembers the last epoch.
    pub fn idle(epoch: u64) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn is_acknowledged(&self, seq: u32) -> bool {
        self.acknowledged.contains(&seq)
    }

    /// `true` once every frame has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.window_base > self.total_frames
    }

    /// Frames scheduled or sent and not yet covered by `window_base`.
    pub fn outstanding(&self) -> u32 {
        self.next_seq - self.window_base
    }

    /// Exclusive upper edge of the sender window.
    pub fn window_end(&self) -> u32 {
        self.window_base.saturating_add(self.window_size)
    }

    /// Exclusive upper edge of the receiver window.
    pub fn receiver_window_end(&self) -> u32 {
        self.receiver_base.saturating_add(self.window_size)
    }

    pub fn frame_status(&self, seq: u32) -> FrameStatus {
        self.frames.get(&seq).copied().unwrap_or_default()
    }

    /// Sequence numbers outside `1..=total_frames` are ignored.
    pub fn set_frame_status(&mut self, seq: u32, status: FrameStatus) {
        if (1..=self.total_frames).contains(&seq) {
            self.frames.insert(seq, status);
        }
    }

    /// Check the window invariants that must hold between any two events.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.total_frames == 0 {
            return Ok(()); // idle placeholder state
        }
        if self.window_base > self.next_seq {
            return Err(format!(
                "window_base {} ahead of next_seq {}",
                self.window_base, self.next_seq
            ));
        }
        if self.next_seq > self.window_end() {
            return Err(format!(
                "next_seq {} beyond window end {}",
                self.next_seq,
                self.window_end()
            ));
        }
        if let Some(seq) = self
            .in_flight
            .keys()
            .find(|&&s| s < self.window_base || s >= self.next_seq)
        {
            return Err(format!("in-flight frame {seq} outside [base, next_seq)"));
        }
        if let Some(seq) = self.in_flight.keys().find(|&&s| {
            !matches!(
                self.frame_status(s),
                FrameStatus::Lost | FrameStatus::AwaitingAck
            )
        }) {
            return Err(format!(
                "in-flight frame {seq} has status {:?}",
                self.frame_status(*seq)
            ));
        }
        if let Some(seq) = self
            .acknowledged
            .iter()
            .find(|&&s| self.frame_status(s) != FrameStatus::Acknowledged)
        {
            return Err(format!("acknowledged frame {seq} not marked as such"));
        }
        if self.receiver_base < self.window_base {
            return Err(format!(
                "receiver_base {} behind sender base {}",
                self.receiver_base, self.window_base
            ));
        }
        if let Some(seq) = self.receiver_buffer.iter().find(|&&s| s <= self.receiver_base) {
            return Err(format!(
                "buffered frame {seq} not above receiver_base {}",
                self.receiver_base
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduled events
// ---------------------------------------------------------------------------

/// Work scheduled on the timeline by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// Staggered first transmission or retransmission of a frame.
    Send { seq: u32, retransmission: bool },
    /// A frame reaches the receiver.
    FrameArrival { seq: u32 },
    /// An ACK reaches the sender.
    AckArrival { seq: u32 },
    /// The retransmit timer for a frame expires.
    RetransmitTimeout { seq: u32 },
}

/// A [`SimEvent`] stamped with the run epoch that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tagged {
    pub epoch: u64,
    pub event: SimEvent,
}

// ---------------------------------------------------------------------------
// EngineCtx
// ---------------------------------------------------------------------------

/// Everything an engine operation may touch while handling one event.
pub struct EngineCtx<'a> {
    pub state: &'a mut SimulationState,
    pub timers: &'a mut TimerService<Tagged>,
    pub resolver: &'a mut ModeResolver,
    pub modes: &'a FaultModes,
    pub timing: &'a TimingConfig,
    pub journal: &'a mut Journal,
}

impl EngineCtx<'_> {
    /// Schedule `event` for the current run.
    pub fn schedule(&mut self, delay: Duration, event: SimEvent) -> TimerHandle {
        self.timers.schedule(
            delay,
            Tagged {
                epoch: self.state.epoch,
                event,
            },
        )
    }

    /// Record a protocol event at the current run-relative time.
    pub fn emit(&mut self, event: ProtocolEvent) {
        let at = self.timers.now().saturating_sub(self.state.started_at);
        self.journal.emit(at, event);
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Owned pieces of an [`EngineCtx`] for driving the engines by hand.
#[cfg(test)]
pub(crate) struct Fixture {
    pub state: SimulationState,
    pub timers: TimerService<Tagged>,
    pub resolver: ModeResolver,
    pub modes: FaultModes,
    pub timing: TimingConfig,
    pub journal: Journal,
}

#[cfg(test)]
impl Fixture {
    /// A running state for `total` frames and window `window`.
    pub fn running(total: u32, window: u32, modes: FaultModes) -> Self {
        let mut state = SimulationState::new(total, window, 1, Duration::ZERO);
        state.status = RunStatus::Running;
        let mut journal = Journal::new(
            Box::new(crate::sink::MemoryLog::default()),
            Box::new(crate::sink::NullRenderer),
        );
        journal.begin(total);
        Self {
            state,
            timers: TimerService::new(),
            resolver: ModeResolver::seeded(7),
            modes,
            timing: TimingConfig::default(),
            journal,
        }
    }

    pub fn ctx(&mut self) -> EngineCtx<'_> {
        EngineCtx {
            state: &mut self.state,
            timers: &mut self.timers,
            resolver: &mut self.resolver,
            modes: &self.modes,
            timing: &self.timing,
            journal: &mut self.journal,
        }
    }

    /// Pop every due event without dispatching it.
    pub fn drain(&mut self) -> Vec<(Duration, SimEvent)> {
        std::iter::from_fn(|| self.timers.pop_next())
            .map(|s| (s.at, s.event.event))
            .collect()
    }

    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.journal.records().iter().map(|r| r.event).collect()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

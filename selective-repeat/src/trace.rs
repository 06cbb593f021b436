//! Protocol events, the run trace, and counters.
//!
//! Engines describe what just happened as a [`ProtocolEvent`].  The
//! [`Journal`] stamps it with the simulated time, appends it to the trace,
//! bumps [`SimStats`] and fans it out to the log sink and the timeline
//! layout.  The trace is the `(event, timestamp)` stream a harness consumes.

use std::fmt;
use std::time::Duration;

use crate::sink::{FacadeLog, LogSink, NullRenderer, Renderer, Severity, TimelineLayout};

// ---------------------------------------------------------------------------
// ProtocolEvent
// ---------------------------------------------------------------------------

/// One notable protocol transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEvent {
    Started {
        total_frames: u32,
        window_size: u32,
    },
    FrameSent {
        seq: u32,
        retransmission: bool,
        lost: bool,
        delayed: bool,
    },
    FrameLost {
        seq: u32,
    },
    /// Arrival outside `[receiver_base, receiver_base + window)`.
    FrameDiscarded {
        seq: u32,
        receiver_base: u32,
        /// Last sequence number the receiver window admits.
        window_last: u32,
    },
    FrameAccepted {
        seq: u32,
    },
    /// Handed to the application layer, strictly in order.
    FrameDelivered {
        seq: u32,
    },
    AckSent {
        seq: u32,
        lost: bool,
        delayed: bool,
    },
    AckLost {
        seq: u32,
    },
    AckReceived {
        seq: u32,
    },
    Timeout {
        seq: u32,
    },
    WindowSlid {
        from: u32,
        to: u32,
    },
    Completed,
    Stopped,
}

impl ProtocolEvent {
    pub fn severity(&self) -> Severity {
        match self {
            ProtocolEvent::Started { .. }
            | ProtocolEvent::FrameAccepted { .. }
            | ProtocolEvent::AckReceived { .. }
            | ProtocolEvent::Completed => Severity::Success,
            ProtocolEvent::FrameLost { .. } | ProtocolEvent::AckLost { .. } => Severity::Error,
            ProtocolEvent::FrameDiscarded { .. } | ProtocolEvent::Timeout { .. } => {
                Severity::Warning
            }
            ProtocolEvent::FrameSent { .. }
            | ProtocolEvent::FrameDelivered { .. }
            | ProtocolEvent::AckSent { .. }
            | ProtocolEvent::WindowSlid { .. }
            | ProtocolEvent::Stopped => Severity::Info,
        }
    }
}

impl fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolEvent::Started {
                total_frames,
                window_size,
            } => write!(
                f,
                "Simulation start: frames {total_frames}, window {window_size}"
            ),
            ProtocolEvent::FrameSent {
                seq,
                retransmission,
                ..
            } => write!(f, "Sending frame {seq} (re-tx: {retransmission})"),
            ProtocolEvent::FrameLost { seq } => write!(f, "Frame {seq} lost"),
            ProtocolEvent::FrameDiscarded {
                seq,
                receiver_base,
                window_last,
            } => write!(
                f,
                "Receiver: discarded frame {seq} (out of window {receiver_base}-{window_last})"
            ),
            ProtocolEvent::FrameAccepted { seq } => write!(f, "Receiver: got frame {seq}"),
            ProtocolEvent::FrameDelivered { seq } => {
                write!(f, "Receiver: delivering frame {seq} from buffer")
            }
            ProtocolEvent::AckSent { seq, .. } => write!(f, "Receiver: sending ACK {seq}"),
            ProtocolEvent::AckLost { seq } => write!(f, "ACK {seq} lost"),
            ProtocolEvent::AckReceived { seq } => write!(f, "Sender: got ACK {seq}"),
            ProtocolEvent::Timeout { seq } => {
                write!(f, "Timeout for frame {seq}, retransmitting")
            }
            ProtocolEvent::WindowSlid { from, to } => {
                write!(f, "Sender: window base slides {from} -> {to}")
            }
            ProtocolEvent::Completed => write!(f, "Simulation complete"),
            ProtocolEvent::Stopped => write!(f, "Simulation stopped"),
        }
    }
}

/// A protocol event and the run-relative simulated time it happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub at: Duration,
    pub event: ProtocolEvent,
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>7} ms] {}", self.at.as_millis(), self.event)
    }
}

// ---------------------------------------------------------------------------
// SimStats
// ---------------------------------------------------------------------------

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Every transmission, first sends and retransmissions alike.
    pub frames_sent: u64,
    pub retransmissions: u64,
    pub frames_lost: u64,
    pub frames_delayed: u64,
    pub frames_discarded: u64,
    pub frames_delivered: u64,
    pub acks_sent: u64,
    pub acks_lost: u64,
    pub acks_delayed: u64,
    pub acks_received: u64,
    /// ACKs ignored because they were below the window or already seen.
    pub stale_acks: u64,
    pub timeouts: u64,
}

impl SimStats {
    fn record(&mut self, event: &ProtocolEvent) {
        match *event {
            ProtocolEvent::FrameSent {
                retransmission,
                delayed,
                ..
            } => {
                self.frames_sent += 1;
                self.retransmissions += u64::from(retransmission);
                self.frames_delayed += u64::from(delayed);
            }
            ProtocolEvent::FrameLost { .. } => self.frames_lost += 1,
            ProtocolEvent::FrameDiscarded { .. } => self.frames_discarded += 1,
            ProtocolEvent::FrameDelivered { .. } => self.frames_delivered += 1,
            ProtocolEvent::AckSent { delayed, .. } => {
                self.acks_sent += 1;
                self.acks_delayed += u64::from(delayed);
            }
            ProtocolEvent::AckLost { .. } => self.acks_lost += 1,
            ProtocolEvent::AckReceived { .. } => self.acks_received += 1,
            ProtocolEvent::Timeout { .. } => self.timeouts += 1,
            _ => {}
        }
    }
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "frames: sent {} (retransmitted {}), lost {}, delayed {}, discarded {}, delivered {}",
            self.frames_sent,
            self.retransmissions,
            self.frames_lost,
            self.frames_delayed,
            self.frames_discarded,
            self.frames_delivered
        )?;
        write!(
            f,
            "acks:   sent {}, lost {}, delayed {}, received {}, stale {}; timeouts {}",
            self.acks_sent,
            self.acks_lost,
            self.acks_delayed,
            self.acks_received,
            self.stale_acks,
            self.timeouts
        )
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Collects the trace of the current run and forwards events to the sinks.
pub struct Journal {
    records: Vec<TraceRecord>,
    stats: SimStats,
    log: Box<dyn LogSink + Send>,
    layout: TimelineLayout,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(Box::new(FacadeLog), Box::new(NullRenderer))
    }
}

impl Journal {
    pub fn new(log: Box<dyn LogSink + Send>, renderer: Box<dyn Renderer + Send>) -> Self {
        Self {
            records: Vec::new(),
            stats: SimStats::default(),
            log,
            layout: TimelineLayout::new(renderer),
        }
    }

    /// Forget the previous run and prepare the timeline for `total_frames`.
    pub fn begin(&mut self, total_frames: u32) {
        self.records.clear();
        self.stats = SimStats::default();
        self.layout.begin(total_frames);
    }

    /// Drop the trace and counters without starting a new timeline.
    pub fn clear(&mut self) {
        self.records.clear();
        self.stats = SimStats::default();
        self.layout.clear();
    }

    pub fn emit(&mut self, at: Duration, event: ProtocolEvent) {
        self.stats.record(&event);
        self.log.log(&event.to_string(), event.severity());
        self.layout.apply(&event);
        self.records.push(TraceRecord { at, event });
    }

    /// Count an ACK that was ignored without producing an event.
    pub fn note_stale_ack(&mut self) {
        self.stats.stale_acks += 1;
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

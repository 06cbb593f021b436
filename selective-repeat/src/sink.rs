//! Output boundary: log sink and timeline renderer.
//!
//! The engine never draws or prints anything itself.  Each protocol event is
//! handed to a [`LogSink`] (one message per notable transition) and to a
//! [`TimelineLayout`], which turns it into calls on a [`Renderer`].
//!
//! The layout owns the vertical cursor of the sequence diagram.  Protocol
//! state never reads it back; a frame's row is remembered here, not in the
//! sender.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::trace::ProtocolEvent;

// ---------------------------------------------------------------------------
// Log sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Receives one human-readable line per notable transition.
pub trait LogSink {
    fn log(&mut self, message: &str, severity: Severity);
}

/// Forwards messages to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeLog;

impl LogSink for FacadeLog {
    fn log(&mut self, message: &str, severity: Severity) {
        match severity {
            Severity::Info | Severity::Success => log::info!("{message}"),
            Severity::Warning => log::warn!("{message}"),
            Severity::Error => log::error!("{message}"),
        }
    }
}

/// Keeps every message in memory.  Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    entries: Arc<Mutex<Vec<(String, Severity)>>>,
}

impl MemoryLog {
    pub fn entries(&self) -> Vec<(String, Severity)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogSink for MemoryLog {
    fn log(&mut self, message: &str, severity: Severity) {
        // A panic in another holder must not cost us lines.
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message.to_string(), severity));
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Palette of the sequence diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineColor {
    Frame,
    Retransmit,
    LostFrame,
    Ack,
    LostAck,
    Timeout,
}

impl LineColor {
    pub fn hex(self) -> &'static str {
        match self {
            LineColor::Frame => "#28a745",
            LineColor::Retransmit => "#ff6b35",
            LineColor::LostFrame | LineColor::Timeout => "#dc3545",
            LineColor::Ack => "#007bff",
            LineColor::LostAck => "#6c757d",
        }
    }
}

/// Drawing surface for the sender/receiver timeline.
pub trait Renderer {
    fn draw_axes(&mut self, sender_x: f64, receiver_x: f64, height: f64);
    fn draw_frame_line(
        &mut self,
        from_x: f64,
        to_x: f64,
        y: f64,
        seq: u32,
        color: LineColor,
        dashed: bool,
    );
    fn draw_ack_line(
        &mut self,
        from_x: f64,
        to_x: f64,
        y: f64,
        seq: u32,
        color: LineColor,
        dashed: bool,
    );
    fn draw_timeout_label(&mut self, x: f64, y: f64, seq: u32);
}

/// Discards all drawing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn draw_axes(&mut self, _: f64, _: f64, _: f64) {}
    fn draw_frame_line(&mut self, _: f64, _: f64, _: f64, _: u32, _: LineColor, _: bool) {}
    fn draw_ack_line(&mut self, _: f64, _: f64, _: f64, _: u32, _: LineColor, _: bool) {}
    fn draw_timeout_label(&mut self, _: f64, _: f64, _: u32) {}
}

/// One call made on a [`RecordingRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Axes {
        sender_x: f64,
        receiver_x: f64,
        height: f64,
    },
    Frame {
        y: f64,
        seq: u32,
        color: LineColor,
        dashed: bool,
    },
    Ack {
        y: f64,
        seq: u32,
        color: LineColor,
        dashed: bool,
    },
    TimeoutLabel {
        y: f64,
        seq: u32,
    },
}

/// Records drawing calls.  Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingRenderer {
    calls: Arc<Mutex<Vec<DrawCall>>>,
}

impl RecordingRenderer {
    pub fn calls(&self) -> Vec<DrawCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, call: DrawCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl Renderer for RecordingRenderer {
    fn draw_axes(&mut self, sender_x: f64, receiver_x: f64, height: f64) {
        self.push(DrawCall::Axes {
            sender_x,
            receiver_x,
            height,
        });
    }

    fn draw_frame_line(&mut self, _: f64, _: f64, y: f64, seq: u32, color: LineColor, dashed: bool) {
        self.push(DrawCall::Frame {
            y,
            seq,
            color,
            dashed,
        });
    }

    fn draw_ack_line(&mut self, _: f64, _: f64, y: f64, seq: u32, color: LineColor, dashed: bool) {
        self.push(DrawCall::Ack {
            y,
            seq,
            color,
            dashed,
        });
    }

    fn draw_timeout_label(&mut self, _: f64, y: f64, seq: u32) {
        self.push(DrawCall::TimeoutLabel { y, seq });
    }
}

// ---------------------------------------------------------------------------
// TimelineLayout
// ---------------------------------------------------------------------------

const SENDER_X: f64 = 200.0;
const CANVAS_WIDTH: f64 = 1000.0;
const TOP_Y: f64 = 50.0;
const EVENT_GAP: f64 = 30.0;
const ROW_HEIGHT: f64 = 90.0;
const ACK_OFFSET: f64 = 40.0;
const MIN_HEIGHT: f64 = 700.0;

/// Translates protocol events into sequence-diagram drawing calls.
pub struct TimelineLayout {
    renderer: Box<dyn Renderer + Send>,
    cursor: f64,
    /// Rows of transmissions still travelling towards the receiver, per seq.
    frames_in_transit: HashMap<u32, VecDeque<f64>>,
    /// Rows at which the receiver's next ACK for a seq should be drawn.
    pending_acks: HashMap<u32, VecDeque<f64>>,
}

impl TimelineLayout {
    pub fn new(renderer: Box<dyn Renderer + Send>) -> Self {
        Self {
            renderer,
            cursor: TOP_Y,
            frames_in_transit: HashMap::new(),
            pending_acks: HashMap::new(),
        }
    }

    pub fn receiver_x() -> f64 {
        CANVAS_WIDTH - SENDER_X
    }

    /// Canvas height needed for `total_frames`.
    pub fn canvas_height(total_frames: u32) -> f64 {
        (TOP_Y + f64::from(total_frames) * ROW_HEIGHT * 1.5).max(MIN_HEIGHT)
    }

    pub fn begin(&mut self, total_frames: u32) {
        self.clear();
        self.renderer.draw_axes(
            SENDER_X,
            Self::receiver_x(),
            Self::canvas_height(total_frames),
        );
    }

    pub fn clear(&mut self) {
        self.cursor = TOP_Y;
        self.frames_in_transit.clear();
        self.pending_acks.clear();
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn apply(&mut self, event: &ProtocolEvent) {
        match *event {
            ProtocolEvent::FrameSent {
                seq,
                retransmission,
                lost,
                ..
            } => {
                let y = self.cursor;
                self.cursor += EVENT_GAP;
                let color = if lost {
                    LineColor::LostFrame
                } else if retransmission {
                    LineColor::Retransmit
                } else {
                    LineColor::Frame
                };
                self.renderer.draw_frame_line(
                    SENDER_X,
                    Self::receiver_x(),
                    y,
                    seq,
                    color,
                    lost || retransmission,
                );
                if !lost {
                    self.frames_in_transit.entry(seq).or_default().push_back(y);
                }
            }
            ProtocolEvent::FrameAccepted { seq } => {
                if let Some(ack_y) = self.arrival_row(seq) {
                    self.cursor = self.cursor.max(ack_y);
                    self.pending_acks.entry(seq).or_default().push_back(ack_y);
                }
            }
            ProtocolEvent::FrameDiscarded {
                seq,
                receiver_base,
                ..
            } => {
                let row = self.arrival_row(seq);
                // Only duplicates below the window are answered with an ACK.
                if let Some(ack_y) = row.filter(|_| seq < receiver_base) {
                    self.pending_acks.entry(seq).or_default().push_back(ack_y);
                }
            }
            ProtocolEvent::AckSent { seq, lost, .. } => {
                let y = self
                    .pending_acks
                    .get_mut(&seq)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or(self.cursor);
                let color = if lost {
                    LineColor::LostAck
                } else {
                    LineColor::Ack
                };
                self.renderer
                    .draw_ack_line(Self::receiver_x(), SENDER_X, y, seq, color, lost);
            }
            ProtocolEvent::Timeout { seq } => {
                self.cursor += ROW_HEIGHT;
                self.renderer
                    .draw_timeout_label(SENDER_X - 90.0, self.cursor - 10.0, seq);
            }
            _ => {}
        }
    }

    /// Row of the ACK answering the oldest transmission of `seq` in transit.
    fn arrival_row(&mut self, seq: u32) -> Option<f64> {
        self.frames_in_transit
            .get_mut(&seq)
            .and_then(VecDeque::pop_front)
            .map(|y| y + ACK_OFFSET)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

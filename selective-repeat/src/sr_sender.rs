//! Selective-Repeat send-side engine.
//!
//! Every sent frame gets its own retransmit timer; only the frame whose
//! timer expires is resent (unlike Go-Back-N, which resends the whole
//! window).  ACKs are individual, not cumulative: an ACK for `seq` marks
//! exactly that frame, and the window slides once its base is covered.
//!
//! # Protocol contract
//!
//! - At most `window_size` sequence numbers in `[window_base, next_seq)`.
//! - At most one live retransmit timer per sequence number.
//! - ACKs below `window_base` or for an already acknowledged frame are
//!   ignored.
//! - The run completes when `window_base > total_frames`.
//!
//! All functions operate on an [`EngineCtx`] lent by the controller for the
//! duration of one event.

use crate::mode::FaultCategory;
use crate::state::{EngineCtx, FrameStatus, InFlightFrame, RunStatus, SimEvent};
use crate::trace::ProtocolEvent;

/// Schedule staggered sends for every free slot in the window.
///
/// A no-op when the window is already full or all frames are scheduled.
pub fn fill_window(ctx: &mut EngineCtx<'_>) {
    if !ctx.state.is_running() {
        return;
    }
    let base = ctx.state.window_base;
    while ctx.state.next_seq < ctx.state.window_end()
        && ctx.state.next_seq <= ctx.state.total_frames
    {
        let seq = ctx.state.next_seq;
        let delay = ctx.timing.stagger * (seq - base);
        ctx.schedule(
            delay,
            SimEvent::Send {
                seq,
                retransmission: false,
            },
        );
        ctx.state.next_seq += 1;
        log::debug!("[sr:send] scheduled frame {seq} in {delay:?}");
    }
}

/// Transmit (or retransmit) one frame onto the simulated channel.
pub fn send(ctx: &mut EngineCtx<'_>, seq: u32, retransmission: bool) {
    if !ctx.state.is_running() || ctx.state.is_acknowledged(seq) {
        return;
    }

    let lost = ctx
        .resolver
        .decide(ctx.modes.frame_loss, seq, FaultCategory::Frame);
    let delayed = ctx
        .resolver
        .decide(ctx.modes.frame_delay, seq, FaultCategory::Frame);

    ctx.emit(ProtocolEvent::FrameSent {
        seq,
        retransmission,
        lost,
        delayed: delayed && !lost,
    });
    arm_retransmit_timer(ctx, seq);

    if lost {
        ctx.state.set_frame_status(seq, FrameStatus::Lost);
        ctx.emit(ProtocolEvent::FrameLost { seq });
        return;
    }

    ctx.state.set_frame_status(seq, FrameStatus::AwaitingAck);
    let delay = ctx.timing.frame_delay(delayed);
    ctx.schedule(delay, SimEvent::FrameArrival { seq });
}

/// Arm a fresh retransmit timer for `seq`, cancelling the previous one.
fn arm_retransmit_timer(ctx: &mut EngineCtx<'_>, seq: u32) {
    let transmissions = match ctx.state.in_flight.remove(&seq) {
        Some(prev) => {
            ctx.timers.cancel(prev.retransmit_timer);
            prev.transmissions + 1
        }
        None => 1,
    };
    let retransmit_timer = ctx.schedule(
        ctx.timing.retransmit_timeout,
        SimEvent::RetransmitTimeout { seq },
    );
    ctx.state.in_flight.insert(
        seq,
        InFlightFrame {
            seq,
            retransmit_timer,
            transmissions,
        },
    );
}

/// The retransmit timer for `seq` expired.
pub fn on_timeout(ctx: &mut EngineCtx<'_>, seq: u32) {
    if !ctx.state.is_running() || ctx.state.is_acknowledged(seq) {
        return;
    }
    log::debug!("[sr:timer] frame {seq} timed out");
    ctx.emit(ProtocolEvent::Timeout { seq });
    send(ctx, seq, true);
}

/// An ACK for `seq` reached the sender.
pub fn on_ack(ctx: &mut EngineCtx<'_>, seq: u32) {
    if !ctx.state.is_running() {
        return;
    }
    if ctx.state.is_acknowledged(seq) || seq < ctx.state.window_base {
        log::debug!(
            "[sr:send] stale ACK {seq} ignored (base {})",
            ctx.state.window_base
        );
        ctx.journal.note_stale_ack();
        return;
    }

    ctx.emit(ProtocolEvent::AckReceived { seq });
    ctx.state.acknowledged.insert(seq);
    ctx.state.set_frame_status(seq, FrameStatus::Acknowledged);
    if let Some(frame) = ctx.state.in_flight.remove(&seq) {
        ctx.timers.cancel(frame.retransmit_timer);
    }

    if seq == ctx.state.window_base {
        let from = ctx.state.window_base;
        while ctx.state.is_acknowledged(ctx.state.window_base) {
            ctx.state.window_base += 1;
        }
        ctx.emit(ProtocolEvent::WindowSlid {
            from,
            to: ctx.state.window_base,
        });
        fill_window(ctx);
    }

    if ctx.state.is_complete() {
        ctx.state.status = RunStatus::Completed;
        ctx.emit(ProtocolEvent::Completed);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! Selective-Repeat receive-side engine.
//!
//! Unlike Go-Back-N, frames that arrive out of order inside the receive
//! window are **buffered**, individually acknowledged, and handed to the
//! application once the gap below them is filled.
//!
//! - `seq` in `[receiver_base, receiver_base + window)`: buffer, ACK, then
//!   deliver every contiguous frame from `receiver_base` upwards.
//! - `seq < receiver_base`: already delivered.  Discard but ACK again, so a
//!   sender whose first ACK was lost can still slide.
//! - `seq >= receiver_base + window`: discard silently; the sender's
//!   timeout retries once the window admits it.

use crate::mode::FaultCategory;
use crate::state::{EngineCtx, SimEvent};
use crate::trace::ProtocolEvent;

/// A frame reached the receiver.
pub fn receive(ctx: &mut EngineCtx<'_>, seq: u32) {
    if !ctx.state.is_running() {
        return;
    }

    let base = ctx.state.receiver_base;
    let end = ctx.state.receiver_window_end();
    if seq < base || seq >= end {
        ctx.emit(ProtocolEvent::FrameDiscarded {
            seq,
            receiver_base: base,
            window_last: end - 1,
        });
        if seq < base {
            log::debug!("[sr:recv] duplicate frame {seq} below base {base}; re-ACK");
            send_ack(ctx, seq);
        }
        return;
    }

    ctx.emit(ProtocolEvent::FrameAccepted { seq });
    ctx.state.receiver_buffer.insert(seq);
    send_ack(ctx, seq);

    while ctx.state.receiver_buffer.remove(&ctx.state.receiver_base) {
        let delivered = ctx.state.receiver_base;
        ctx.state.receiver_base += 1;
        ctx.emit(ProtocolEvent::FrameDelivered { seq: delivered });
    }
}

/// Put an ACK for `seq` onto the simulated channel.
pub fn send_ack(ctx: &mut EngineCtx<'_>, seq: u32) {
    if !ctx.state.is_running() {
        return;
    }

    let lost = ctx
        .resolver
        .decide(ctx.modes.ack_loss, seq, FaultCategory::Ack);
    let delayed = ctx
        .resolver
        .decide(ctx.modes.ack_delay, seq, FaultCategory::Ack);

    ctx.emit(ProtocolEvent::AckSent {
        seq,
        lost,
        delayed: delayed && !lost,
    });

    if lost {
        ctx.emit(ProtocolEvent::AckLost { seq });
        return;
    }

    let delay = ctx.timing.ack_delay(delayed);
    ctx.schedule(delay, SimEvent::AckArrival { seq });
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

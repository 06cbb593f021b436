//! Virtual-clock timer service.
//!
//! Every asynchronous step of the protocol (staggered send, frame
//! propagation, ACK propagation, retransmit timeout) is modelled as an event
//! scheduled on a single simulated timeline.  This module provides:
//! - [`TimingConfig`]: the delays used by the engines.
//! - [`TimerService`]: a priority queue of pending events ordered by fire
//!   time, ties broken by schedule order, with O(1) cancellation.
//! - [`TimerHandle`]: the cancellation token returned by
//!   [`TimerService::schedule`].
//!
//! Time only advances when an event is popped, so a run is deterministic and
//! can be fast-forwarded without sleeping.  Cancellation is lazy: cancelled
//! entries stay in the heap and are skipped when they reach the front.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

/// Delays applied by the sender and receiver engines, in simulated time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Gap between consecutive sends when the window is filled.
    pub stagger: Duration,
    /// Frame propagation on a healthy channel.
    pub frame_propagation: Duration,
    /// Frame propagation when the frame-delay fault fires.
    pub frame_delayed: Duration,
    /// ACK propagation on a healthy channel.
    pub ack_propagation: Duration,
    /// ACK propagation when the ACK-delay fault fires.
    pub ack_delayed: Duration,
    /// Retransmit timeout armed on every (re)transmission.
    pub retransmit_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stagger: Duration::from_millis(300),
            frame_propagation: Duration::from_millis(300),
            frame_delayed: Duration::from_millis(1000),
            ack_propagation: Duration::from_millis(400),
            ack_delayed: Duration::from_millis(1000),
            retransmit_timeout: Duration::from_millis(5000),
        }
    }
}

impl TimingConfig {
    pub fn frame_delay(&self, delayed: bool) -> Duration {
        if delayed {
            self.frame_delayed
        } else {
            self.frame_propagation
        }
    }

    pub fn ack_delay(&self, delayed: bool) -> Duration {
        if delayed {
            self.ack_delayed
        } else {
            self.ack_propagation
        }
    }
}

// ---------------------------------------------------------------------------
// TimerHandle / Scheduled
// ---------------------------------------------------------------------------

/// Cancellation token for one scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// An event that has come due, together with its fire time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduled<E> {
    pub at: Duration,
    pub handle: TimerHandle,
    pub event: E,
}

struct Entry<E> {
    at: Duration,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap and we want the earliest first.
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ---------------------------------------------------------------------------
// TimerService
// ---------------------------------------------------------------------------

/// A single logical timeline of pending events.
pub struct TimerService<E> {
    now: Duration,
    next_seq: u64,
    queue: BinaryHeap<Entry<E>>,
    /// Handles that are scheduled and neither fired nor cancelled.
    pending: HashSet<u64>,
}

impl<E> Default for TimerService<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TimerService<E> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule `event` to fire `delay` after the current time.
    pub fn schedule(&mut self, delay: Duration, event: E) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Entry {
            at: self.now + delay,
            seq,
            event,
        });
        self.pending.insert(seq);
        TimerHandle(seq)
    }

    /// Cancel a pending event.
    ///
    /// Returns `true` if the event was still pending.  Cancelling a handle
    /// that already fired, was already cancelled, or is unknown is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle.0)
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    /// Number of events still waiting to fire.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Iterate over events still waiting to fire, in no particular order.
    pub fn iter_pending(&self) -> impl Iterator<Item = &E> + '_ {
        self.queue
            .iter()
            .filter(|e| self.pending.contains(&e.seq))
            .map(|e| &e.event)
    }

    /// Fire time of the next live event, if any.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_cancelled();
        self.queue.peek().map(|e| e.at)
    }

    /// Pop the next live event and advance the clock to its fire time.
    pub fn pop_next(&mut self) -> Option<Scheduled<E>> {
        self.discard_cancelled();
        let entry = self.queue.pop()?;
        self.pending.remove(&entry.seq);
        self.now = self.now.max(entry.at);
        Some(Scheduled {
            at: entry.at,
            handle: TimerHandle(entry.seq),
            event: entry.event,
        })
    }

    fn discard_cancelled(&mut self) {
        while let Some(front) = self.queue.peek() {
            if self.pending.contains(&front.seq) {
                break;
            }
            self.queue.pop();
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! Error type for the simulator's public API.
//!
//! Almost nothing in the protocol engine can fail: stale ACKs, duplicate
//! frames and out-of-window arrivals are ordinary channel behaviour and
//! resolve to silent no-ops.  The only caller-visible failures are a
//! rejected `start` and configuration text that cannot be parsed.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    /// `start` was called while a run is still in progress.
    #[error("simulation already running")]
    AlreadyRunning,

    /// A fault-mode string could not be parsed.
    #[error("invalid fault mode `{0}` (expected none, random, fixed:N or kth:K)")]
    InvalidMode(String),
}

//! `selective-repeat`: an event-driven Selective-Repeat ARQ simulator.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   frames (lossy, delayed)   ┌──────────┐
//!  │  Sender  │────────────────────────────▶│ Receiver │
//!  └────┬─────┘                             └─────┬────┘
//!       │        per-frame ACKs (lossy, delayed)  │
//!       │◀────────────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────────────────┐
//!  │                  Simulation                   │
//!  │  (owns state, virtual clock, fault resolver)  │
//!  └────┬──────────────────────────────────────────┘
//!       │ ProtocolEvent
//!  ┌────▼──────┐
//!  │  Journal  │  trace + stats → log sink, timeline renderer
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`config`]: run configuration and boundary clamping
//! - [`mode`]: fault modes, trigger ledger, fault resolver
//! - [`timer`]: virtual-clock timer service and protocol delays
//! - [`state`]: simulation state and the engine context
//! - [`sr_sender`]: SR send side: window fill, (re)transmit, ACK handling
//! - [`sr_receiver`]: SR receive side: buffering, in-order delivery, ACKs
//! - [`controller`]: start / stop / reset lifecycle and event dispatch
//! - [`trace`]: protocol events, run trace, counters
//! - [`sink`]: log sink and timeline renderer boundary
//! - [`error`]: public error type

pub mod config;
pub mod controller;
pub mod error;
pub mod mode;
pub mod sink;
pub mod sr_receiver;
pub mod sr_sender;
pub mod state;
pub mod timer;
pub mod trace;

pub use config::{FaultModes, SimConfig};
pub use controller::Simulation;
pub use error::SimError;
pub use mode::Mode;
pub use state::RunStatus;
pub use trace::{ProtocolEvent, SimStats, TraceRecord};

//! Run configuration and boundary normalisation.
//!
//! Values arriving from the outside (CLI flags, a form, a test) are clamped
//! into range by [`SimConfig::normalized`] before a run starts: the frame
//! count is kept within `1..=MAX_FRAMES`, the window within
//! `1..=total_frames`, and every [`Mode`] parameter is raised to its
//! minimum.  Nothing here ever rejects a number.

use crate::mode::Mode;
use crate::timer::TimingConfig;

/// Largest frame count a run accepts.
pub const MAX_FRAMES: u32 = 1_000_000;

/// The four fault knobs, one per (direction × fault) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultModes {
    pub frame_delay: Mode,
    pub frame_loss: Mode,
    pub ack_delay: Mode,
    pub ack_loss: Mode,
}

impl FaultModes {
    /// No faults at all: a perfect channel.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn clamped(self) -> Self {
        Self {
            frame_delay: self.frame_delay.clamped(),
            frame_loss: self.frame_loss.clamped(),
            ack_delay: self.ack_delay.clamped(),
            ack_loss: self.ack_loss.clamped(),
        }
    }
}

/// Everything needed to start one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Number of frames to deliver, numbered `1..=total_frames`.
    pub total_frames: u32,
    /// Sender and receiver window size.
    pub window_size: u32,
    pub modes: FaultModes,
    pub timing: TimingConfig,
    /// Seed for `Mode::Random`.  `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            total_frames: 8,
            window_size: 4,
            modes: FaultModes::none(),
            timing: TimingConfig::default(),
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn new(total_frames: u32, window_size: u32) -> Self {
        Self {
            total_frames,
            window_size,
            ..Self::default()
        }
    }

    pub fn with_modes(mut self, modes: FaultModes) -> Self {
        self.modes = modes;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Clamp every field into its valid range.
    ///
    /// A window wider than the frame count behaves exactly like one of
    /// `total_frames`, so it is narrowed to that.
    pub fn normalized(self) -> Self {
        let total_frames = self.total_frames.clamp(1, MAX_FRAMES);
        Self {
            total_frames,
            window_size: self.window_size.clamp(1, total_frames),
            modes: self.modes.clamped(),
            ..self
        }
    }
}

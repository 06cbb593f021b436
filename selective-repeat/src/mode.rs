//! Fault-injection modes and the resolver that turns them into decisions.
//!
//! Each of the four fault knobs (frame delay, frame loss, ACK delay, ACK
//! loss) is configured with one [`Mode`].  Every time the engine is about
//! to put a frame or an ACK on the simulated channel it asks the
//! [`ModeResolver`] whether the fault fires for this sequence number.
//!
//! | Mode              | Fires when                                         |
//! |-------------------|----------------------------------------------------|
//! | `None`            | never                                              |
//! | `Random`          | with probability [`RANDOM_PROBABILITY`], re-rolled |
//! |                   | on every attempt (retransmissions included)        |
//! | `FixedIndex(n)`   | `index == n`, at most once per index               |
//! | `EveryKth(k)`     | `index % k == 0`, at most once per index           |
//!
//! The deterministic modes record what they have fired in a
//! [`TriggerLedger`] so that a retransmission of the same sequence number
//! goes through.  Without that, `FixedIndex(3)` on frame loss would drop
//! frame 3 forever.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SimError;

/// Probability that a [`Mode::Random`] fault fires on a single attempt.
pub const RANDOM_PROBABILITY: f64 = 0.25;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// How one fault knob decides whether to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    None,
    Random,
    /// Fire once for exactly this (1-based) sequence number.
    FixedIndex(u32),
    /// Fire once for every sequence number that is a multiple of `k`.
    EveryKth(u32),
}

impl Mode {
    /// Clamp the mode's parameter into its valid range.
    ///
    /// `FixedIndex` needs a target of at least 1 and `EveryKth` a period of
    /// at least 2; anything smaller is raised to the minimum rather than
    /// rejected.
    pub fn clamped(self) -> Self {
        match self {
            Mode::FixedIndex(n) => Mode::FixedIndex(n.max(1)),
            Mode::EveryKth(k) => Mode::EveryKth(k.max(2)),
            other => other,
        }
    }

    /// `true` for modes whose decisions are consumed in the ledger.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Mode::FixedIndex(_) | Mode::EveryKth(_))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::None => write!(f, "none"),
            Mode::Random => write!(f, "random"),
            Mode::FixedIndex(n) => write!(f, "fixed:{n}"),
            Mode::EveryKth(k) => write!(f, "kth:{k}"),
        }
    }
}

impl FromStr for Mode {
    type Err = SimError;

    /// Parse `none`, `random`, `fixed:N` (or `user:N`) and `kth:K` (or
    /// `every:K`).  Out-of-range numbers are clamped, not rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();
        let invalid = || SimError::InvalidMode(s.to_string());

        let (kind, value) = match text.split_once(':') {
            Some((kind, value)) => (kind, Some(value.trim())),
            None => (text.as_str(), None),
        };

        let number = |value: Option<&str>| -> Result<u32, SimError> {
            value
                .ok_or_else(invalid)?
                .parse::<u32>()
                .map_err(|_| invalid())
        };

        let mode = match (kind, value) {
            ("none", None) => Mode::None,
            ("random", None) => Mode::Random,
            ("fixed" | "user", v) => Mode::FixedIndex(number(v)?),
            ("kth" | "every", v) => Mode::EveryKth(number(v)?),
            _ => return Err(invalid()),
        };
        Ok(mode.clamped())
    }
}

// ---------------------------------------------------------------------------
// Trigger ledger
// ---------------------------------------------------------------------------

/// Which side of the channel a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCategory {
    Frame,
    Ack,
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCategory::Frame => write!(f, "frame"),
            FaultCategory::Ack => write!(f, "ack"),
        }
    }
}

/// A consumed deterministic fault: `(category, sequence number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub category: FaultCategory,
    pub index: u32,
}

/// Record of which deterministic faults have already fired this run.
///
/// The ledger is keyed by category, not by knob: loss and delay on the same
/// side share it, so a sequence number consumed by one deterministic knob is
/// spent for the other as well.
#[derive(Debug, Default, Clone)]
pub struct TriggerLedger {
    used: HashSet<TriggerKey>,
}

impl TriggerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as consumed.  Returns `true` if it was not consumed before.
    pub fn consume(&mut self, key: TriggerKey) -> bool {
        self.used.insert(key)
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    pub fn clear(&mut self) {
        self.used.clear();
    }
}

// ---------------------------------------------------------------------------
// ModeResolver
// ---------------------------------------------------------------------------

/// Turns `(mode, index, category)` into a fire / don't-fire decision.
///
/// Owns the RNG used by [`Mode::Random`] and the [`TriggerLedger`] used by
/// the deterministic modes.  A resolver is created fresh for every run.
#[derive(Debug)]
pub struct ModeResolver {
    rng: StdRng,
    ledger: TriggerLedger,
}

impl ModeResolver {
    /// Resolver with a reproducible random stream.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ledger: TriggerLedger::new(),
        }
    }

    /// Resolver seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            ledger: TriggerLedger::new(),
        }
    }

    /// Decide whether the fault configured by `mode` fires for `index`.
    pub fn decide(&mut self, mode: Mode, index: u32, category: FaultCategory) -> bool {
        let hit = match mode {
            Mode::None => return false,
            Mode::Random => return self.rng.random_bool(RANDOM_PROBABILITY),
            Mode::FixedIndex(n) => index == n,
            Mode::EveryKth(k) => index > 0 && k > 0 && index % k == 0,
        };
        hit && self.ledger.consume(TriggerKey { category, index })
    }

    pub fn ledger(&self) -> &TriggerLedger {
        &self.ledger
    }

    /// Forget every consumed trigger (start of a new run).
    pub fn reset(&mut self) {
        self.ledger.clear();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_fires() {
        let mut r = ModeResolver::seeded(1);
        for i in 0..100 {
            assert!(!r.decide(Mode::None, i, FaultCategory::Frame));
        }
        assert!(r.ledger().is_empty());
    }

    #[test]
    fn fixed_index_fires_once() {
        let mut r = ModeResolver::seeded(1);
        assert!(!r.decide(Mode::FixedIndex(3), 2, FaultCategory::Frame));
        assert!(r.decide(Mode::FixedIndex(3), 3, FaultCategory::Frame));
        // Retransmission of frame 3 must get through.
        assert!(!r.decide(Mode::FixedIndex(3), 3, FaultCategory::Frame));
        assert!(!r.decide(Mode::FixedIndex(3), 3, FaultCategory::Frame));
    }

    #[test]
    fn every_kth_fires_once_per_multiple() {
        let mut r = ModeResolver::seeded(1);
        let fired: Vec<u32> = (1..=10)
            .filter(|&i| r.decide(Mode::EveryKth(3), i, FaultCategory::Ack))
            .collect();
        assert_eq!(fired, vec![3, 6, 9]);

        let again: Vec<u32> = (1..=10)
            .filter(|&i| r.decide(Mode::EveryKth(3), i, FaultCategory::Ack))
            .collect();
        assert!(again.is_empty());
    }

    #[test]
    fn every_kth_ignores_index_zero() {
        let mut r = ModeResolver::seeded(1);
        assert!(!r.decide(Mode::EveryKth(2), 0, FaultCategory::Frame));
    }

    #[test]
    fn categories_are_independent() {
        let mut r = ModeResolver::seeded(1);
        assert!(r.decide(Mode::FixedIndex(2), 2, FaultCategory::Frame));
        assert!(r.decide(Mode::FixedIndex(2), 2, FaultCategory::Ack));
        assert_eq!(r.ledger().len(), 2);
    }

    #[test]
    fn knobs_on_one_side_share_the_ledger() {
        let mut r = ModeResolver::seeded(1);
        // Frame loss consumes frame 4, so frame delay on frame 4 no longer fires.
        assert!(r.decide(Mode::FixedIndex(4), 4, FaultCategory::Frame));
        assert!(!r.decide(Mode::EveryKth(2), 4, FaultCategory::Frame));
    }

    #[test]
    fn random_rerolls_each_attempt() {
        let mut r = ModeResolver::seeded(42);
        let hits = (0..4000)
            .filter(|_| r.decide(Mode::Random, 7, FaultCategory::Frame))
            .count();
        // 0.25 * 4000 = 1000; allow generous slack.
        assert!((800..1200).contains(&hits), "hits = {hits}");
        assert!(r.ledger().is_empty());
    }

    #[test]
    fn seeded_resolvers_agree() {
        let mut a = ModeResolver::seeded(9);
        let mut b = ModeResolver::seeded(9);
        for i in 0..64 {
            assert_eq!(
                a.decide(Mode::Random, i, FaultCategory::Frame),
                b.decide(Mode::Random, i, FaultCategory::Frame)
            );
        }
    }

    #[test]
    fn reset_clears_ledger() {
        let mut r = ModeResolver::seeded(1);
        assert!(r.decide(Mode::FixedIndex(1), 1, FaultCategory::Frame));
        r.reset();
        assert!(r.decide(Mode::FixedIndex(1), 1, FaultCategory::Frame));
    }

    #[test]
    fn parse_modes() {
        assert_eq!("none".parse::<Mode>().unwrap(), Mode::None);
        assert_eq!("Random".parse::<Mode>().unwrap(), Mode::Random);
        assert_eq!("fixed:3".parse::<Mode>().unwrap(), Mode::FixedIndex(3));
        assert_eq!("user:5".parse::<Mode>().unwrap(), Mode::FixedIndex(5));
        assert_eq!("kth:4".parse::<Mode>().unwrap(), Mode::EveryKth(4));
        assert_eq!("every: 6".parse::<Mode>().unwrap(), Mode::EveryKth(6));
    }

    #[test]
    fn parse_clamps_out_of_range() {
        assert_eq!("fixed:0".parse::<Mode>().unwrap(), Mode::FixedIndex(1));
        assert_eq!("kth:1".parse::<Mode>().unwrap(), Mode::EveryKth(2));
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "sometimes", "fixed", "kth:x", "none:3", "fixed:-1"] {
            assert_eq!(
                bad.parse::<Mode>(),
                Err(SimError::InvalidMode(bad.to_string())),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        for mode in [Mode::None, Mode::Random, Mode::FixedIndex(2), Mode::EveryKth(5)] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
    }
}

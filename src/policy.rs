//! What the worker owes a record once its message has been relayed

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use eyre::eyre;

use crate::types::NextAction;

/// Chooses the directive stored on a record when it becomes `Relayed`
pub trait CyclePolicy: Send + Sync + fmt::Debug {
    /// Directive for an L1 record whose deposit was relayed on L2
    fn after_deposit_relayed(&self) -> NextAction;

    /// Directive for an L2 record whose withdrawal was relayed on L1
    fn after_withdrawal_relayed(&self) -> NextAction;
}

/// Bridge the same amount back and forth forever: every relayed deposit is
/// followed by a withdrawal and every relayed withdrawal by a deposit.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundTrip;

impl CyclePolicy for RoundTrip {
    fn after_deposit_relayed(&self) -> NextAction {
        NextAction::Withdraw
    }

    fn after_withdrawal_relayed(&self) -> NextAction {
        NextAction::Deposit
    }
}

/// Only track transfers; never submit a follow-up leg
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackOnly;

impl CyclePolicy for TrackOnly {
    fn after_deposit_relayed(&self) -> NextAction {
        NextAction::None
    }

    fn after_withdrawal_relayed(&self) -> NextAction {
        NextAction::None
    }
}

/// Configured policy selection (`CYCLE_MODE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleMode {
    #[default]
    RoundTrip,
    TrackOnly,
}

impl CycleMode {
    pub fn policy(&self) -> Arc<dyn CyclePolicy> {
        match self {
            CycleMode::RoundTrip => Arc::new(RoundTrip),
            CycleMode::TrackOnly => Arc::new(TrackOnly),
        }
    }
}

impl fmt::Display for CycleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleMode::RoundTrip => f.write_str("round-trip"),
            CycleMode::TrackOnly => f.write_str("track-only"),
        }
    }
}

impl FromStr for CycleMode {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "round-trip" | "roundtrip" => Ok(CycleMode::RoundTrip),
            "track-only" | "trackonly" => Ok(CycleMode::TrackOnly),
            other => Err(eyre!(
                "unknown cycle mode '{}', expected round-trip or track-only",
                other
            )),
        }
    }
}

//! Common types shared by the store, scanner, worker and watcher
//!
//! `Status` is the layer-independent view of a record's progress. The
//! per-layer status enums in `store::models` are what actually gets persisted;
//! they convert into `Status` for logging, metrics and ordering checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transaction hash / message hash type used throughout the tracker
pub use alloy::primitives::B256 as TxHash;

/// Which chain a transaction was submitted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Layer {
    L1,
    L2,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::L1 => "L1",
            Layer::L2 => "L2",
        }
    }

    /// The layer a cross-domain message sent from this layer is executed on
    pub fn counterpart(&self) -> Layer {
        match self {
            Layer::L1 => Layer::L2,
            Layer::L2 => Layer::L1,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L1" => Ok(Layer::L1),
            "L2" => Ok(Layer::L2),
            other => Err(eyre::eyre!("unknown layer '{}', expected L1 or L2", other)),
        }
    }
}

/// Lifecycle position of a transfer record
///
/// Variants are declared in lifecycle order so that `Ord` doubles as the
/// "only moves forward" check. L1 records skip `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    Sent,
    Waiting,
    Ready,
    Relayed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Sent => "Sent",
            Status::Waiting => "Waiting",
            Status::Ready => "Ready",
            Status::Relayed => "Relayed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effect the worker owes a record, consumed exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NextAction {
    #[default]
    None,
    Withdraw,
    Deposit,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::None => "None",
            NextAction::Withdraw => "Withdraw",
            NextAction::Deposit => "Deposit",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, NextAction::None)
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

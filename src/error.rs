//! Typed errors for the per-record taxonomy
//!
//! Everything that is not a terminal verdict about a record (RPC failures,
//! submission failures, I/O) travels as `eyre::Report` instead.

use thiserror::Error;

use crate::types::{Layer, TxHash};

/// Terminal verdicts that remove a record from the store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("{layer} transaction {tx_hash} not found")]
    NotFound { layer: Layer, tx_hash: TxHash },

    #[error("{layer} transaction {tx_hash} reverted")]
    Reverted { layer: Layer, tx_hash: TxHash },

    #[error("{layer} transaction {tx_hash} carries no cross-domain message")]
    NotCrossDomain { layer: Layer, tx_hash: TxHash },
}

impl TransferError {
    /// Short label used for metrics and log fields
    pub fn reason(&self) -> &'static str {
        match self {
            TransferError::NotFound { .. } => "not_found",
            TransferError::Reverted { .. } => "reverted",
            TransferError::NotCrossDomain { .. } => "not_cross_domain",
        }
    }

    pub fn tx_hash(&self) -> TxHash {
        match self {
            TransferError::NotFound { tx_hash, .. }
            | TransferError::Reverted { tx_hash, .. }
            | TransferError::NotCrossDomain { tx_hash, .. } => *tx_hash,
        }
    }
}

/// Errors raised by the transfer store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store file {0} does not exist")]
    Missing(String),

    #[error("transfer {0} is already tracked")]
    Duplicate(TxHash),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

//! Persisted transfer records
//!
//! A record is a tagged variant per layer, so an L1 record can never hold an
//! inclusion cache or sit in `Ready`. The JSON layout keeps the camelCase
//! field names of the pending-transactions file:
//!
//! ```json
//! {
//!   "txHash": "0x…",
//!   "createdAt": "2024-01-01T00:00:00Z",
//!   "layer": "L2",
//!   "status": "Waiting",
//!   "stateBatchTxHash": "0x…",
//!   "stateBatchBlockNumber": 1234,
//!   "stateBatchInclusionTimestamp": 1700000000,
//!   "nextAction": "None"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Layer, NextAction, Status, TxHash};

/// Status set of an L1 (deposit side) record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositStatus {
    Sent,
    Waiting,
    Relayed,
}

impl From<DepositStatus> for Status {
    fn from(status: DepositStatus) -> Self {
        match status {
            DepositStatus::Sent => Status::Sent,
            DepositStatus::Waiting => Status::Waiting,
            DepositStatus::Relayed => Status::Relayed,
        }
    }
}

impl TryFrom<Status> for DepositStatus {
    type Error = Status;

    fn try_from(status: Status) -> Result<Self, Self::Error> {
        match status {
            Status::Sent => Ok(DepositStatus::Sent),
            Status::Waiting => Ok(DepositStatus::Waiting),
            Status::Relayed => Ok(DepositStatus::Relayed),
            Status::Ready => Err(status),
        }
    }
}

/// Status set of an L2 (withdrawal side) record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Sent,
    Waiting,
    Ready,
    Relayed,
}

impl From<WithdrawalStatus> for Status {
    fn from(status: WithdrawalStatus) -> Self {
        match status {
            WithdrawalStatus::Sent => Status::Sent,
            WithdrawalStatus::Waiting => Status::Waiting,
            WithdrawalStatus::Ready => Status::Ready,
            WithdrawalStatus::Relayed => Status::Relayed,
        }
    }
}

impl From<Status> for WithdrawalStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Sent => WithdrawalStatus::Sent,
            Status::Waiting => WithdrawalStatus::Waiting,
            Status::Ready => WithdrawalStatus::Ready,
            Status::Relayed => WithdrawalStatus::Relayed,
        }
    }
}

/// L1 transaction that sends a message to L2 (a deposit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositLeg {
    pub status: DepositStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_tx_hash: Option<TxHash>,
    #[serde(default)]
    pub next_action: NextAction,
    /// L2 block the next relay lookup starts from; earlier blocks were
    /// already searched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_search_from: Option<u64>,
    /// L2 transaction whose execution of the message failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_relay_tx_hash: Option<TxHash>,
}

/// L2 transaction that sends a message to L1 (a withdrawal)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalLeg {
    pub status: WithdrawalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_batch_tx_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_batch_block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_batch_inclusion_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_tx_hash: Option<TxHash>,
    #[serde(default)]
    pub next_action: NextAction,
}

/// Memoized result of the batch inclusion lookup for an L2 transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateBatchInclusion {
    /// L1 transaction that appended the state batch
    pub tx_hash: TxHash,
    /// L1 block containing that transaction
    pub block_number: u64,
    /// Timestamp of that L1 block, start of the challenge period
    pub timestamp: u64,
}

impl WithdrawalLeg {
    /// Cached inclusion, only when every part of it was stored
    pub fn inclusion(&self) -> Option<StateBatchInclusion> {
        match (
            self.state_batch_tx_hash,
            self.state_batch_block_number,
            self.state_batch_inclusion_timestamp,
        ) {
            (Some(tx_hash), Some(block_number), Some(timestamp)) => Some(StateBatchInclusion {
                tx_hash,
                block_number,
                timestamp,
            }),
            _ => None,
        }
    }

    pub fn set_inclusion(&mut self, inclusion: StateBatchInclusion) {
        self.state_batch_tx_hash = Some(inclusion.tx_hash);
        self.state_batch_block_number = Some(inclusion.block_number);
        self.state_batch_inclusion_timestamp = Some(inclusion.timestamp);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layer")]
pub enum TransferLeg {
    L1(DepositLeg),
    L2(WithdrawalLeg),
}

/// One tracked transaction of a bridge transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub tx_hash: TxHash,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub leg: TransferLeg,
}

impl TransferRecord {
    /// New record in `Sent` for a freshly submitted transaction
    pub fn new(tx_hash: TxHash, layer: Layer) -> Self {
        let leg = match layer {
            Layer::L1 => TransferLeg::L1(DepositLeg {
                status: DepositStatus::Sent,
                msg_hash: None,
                relay_tx_hash: None,
                next_action: NextAction::None,
                relay_search_from: None,
                failed_relay_tx_hash: None,
            }),
            Layer::L2 => TransferLeg::L2(WithdrawalLeg {
                status: WithdrawalStatus::Sent,
                state_batch_tx_hash: None,
                state_batch_block_number: None,
                state_batch_inclusion_timestamp: None,
                msg_hash: None,
                relay_tx_hash: None,
                next_action: NextAction::None,
            }),
        };

        Self {
            tx_hash,
            created_at: Utc::now(),
            leg,
        }
    }

    pub fn layer(&self) -> Layer {
        match self.leg {
            TransferLeg::L1(_) => Layer::L1,
            TransferLeg::L2(_) => Layer::L2,
        }
    }

    pub fn status(&self) -> Status {
        match &self.leg {
            TransferLeg::L1(leg) => leg.status.into(),
            TransferLeg::L2(leg) => leg.status.into(),
        }
    }

    pub fn next_action(&self) -> NextAction {
        match &self.leg {
            TransferLeg::L1(leg) => leg.next_action,
            TransferLeg::L2(leg) => leg.next_action,
        }
    }

    pub fn set_next_action(&mut self, action: NextAction) {
        match &mut self.leg {
            TransferLeg::L1(leg) => leg.next_action = action,
            TransferLeg::L2(leg) => leg.next_action = action,
        }
    }

    pub fn msg_hash(&self) -> Option<TxHash> {
        match &self.leg {
            TransferLeg::L1(leg) => leg.msg_hash,
            TransferLeg::L2(leg) => leg.msg_hash,
        }
    }

    /// Cache the message hash resolved from the transaction receipt
    pub fn set_msg_hash(&mut self, msg_hash: TxHash) {
        match &mut self.leg {
            TransferLeg::L1(leg) => leg.msg_hash = Some(msg_hash),
            TransferLeg::L2(leg) => leg.msg_hash = Some(msg_hash),
        }
    }

    /// Cached batch inclusion, always None for L1 records
    pub fn inclusion(&self) -> Option<StateBatchInclusion> {
        match &self.leg {
            TransferLeg::L1(_) => None,
            TransferLeg::L2(leg) => leg.inclusion(),
        }
    }

    /// Cache the batch inclusion. Returns false for L1 records.
    pub fn cache_inclusion(&mut self, inclusion: StateBatchInclusion) -> bool {
        match &mut self.leg {
            TransferLeg::L1(_) => false,
            TransferLeg::L2(leg) => {
                leg.set_inclusion(inclusion);
                true
            }
        }
    }

    pub fn relay_tx_hash(&self) -> Option<TxHash> {
        match &self.leg {
            TransferLeg::L1(leg) => leg.relay_tx_hash,
            TransferLeg::L2(leg) => leg.relay_tx_hash,
        }
    }

    /// Lowest destination-layer block a relay of this record's message can
    /// still be in, when known.
    ///
    /// For a withdrawal that is the L1 block of its state batch: the relay
    /// needs the batch. For a deposit it is where the previous lookup left off.
    pub fn relay_search_from(&self) -> Option<u64> {
        match &self.leg {
            TransferLeg::L1(leg) => leg.relay_search_from,
            TransferLeg::L2(leg) => leg.state_batch_block_number,
        }
    }

    /// Move a deposit's relay search floor up to `block`. Never moves it back.
    pub fn raise_relay_search_from(&mut self, block: u64) -> bool {
        match &mut self.leg {
            TransferLeg::L1(leg) if leg.relay_search_from.map_or(true, |from| from < block) => {
                leg.relay_search_from = Some(block);
                true
            }
            _ => false,
        }
    }

    pub fn failed_relay_tx_hash(&self) -> Option<TxHash> {
        match &self.leg {
            TransferLeg::L1(leg) => leg.failed_relay_tx_hash,
            TransferLeg::L2(_) => None,
        }
    }

    /// Remember a failed L2 execution of a deposit's message.
    ///
    /// Returns true the first time a given relay transaction is noted.
    pub fn note_failed_relay(&mut self, relay_tx_hash: TxHash) -> bool {
        match &mut self.leg {
            TransferLeg::L1(leg) if leg.failed_relay_tx_hash != Some(relay_tx_hash) => {
                leg.failed_relay_tx_hash = Some(relay_tx_hash);
                true
            }
            _ => false,
        }
    }

    /// Move the record forward to `to`.
    ///
    /// Returns false and leaves the record untouched when `to` is not ahead
    /// of the current status or does not exist on this layer.
    pub fn advance(&mut self, to: Status) -> bool {
        if to <= self.status() {
            return false;
        }
        match &mut self.leg {
            TransferLeg::L1(leg) => match DepositStatus::try_from(to) {
                Ok(status) => {
                    leg.status = status;
                    true
                }
                Err(_) => false,
            },
            TransferLeg::L2(leg) => {
                leg.status = to.into();
                true
            }
        }
    }

    /// Mark the record relayed by `relay_tx_hash` with the follow-up directive
    pub fn mark_relayed(&mut self, relay_tx_hash: TxHash, next_action: NextAction) -> bool {
        if !self.advance(Status::Relayed) {
            return false;
        }
        match &mut self.leg {
            TransferLeg::L1(leg) => leg.relay_tx_hash = Some(relay_tx_hash),
            TransferLeg::L2(leg) => leg.relay_tx_hash = Some(relay_tx_hash),
        }
        self.set_next_action(next_action);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_sent() {
        let record = TransferRecord::new(TxHash::repeat_byte(1), Layer::L2);
        assert_eq!(record.layer(), Layer::L2);
        assert_eq!(record.status(), Status::Sent);
        assert!(record.next_action().is_none());
    }

    #[test]
    fn test_advance_refuses_regression() {
        let mut record = TransferRecord::new(TxHash::repeat_byte(1), Layer::L2);
        assert!(record.advance(Status::Ready));
        assert!(!record.advance(Status::Waiting));
        assert!(!record.advance(Status::Ready));
        assert_eq!(record.status(), Status::Ready);
    }

    #[test]
    fn test_l1_record_cannot_be_ready() {
        let mut record = TransferRecord::new(TxHash::repeat_byte(1), Layer::L1);
        assert!(record.advance(Status::Waiting));
        assert!(!record.advance(Status::Ready));
        assert_eq!(record.status(), Status::Waiting);
    }

    #[test]
    fn test_mark_relayed_sets_hash_and_directive() {
        let mut record = TransferRecord::new(TxHash::repeat_byte(1), Layer::L1);
        record.advance(Status::Waiting);
        assert!(record.mark_relayed(TxHash::repeat_byte(0xb), NextAction::Withdraw));
        assert_eq!(record.relay_tx_hash(), Some(TxHash::repeat_byte(0xb)));
        assert_eq!(record.next_action(), NextAction::Withdraw);
        // A second relay observation does not overwrite the first
        assert!(!record.mark_relayed(TxHash::repeat_byte(0xc), NextAction::None));
        assert_eq!(record.relay_tx_hash(), Some(TxHash::repeat_byte(0xb)));
    }

    #[test]
    fn test_json_layout() {
        let mut record = TransferRecord::new(TxHash::repeat_byte(2), Layer::L2);
        if let TransferLeg::L2(leg) = &mut record.leg {
            leg.set_inclusion(StateBatchInclusion {
                tx_hash: TxHash::repeat_byte(3),
                block_number: 10,
                timestamp: 1_700_000_000,
            });
        }

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["layer"], "L2");
        assert_eq!(value["status"], "Sent");
        assert_eq!(value["nextAction"], "None");
        assert_eq!(value["stateBatchInclusionTimestamp"], 1_700_000_000u64);
        assert!(value.get("relayTxHash").is_none());

        let decoded: TransferRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_unknown_status_does_not_decode() {
        let value = serde_json::json!({
            "txHash": TxHash::repeat_byte(4),
            "createdAt": "2024-01-01T00:00:00Z",
            "layer": "L1",
            "status": "Ready",
        });
        assert!(serde_json::from_value::<TransferRecord>(value).is_err());
    }

    #[test]
    fn test_partial_inclusion_is_not_cached() {
        let leg = WithdrawalLeg {
            status: WithdrawalStatus::Waiting,
            state_batch_tx_hash: Some(TxHash::repeat_byte(3)),
            state_batch_block_number: None,
            state_batch_inclusion_timestamp: Some(5),
            msg_hash: None,
            relay_tx_hash: None,
            next_action: NextAction::None,
        };
        assert!(leg.inclusion().is_none());
    }

    #[test]
    fn test_relay_search_floor() {
        let mut deposit = TransferRecord::new(TxHash::repeat_byte(1), Layer::L1);
        assert_eq!(deposit.relay_search_from(), None);
        assert!(deposit.raise_relay_search_from(4_900));
        assert!(!deposit.raise_relay_search_from(4_000));
        assert_eq!(deposit.relay_search_from(), Some(4_900));

        let mut withdrawal = TransferRecord::new(TxHash::repeat_byte(2), Layer::L2);
        assert!(!withdrawal.raise_relay_search_from(10));
        withdrawal.cache_inclusion(StateBatchInclusion {
            tx_hash: TxHash::repeat_byte(3),
            block_number: 50,
            timestamp: 5_000,
        });
        assert_eq!(withdrawal.relay_search_from(), Some(50));
    }

    #[test]
    fn test_failed_relay_is_noted_once() {
        let mut deposit = TransferRecord::new(TxHash::repeat_byte(1), Layer::L1);
        assert!(deposit.note_failed_relay(TxHash::repeat_byte(0xf)));
        assert!(!deposit.note_failed_relay(TxHash::repeat_byte(0xf)));
        assert_eq!(deposit.failed_relay_tx_hash(), Some(TxHash::repeat_byte(0xf)));

        let value = serde_json::to_value(&deposit).unwrap();
        assert_eq!(value["failedRelayTxHash"], serde_json::json!(TxHash::repeat_byte(0xf)));
        assert!(value.get("relaySearchFrom").is_none());
    }
}

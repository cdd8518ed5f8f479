//! Scanner: advances records by querying chain state
//!
//! A pass locks the store, loads it, visits every record that existed when
//! the pass started and saves once at the end if anything changed. Errors
//! while looking at one record (RPC failures, proof service hiccups) leave
//! that record untouched and never abort the pass.
//!
//! L1 records: `Sent -> Waiting -> Relayed`. A deposit that becomes `Waiting`
//! is checked for its L2 relay in the same pass.
//!
//! L2 records: `Sent -> Waiting -> Ready`. `Waiting` resolves the state batch
//! inclusion once, then holds the record until the challenge window measured
//! in L1 chain time has passed. `Ready` belongs to the worker.

use std::sync::Arc;
use std::time::Instant;

use eyre::Result;
use tracing::{debug, info, warn};

use crate::chain::Chains;
use crate::error::TransferError;
use crate::metrics;
use crate::policy::CyclePolicy;
use crate::store::{SharedStore, StateBatchInclusion, TransferRecord};
use crate::types::{Layer, NextAction, Status, TxHash};

/// Blocks below the previous head searched again by the next relay lookup,
/// for endpoints lagging behind the one that reported the head
const RELAY_SEARCH_OVERLAP: u64 = 100;

/// Outcome of looking at one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Remove(TransferError),
}

/// What became of a `Sent` transaction
#[derive(Debug, Clone, PartialEq, Eq)]
enum SentCheck {
    /// Known to the node but not mined yet
    Pending,
    Confirmed,
    Gone(TransferError),
}

/// Counters of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub visited: usize,
    pub advanced: usize,
    pub removed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Scanner {
    chains: Chains,
    store: SharedStore,
    policy: Arc<dyn CyclePolicy>,
    challenge_window_secs: u64,
}

impl Scanner {
    pub fn new(
        chains: Chains,
        store: SharedStore,
        policy: Arc<dyn CyclePolicy>,
        challenge_window_secs: u64,
    ) -> Self {
        Self {
            chains,
            store,
            policy,
            challenge_window_secs,
        }
    }

    /// One scheduled pass over every record
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let started = Instant::now();
        let summary = self.scan_where(|_| true).await?;

        metrics::record_pass("scanner", started.elapsed().as_secs_f64());
        info!(
            visited = summary.visited,
            advanced = summary.advanced,
            removed = summary.removed,
            failed = summary.failed,
            "Scanner pass complete"
        );
        Ok(summary)
    }

    /// Step every record matching `filter`, under the store lock
    pub async fn scan_where<F>(&self, filter: F) -> Result<PassSummary>
    where
        F: Fn(&TransferRecord) -> bool,
    {
        let store = self.store.lock().await?;
        let mut transfers = store.load()?;
        let original = transfers.clone();
        let mut summary = PassSummary::default();

        // Records appended while the pass runs wait for the next one
        for tx_hash in transfers.hashes() {
            let Some(record) = transfers.get_mut(&tx_hash) else {
                continue;
            };
            if !filter(&*record) {
                continue;
            }
            summary.visited += 1;

            let layer = record.layer();
            let before = record.status();
            let verdict = self.step(record).await;
            let moved = record.status() != before;

            match verdict {
                Ok(Verdict::Keep) => {
                    if moved {
                        summary.advanced += 1;
                    }
                }
                Ok(Verdict::Remove(reason)) => {
                    warn!(
                        tx_hash = %tx_hash,
                        layer = %layer,
                        status = %before,
                        reason = reason.reason(),
                        "Removing transfer: {}",
                        reason
                    );
                    metrics::record_dropped(reason.reason());
                    transfers.remove(&tx_hash);
                    summary.removed += 1;
                }
                Err(e) => {
                    warn!(
                        tx_hash = %tx_hash,
                        layer = %layer,
                        status = %before,
                        error = %format!("{:#}", e),
                        "Could not check transfer, keeping it for the next pass"
                    );
                    summary.failed += 1;
                }
            }
        }

        if transfers != original {
            store.save(&transfers)?;
        }
        metrics::set_open_records(&transfers);

        Ok(summary)
    }

    /// Advance one record as far as chain state allows.
    ///
    /// `Err` means the state could not be read; the record is left as is.
    pub async fn step(&self, record: &mut TransferRecord) -> Result<Verdict> {
        match record.layer() {
            Layer::L1 => self.step_deposit(record).await,
            Layer::L2 => self.step_withdrawal(record).await,
        }
    }

    async fn step_deposit(&self, record: &mut TransferRecord) -> Result<Verdict> {
        if record.status() == Status::Sent {
            match self.confirm_sent(Layer::L1, record.tx_hash).await? {
                SentCheck::Pending => return Ok(Verdict::Keep),
                SentCheck::Gone(reason) => return Ok(Verdict::Remove(reason)),
                SentCheck::Confirmed => {
                    transition(record, Status::Waiting);
                }
            }
        }

        if record.status() != Status::Waiting {
            return Ok(Verdict::Keep);
        }

        let Some(msg_hash) = self.resolve_msg_hash(record).await? else {
            return Ok(Verdict::Remove(TransferError::NotCrossDomain {
                layer: Layer::L1,
                tx_hash: record.tx_hash,
            }));
        };

        // Read before the search so the next one can start here
        let head = self.chains.l2.block_number().await?;
        match self
            .chains
            .gateway
            .receipt_for_message(Layer::L2, msg_hash, false, record.relay_search_from())
            .await?
        {
            Some(receipt) if receipt.success => {
                mark_relayed(record, receipt.tx_hash, self.policy.after_deposit_relayed());
            }
            Some(receipt) => {
                if record.note_failed_relay(receipt.tx_hash) {
                    warn!(
                        tx_hash = %record.tx_hash,
                        msg_hash = %msg_hash,
                        relay_tx_hash = %receipt.tx_hash,
                        "Deposit message failed on L2, waiting for a successful relay"
                    );
                    metrics::record_failed_relay(Layer::L1);
                }
                record.raise_relay_search_from(head.saturating_sub(RELAY_SEARCH_OVERLAP));
            }
            None => {
                debug!(tx_hash = %record.tx_hash, msg_hash = %msg_hash, "Deposit not relayed on L2 yet");
                record.raise_relay_search_from(head.saturating_sub(RELAY_SEARCH_OVERLAP));
            }
        }

        Ok(Verdict::Keep)
    }

    async fn step_withdrawal(&self, record: &mut TransferRecord) -> Result<Verdict> {
        match record.status() {
            Status::Sent => match self.confirm_sent(Layer::L2, record.tx_hash).await? {
                SentCheck::Pending => Ok(Verdict::Keep),
                SentCheck::Gone(reason) => Ok(Verdict::Remove(reason)),
                SentCheck::Confirmed => {
                    // The batch cannot contain it yet; look again next pass
                    transition(record, Status::Waiting);
                    Ok(Verdict::Keep)
                }
            },
            Status::Waiting => self.check_challenge_period(record).await,
            Status::Ready | Status::Relayed => Ok(Verdict::Keep),
        }
    }

    async fn check_challenge_period(&self, record: &mut TransferRecord) -> Result<Verdict> {
        let inclusion = match record.inclusion() {
            Some(inclusion) => inclusion,
            None => match self.resolve_inclusion(record.tx_hash).await? {
                Some(inclusion) => {
                    record.cache_inclusion(inclusion);
                    inclusion
                }
                None => {
                    debug!(tx_hash = %record.tx_hash, "Withdrawal not in a state batch yet");
                    return Ok(Verdict::Keep);
                }
            },
        };

        let now = self.chains.l1.latest_block_timestamp().await?;
        let elapsed = now.saturating_sub(inclusion.timestamp);
        if elapsed < self.challenge_window_secs {
            debug!(
                tx_hash = %record.tx_hash,
                batch_tx_hash = %inclusion.tx_hash,
                remaining_secs = self.challenge_window_secs - elapsed,
                "Challenge period still running"
            );
            return Ok(Verdict::Keep);
        }

        if self.resolve_msg_hash(record).await?.is_none() {
            return Ok(Verdict::Remove(TransferError::NotCrossDomain {
                layer: Layer::L2,
                tx_hash: record.tx_hash,
            }));
        }

        transition(record, Status::Ready);
        Ok(Verdict::Keep)
    }

    async fn confirm_sent(&self, layer: Layer, tx_hash: TxHash) -> Result<SentCheck> {
        let client = self.chains.client(layer);

        if client.transaction(tx_hash).await?.is_none() {
            return Ok(SentCheck::Gone(TransferError::NotFound { layer, tx_hash }));
        }

        Ok(match client.receipt(tx_hash).await? {
            None => SentCheck::Pending,
            Some(receipt) if !receipt.success => {
                SentCheck::Gone(TransferError::Reverted { layer, tx_hash })
            }
            Some(_) => SentCheck::Confirmed,
        })
    }

    async fn resolve_inclusion(&self, tx_hash: TxHash) -> Result<Option<StateBatchInclusion>> {
        let Some(batch) = self.chains.proofs.batch_inclusion_for_l2_tx(tx_hash).await? else {
            return Ok(None);
        };
        let timestamp = self.chains.l1.block_timestamp(batch.block_number).await?;

        Ok(Some(StateBatchInclusion {
            tx_hash: batch.l1_tx_hash,
            block_number: batch.block_number,
            timestamp,
        }))
    }

    /// Cached message hash, resolving and caching it on first use
    async fn resolve_msg_hash(&self, record: &mut TransferRecord) -> Result<Option<TxHash>> {
        resolve_msg_hash(&self.chains, record).await
    }
}

pub(crate) async fn resolve_msg_hash(
    chains: &Chains,
    record: &mut TransferRecord,
) -> Result<Option<TxHash>> {
    if let Some(msg_hash) = record.msg_hash() {
        return Ok(Some(msg_hash));
    }
    let resolved = chains.message_hash(record.layer(), record.tx_hash).await?;
    if let Some(msg_hash) = resolved {
        record.set_msg_hash(msg_hash);
    }
    Ok(resolved)
}

/// Move `record` forward, logging and counting the transition
pub(crate) fn transition(record: &mut TransferRecord, to: Status) -> bool {
    let from = record.status();
    if !record.advance(to) {
        return false;
    }
    info!(
        tx_hash = %record.tx_hash,
        layer = %record.layer(),
        from = %from,
        to = %to,
        "Transfer advanced"
    );
    metrics::record_transition(record.layer(), to);
    true
}

pub(crate) fn mark_relayed(
    record: &mut TransferRecord,
    relay_tx_hash: TxHash,
    next_action: NextAction,
) -> bool {
    let from = record.status();
    if !record.mark_relayed(relay_tx_hash, next_action) {
        return false;
    }
    info!(
        tx_hash = %record.tx_hash,
        layer = %record.layer(),
        from = %from,
        relay_tx_hash = %relay_tx_hash,
        next_action = %next_action,
        "Transfer relayed"
    );
    metrics::record_transition(record.layer(), Status::Relayed);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_refuses_regression() {
        let mut record = TransferRecord::new(TxHash::repeat_byte(1), Layer::L2);
        assert!(transition(&mut record, Status::Waiting));
        assert!(!transition(&mut record, Status::Sent));
        assert!(!transition(&mut record, Status::Waiting));
        assert_eq!(record.status(), Status::Waiting);
    }

    #[test]
    fn test_mark_relayed_only_once() {
        let mut record = TransferRecord::new(TxHash::repeat_byte(1), Layer::L1);
        transition(&mut record, Status::Waiting);
        assert!(mark_relayed(&mut record, TxHash::repeat_byte(2), NextAction::Withdraw));
        assert!(!mark_relayed(&mut record, TxHash::repeat_byte(3), NextAction::Withdraw));
        assert_eq!(record.relay_tx_hash(), Some(TxHash::repeat_byte(2)));
    }
}

//! Worker: performs the side effects records are waiting for
//!
//! Two kinds of work per pass:
//! - `Ready` L2 records get their messages relayed on L1 and become `Relayed`.
//! - `Relayed` records carrying a directive get the follow-up leg submitted.
//!   The new transaction is appended as `Sent` and the directive is cleared
//!   in the same save, so a directive produces exactly one leg.
//!
//! A failure leaves the record as it was and the next pass tries again.

pub mod relay;
pub mod retry;

use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::U256;
use eyre::{eyre, Result};
use tracing::{debug, error, info, warn};

use crate::chain::{Chains, Unconfirmed};
use crate::config::Config;
use crate::metrics;
use crate::policy::CyclePolicy;
use crate::scanner::{mark_relayed, resolve_msg_hash};
use crate::store::{SharedStore, TransferRecord};
use crate::types::{Layer, NextAction, Status, TxHash};

pub use retry::{classify_error, with_retry, RetryConfig};

/// Counters of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkSummary {
    pub relayed: usize,
    pub submitted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Worker {
    chains: Chains,
    store: SharedStore,
    policy: Arc<dyn CyclePolicy>,
    amount: U256,
    submit_retry: RetryConfig,
    proof_retry: RetryConfig,
}

impl Worker {
    pub fn new(
        chains: Chains,
        store: SharedStore,
        policy: Arc<dyn CyclePolicy>,
        amount: U256,
        submit_retry: RetryConfig,
        proof_retry: RetryConfig,
    ) -> Self {
        Self {
            chains,
            store,
            policy,
            amount,
            submit_retry,
            proof_retry,
        }
    }

    pub fn from_config(chains: Chains, store: SharedStore, config: &Config) -> Self {
        Self::new(
            chains,
            store,
            config.cycle.mode.policy(),
            config.cycle.amount,
            RetryConfig::submissions(&config.retry),
            RetryConfig::proofs(&config.retry),
        )
    }

    /// One scheduled pass over every record
    pub async fn run_pass(&self) -> Result<WorkSummary> {
        let started = Instant::now();
        let store = self.store.lock().await?;
        let mut transfers = store.load()?;
        let mut summary = WorkSummary::default();

        for tx_hash in transfers.hashes() {
            let Some(record) = transfers.get_mut(&tx_hash) else {
                continue;
            };

            if record.layer() == Layer::L2 && record.status() == Status::Ready {
                match self.finalize_withdrawal(record).await {
                    Ok(()) => {
                        summary.relayed += 1;
                        store.save(&transfers)?;
                    }
                    Err(e) => {
                        error!(
                            tx_hash = %tx_hash,
                            error = %format!("{:#}", e),
                            "Failed to finalize withdrawal, leaving it Ready"
                        );
                        summary.failed += 1;
                        continue;
                    }
                }
            }

            let Some(record) = transfers.get(&tx_hash) else {
                continue;
            };
            let action = record.next_action();
            if record.status() != Status::Relayed || action.is_none() {
                continue;
            }

            match self.perform(action).await {
                Ok((layer, new_tx_hash)) => {
                    if let Some(record) = transfers.get_mut(&tx_hash) {
                        record.set_next_action(NextAction::None);
                    }
                    if let Err(e) = transfers.insert(TransferRecord::new(new_tx_hash, layer)) {
                        warn!(tx_hash = %new_tx_hash, error = %e, "Follow-up transfer already tracked");
                    }
                    store.save(&transfers)?;

                    info!(
                        tx_hash = %tx_hash,
                        action = %action,
                        new_tx_hash = %new_tx_hash,
                        layer = %layer,
                        "Follow-up transfer submitted"
                    );
                    summary.submitted += 1;
                }
                Err(e) => {
                    error!(
                        tx_hash = %tx_hash,
                        action = %action,
                        error = %format!("{:#}", e),
                        "Failed to submit follow-up transfer, keeping the directive"
                    );
                    summary.failed += 1;
                }
            }
        }

        metrics::set_open_records(&transfers);
        metrics::record_pass("worker", started.elapsed().as_secs_f64());
        info!(
            relayed = summary.relayed,
            submitted = summary.submitted,
            failed = summary.failed,
            "Worker pass complete"
        );
        Ok(summary)
    }

    /// Mark every `Ready` record whose message was already relayed on L1.
    ///
    /// Submits nothing. Returns the number of records that moved.
    pub async fn reconcile_ready(&self) -> Result<usize> {
        let store = self.store.lock().await?;
        let mut transfers = store.load()?;
        let original = transfers.clone();
        let mut moved = 0;

        for tx_hash in transfers.hashes() {
            let Some(record) = transfers.get_mut(&tx_hash) else {
                continue;
            };
            if record.layer() != Layer::L2 || record.status() != Status::Ready {
                continue;
            }
            match detect_existing_relay(&self.chains, self.policy.as_ref(), record).await {
                Ok(true) => moved += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(tx_hash = %tx_hash, error = %format!("{:#}", e), "Relay lookup failed");
                }
            }
        }

        if transfers != original {
            store.save(&transfers)?;
        }
        metrics::set_open_records(&transfers);
        Ok(moved)
    }

    async fn finalize_withdrawal(&self, record: &mut TransferRecord) -> Result<()> {
        if detect_existing_relay(&self.chains, self.policy.as_ref(), record).await? {
            return Ok(());
        }

        let result = relay::relay_messages(
            &self.chains,
            &self.submit_retry,
            &self.proof_retry,
            record.tx_hash,
            record.relay_search_from(),
        )
        .await;
        metrics::record_side_effect("relay", result.is_ok());

        let relay_tx_hash = result?;
        mark_relayed(record, relay_tx_hash, self.policy.after_withdrawal_relayed());
        Ok(())
    }

    /// Submit the leg `action` asks for; returns its layer and hash.
    ///
    /// A transaction that was broadcast but whose receipt could not be read
    /// is returned as submitted. The scanner drops it if it never lands.
    async fn perform(&self, action: NextAction) -> Result<(Layer, TxHash)> {
        let wallet = self.chains.gateway.wallet_address();
        let amount = self.amount;
        let gateway = self.chains.gateway.clone();

        let (layer, result) = match action {
            NextAction::None => return Err(eyre!("No follow-up action to perform")),
            NextAction::Withdraw => {
                let result = with_retry(&self.submit_retry, "withdraw", |_attempt| {
                    let gateway = gateway.clone();
                    async move { gateway.withdraw_to(wallet, amount).await }
                })
                .await;
                (Layer::L2, result)
            }
            NextAction::Deposit => {
                let result = with_retry(&self.submit_retry, "deposit", |_attempt| {
                    let gateway = gateway.clone();
                    async move { gateway.deposit_to(wallet, amount).await }
                })
                .await;
                (Layer::L1, result)
            }
        };

        let label = action.as_str().to_lowercase();
        match result {
            Ok(tx_hash) => {
                metrics::record_side_effect(&label, true);
                Ok((layer, tx_hash))
            }
            Err(e) => match e.downcast_ref::<Unconfirmed>() {
                Some(unconfirmed) => {
                    warn!(
                        tx_hash = %unconfirmed.tx_hash,
                        action = %action,
                        reason = %unconfirmed.reason,
                        "Submission not confirmed, tracking it anyway"
                    );
                    metrics::record_side_effect(&label, true);
                    Ok((layer, unconfirmed.tx_hash))
                }
                None => {
                    metrics::record_side_effect(&label, false);
                    Err(e)
                }
            },
        }
    }
}

/// Mark an L2 `Ready` record `Relayed` if every message it sent already has
/// a successful relay on L1.
///
/// A withdrawal may carry several messages; one relayed message out of two
/// leaves the record `Ready` for the worker to relay the rest. The record
/// points at the relay of its last message.
///
/// Shared by the worker and the event watcher, so both reach the same state
/// for the same chain data.
pub async fn detect_existing_relay(
    chains: &Chains,
    policy: &dyn CyclePolicy,
    record: &mut TransferRecord,
) -> Result<bool> {
    let Some(first) = resolve_msg_hash(chains, record).await? else {
        return Ok(false);
    };

    let mut msg_hashes = chains
        .gateway
        .message_hashes_from_l2_tx(record.tx_hash)
        .await?;
    if msg_hashes.is_empty() {
        msg_hashes.push(first);
    }

    let from_block = record.relay_search_from();
    let mut last_relay = None;
    for msg_hash in msg_hashes {
        match chains
            .gateway
            .receipt_for_message(Layer::L1, msg_hash, true, from_block)
            .await?
        {
            Some(receipt) => last_relay = Some(receipt.tx_hash),
            None => {
                debug!(tx_hash = %record.tx_hash, msg_hash = %msg_hash, "Message not relayed on L1 yet");
                return Ok(false);
            }
        }
    }

    let Some(relay_tx_hash) = last_relay else {
        return Ok(false);
    };
    Ok(mark_relayed(
        record,
        relay_tx_hash,
        policy.after_withdrawal_relayed(),
    ))
}

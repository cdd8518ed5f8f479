//! Finalizing withdrawals on L1
//!
//! A withdrawal transaction may carry several messages. Each one is relayed
//! only if no successful relay of it exists yet, so running this twice for
//! the same record never submits a second relay.

use std::time::Duration;

use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info, warn};

use super::retry::{with_retry, RetryConfig};
use crate::chain::{Chains, MessagePair, ProofError};
use crate::types::{Layer, TxHash};

/// Message/proof pairs for `tx_hash`, waiting out "not ready yet" answers.
///
/// The proof service is asked at most `max_retries + 1` times. Anything other
/// than "not ready" fails immediately.
pub async fn fetch_message_proofs(
    chains: &Chains,
    retry: &RetryConfig,
    tx_hash: TxHash,
) -> Result<Vec<MessagePair>> {
    let mut attempt = 0u32;

    loop {
        match chains.proofs.messages_and_proofs_for_l2_tx(tx_hash).await {
            Ok(pairs) if pairs.is_empty() => {
                return Err(eyre!("No cross-domain messages found for L2 tx {}", tx_hash));
            }
            Ok(pairs) => return Ok(pairs),
            Err(ProofError::NotReady(reason)) => {
                if !retry.should_retry(attempt) {
                    return Err(eyre!(
                        "Proof for L2 tx {} still not ready after {} attempt(s): {}",
                        tx_hash,
                        attempt + 1,
                        reason
                    ));
                }
                let backoff: Duration = retry.backoff_for_attempt(attempt);
                debug!(
                    tx_hash = %tx_hash,
                    attempt = attempt + 1,
                    ?backoff,
                    "Proof not ready, waiting"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(ProofError::Failed(e)) => {
                return Err(e).wrap_err_with(|| format!("Proof lookup for L2 tx {} failed", tx_hash));
            }
        }
    }
}

/// Relay every message of `tx_hash` that has not been relayed yet.
///
/// Existing relays are searched for from L1 block `from_block` on, when
/// given. Returns the relay transaction of the last message, whether
/// submitted now or found on chain.
pub async fn relay_messages(
    chains: &Chains,
    submit_retry: &RetryConfig,
    proof_retry: &RetryConfig,
    tx_hash: TxHash,
    from_block: Option<u64>,
) -> Result<TxHash> {
    let pairs = fetch_message_proofs(chains, proof_retry, tx_hash).await?;
    let mut last_relay = None;

    for pair in &pairs {
        let msg_hash = pair.message.hash();

        if let Some(existing) = chains
            .gateway
            .receipt_for_message(Layer::L1, msg_hash, true, from_block)
            .await?
        {
            debug!(
                tx_hash = %tx_hash,
                msg_hash = %msg_hash,
                relay_tx_hash = %existing.tx_hash,
                "Message already relayed"
            );
            last_relay = Some(existing.tx_hash);
            continue;
        }

        let gateway = chains.gateway.clone();
        let relay_tx_hash = with_retry(submit_retry, "relay", |attempt| {
            let gateway = gateway.clone();
            let pair = pair.clone();
            async move {
                if attempt > 0 {
                    warn!(msg_hash = %msg_hash, attempt, "Retrying relay");
                }
                gateway.relay_message(&pair.message, &pair.proof).await
            }
        })
        .await
        .wrap_err_with(|| format!("Relay of message {} from L2 tx {} failed", msg_hash, tx_hash))?;

        info!(
            tx_hash = %tx_hash,
            msg_hash = %msg_hash,
            relay_tx_hash = %relay_tx_hash,
            "Message relayed on L1"
        );
        last_relay = Some(relay_tx_hash);
    }

    last_relay.ok_or_else(|| eyre!("No messages relayed for L2 tx {}", tx_hash))
}

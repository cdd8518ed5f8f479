//! Batch inclusion lookups and the external message proof endpoint
//!
//! Inclusion is read straight from `StateBatchAppended` events of the state
//! commitment chain. Message/proof pairs need Merkle and storage proofs, which
//! come from a proof service over HTTP:
//!
//! `GET {PROOF_SERVICE_URL}/l2-tx/{hash}/messages` returns
//! `{"messages": [{"message": {...}, "proof": {...}}]}`. A `425 Too Early`, or
//! an error mentioning a missing state root batch, means "not ready yet".

use alloy::primitives::{B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{BlockNumberOrTag, Filter};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{BatchInclusion, MessagePair, ProofError, ProofService};
use crate::config::Config;
use crate::contracts::optimism::StateCommitmentChain;
use crate::rpc_fallback::FallbackProviders;
use crate::types::TxHash;

const NOT_READY_MARKER: &str = "unable to find state root batch";

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<MessagePair>,
    #[serde(default)]
    error: Option<String>,
}

/// One `StateBatchAppended` event
#[derive(Debug, Clone, Copy)]
struct StateBatch {
    prev_total_elements: u64,
    batch_size: u64,
    inclusion: BatchInclusion,
}

impl StateBatch {
    fn contains(&self, index: u64) -> bool {
        index >= self.prev_total_elements && index < self.prev_total_elements + self.batch_size
    }
}

pub struct HttpProofService {
    l1: FallbackProviders,
    l2: FallbackProviders,
    state_commitment_chain: alloy::primitives::Address,
    l2_genesis_blocks: u64,
    base_url: String,
    http: Client,
}

impl HttpProofService {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            l1: FallbackProviders::new("L1", &config.l1.all_rpc_urls())?,
            l2: FallbackProviders::new("L2", &config.l2.all_rpc_urls())?,
            state_commitment_chain: config.bridge.l1_state_commitment_chain,
            l2_genesis_blocks: config.bridge.l2_genesis_blocks,
            base_url: config.bridge.proof_service_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn batch_by_index(&self, batch_index: u64) -> Result<Option<StateBatch>> {
        let filter = Filter::new()
            .address(self.state_commitment_chain)
            .event_signature(StateCommitmentChain::StateBatchAppended::SIGNATURE_HASH)
            .topic1(B256::from(U256::from(batch_index)))
            .from_block(BlockNumberOrTag::Earliest)
            .to_block(BlockNumberOrTag::Latest);

        let logs = self
            .l1
            .call("get_logs", |provider| {
                let filter = filter.clone();
                async move { Ok(provider.get_logs(&filter).await?) }
            })
            .await?;

        let Some(log) = logs.into_iter().next() else {
            return Ok(None);
        };

        let decoded = log
            .log_decode::<StateCommitmentChain::StateBatchAppended>()
            .wrap_err("Failed to decode StateBatchAppended")?;
        let event = &decoded.inner.data;

        Ok(Some(StateBatch {
            prev_total_elements: event._prevTotalElements.saturating_to(),
            batch_size: event._batchSize.saturating_to(),
            inclusion: BatchInclusion {
                l1_tx_hash: log
                    .transaction_hash
                    .ok_or_else(|| eyre!("Missing transaction hash"))?,
                block_number: log
                    .block_number
                    .ok_or_else(|| eyre!("Missing block number"))?,
            },
        }))
    }

    /// Binary search over batches for the one holding element `index`
    async fn batch_for_element(&self, index: u64) -> Result<Option<StateBatch>> {
        let scc = self.state_commitment_chain;
        let total: u64 = self
            .l1
            .call("getTotalBatches", |provider| async move {
                let contract = StateCommitmentChain::new(scc, &provider);
                let result = contract
                    .getTotalBatches()
                    .call()
                    .await
                    .map_err(|e| eyre!("Failed to get total batches: {}", e))?;
                Ok(result._totalBatches.saturating_to())
            })
            .await?;

        if total == 0 {
            return Ok(None);
        }

        // Most lookups are for recent transactions, check the newest batch first
        let last = match self.batch_by_index(total - 1).await? {
            Some(batch) => batch,
            None => return Ok(None),
        };
        if index >= last.prev_total_elements {
            return Ok(last.contains(index).then_some(last));
        }

        let (mut lo, mut hi) = (0u64, total - 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let Some(batch) = self.batch_by_index(mid).await? else {
                return Ok(None);
            };
            if batch.contains(index) {
                return Ok(Some(batch));
            }
            if index < batch.prev_total_elements {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl ProofService for HttpProofService {
    async fn batch_inclusion_for_l2_tx(&self, tx_hash: TxHash) -> Result<Option<BatchInclusion>> {
        let tx = self
            .l2
            .call("get_transaction_by_hash", |provider| async move {
                Ok(provider.get_transaction_by_hash(tx_hash).await?)
            })
            .await?;

        let Some(block_number) = tx.and_then(|tx| tx.block_number) else {
            return Ok(None);
        };
        let Some(index) = block_number.checked_sub(self.l2_genesis_blocks) else {
            return Ok(None);
        };

        let batch = self.batch_for_element(index).await?;
        if let Some(batch) = &batch {
            debug!(
                tx_hash = %tx_hash,
                element = index,
                l1_tx_hash = %batch.inclusion.l1_tx_hash,
                l1_block = batch.inclusion.block_number,
                "Found state batch for L2 transaction"
            );
        }

        Ok(batch.map(|b| b.inclusion))
    }

    async fn messages_and_proofs_for_l2_tx(
        &self,
        tx_hash: TxHash,
    ) -> std::result::Result<Vec<MessagePair>, ProofError> {
        let url = format!("{}/l2-tx/{}/messages", self.base_url, tx_hash);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ProofError::Failed(eyre!("Proof service request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProofError::Failed(eyre!("Failed to read proof service response: {}", e)))?;

        classify_response(status, &body)
    }
}

fn classify_response(
    status: StatusCode,
    body: &str,
) -> std::result::Result<Vec<MessagePair>, ProofError> {
    if status == StatusCode::TOO_EARLY || body.contains(NOT_READY_MARKER) {
        return Err(ProofError::NotReady(body.trim().to_string()));
    }

    if !status.is_success() {
        return Err(ProofError::Failed(eyre!(
            "Proof service returned {}: {}",
            status,
            body.trim()
        )));
    }

    let parsed: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| ProofError::Failed(eyre!("Invalid proof service response: {}", e)))?;

    if let Some(error) = parsed.error {
        return Err(ProofError::Failed(eyre!("Proof service error: {}", error)));
    }

    Ok(parsed.messages)
}

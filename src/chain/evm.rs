//! alloy-backed `ChainClient`

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};

use super::{ChainClient, TransactionInfo, TxReceipt};
use crate::config::ChainConfig;
use crate::contracts::optimism::ERC20;
use crate::rpc_fallback::{FallbackProviders, HttpProvider};
use crate::types::{Layer, TxHash};

/// Fetch logs matching `filter` in `[from_block, to_block]`, chunked into
/// ranges of at most `max_block_range` blocks.
pub async fn get_logs_chunked(
    provider: &HttpProvider,
    filter: &Filter,
    from_block: u64,
    to_block: u64,
    max_block_range: u64,
) -> Result<Vec<Log>> {
    let mut all_logs = Vec::new();
    let mut current_from = from_block;
    let step = max_block_range.max(1);

    while current_from <= to_block {
        let current_to = std::cmp::min(current_from + step - 1, to_block);

        let chunk = filter.clone().from_block(current_from).to_block(current_to);
        let logs = provider.get_logs(&chunk).await.wrap_err_with(|| {
            format!(
                "Failed to get logs from block {} to {}",
                current_from, current_to
            )
        })?;

        all_logs.extend(logs);
        current_from = current_to + 1;
    }

    Ok(all_logs)
}

/// Read-only client for one chain
#[derive(Debug, Clone)]
pub struct EvmChainClient {
    layer: Layer,
    providers: FallbackProviders,
}

impl EvmChainClient {
    pub fn new(layer: Layer, config: &ChainConfig) -> Result<Self> {
        let providers = FallbackProviders::new(layer.as_str(), &config.all_rpc_urls())?;
        Ok(Self { layer, providers })
    }

    pub fn providers(&self) -> &FallbackProviders {
        &self.providers
    }

    async fn block_timestamp_at(&self, number: BlockNumberOrTag) -> Result<u64> {
        let layer = self.layer;
        self.providers
            .call("get_block_by_number", |provider| async move {
                let block = provider
                    .get_block_by_number(number, BlockTransactionsKind::Hashes)
                    .await?
                    .ok_or_else(|| eyre!("{} block {} not found", layer, number))?;
                Ok(block.header.timestamp)
            })
            .await
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn layer(&self) -> Layer {
        self.layer
    }

    async fn transaction(&self, tx_hash: TxHash) -> Result<Option<TransactionInfo>> {
        self.providers
            .call("get_transaction_by_hash", |provider| async move {
                let tx = provider.get_transaction_by_hash(tx_hash).await?;
                Ok(tx.map(|tx| TransactionInfo {
                    tx_hash,
                    block_number: tx.block_number,
                }))
            })
            .await
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>> {
        self.providers
            .call("get_transaction_receipt", |provider| async move {
                let receipt = provider.get_transaction_receipt(tx_hash).await?;
                Ok(receipt.map(|receipt| TxReceipt {
                    tx_hash,
                    block_number: receipt.block_number.unwrap_or_default(),
                    success: receipt.status(),
                }))
            })
            .await
    }

    async fn block_number(&self) -> Result<u64> {
        self.providers
            .call("get_block_number", |provider| async move {
                Ok(provider.get_block_number().await?)
            })
            .await
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64> {
        self.block_timestamp_at(BlockNumberOrTag::Number(block_number))
            .await
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        self.block_timestamp_at(BlockNumberOrTag::Latest).await
    }

    async fn balance(&self, owner: Address) -> Result<U256> {
        self.providers
            .call("get_balance", |provider| async move {
                Ok(provider.get_balance(owner).await?)
            })
            .await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        self.providers
            .call("balanceOf", |provider| async move {
                let contract = ERC20::new(token, &provider);
                let result = contract
                    .balanceOf(owner)
                    .call()
                    .await
                    .map_err(|e| eyre!("Failed to get ERC20 balance: {}", e))?;
                Ok(result._0)
            })
            .await
    }
}

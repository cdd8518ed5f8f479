//! Standard bridge and cross-domain messenger gateway
//!
//! Uses Alloy's `ProviderBuilder::with_recommended_fillers()` to populate
//! nonce, gas and fees on every submission. Submissions wait for the receipt
//! and fail on revert, so a returned hash always belongs to a mined,
//! successful transaction.

use alloy::network::EthereumWallet;
use alloy::primitives::{keccak256, Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info};

use super::evm::get_logs_chunked;
use super::{BridgeGateway, CrossDomainMessage, MessageProof, TxReceipt, Unconfirmed};
use crate::config::{BridgeConfig, Config};
use crate::contracts::optimism::{
    CrossDomainMessenger, L1StandardBridge, L2MessageInclusionProof, L2StandardBridge, ERC20,
};
use crate::contracts::L2_ETH_TOKEN;
use crate::rpc_fallback::FallbackProviders;
use crate::types::{Layer, TxHash};

/// Signing gateway for both layers
pub struct OptimismGateway {
    signer: PrivateKeySigner,
    l1_rpc_url: String,
    l2_rpc_url: String,
    l1: FallbackProviders,
    l2: FallbackProviders,
    bridge: BridgeConfig,
    l1_gas_limit: u32,
    l2_gas_limit: u32,
    max_block_range: u64,
}

impl OptimismGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let signer: PrivateKeySigner = config
            .bridge
            .private_key
            .parse()
            .wrap_err("Invalid private key")?;

        info!(
            wallet = %signer.address(),
            l1_bridge = %config.bridge.l1_standard_bridge,
            l2_bridge = %config.bridge.l2_standard_bridge,
            eth = config.bridge.bridges_eth(),
            "Bridge gateway initialized"
        );

        Ok(Self {
            signer,
            l1_rpc_url: config.l1.rpc_url.clone(),
            l2_rpc_url: config.l2.rpc_url.clone(),
            l1: FallbackProviders::new("L1", &config.l1.all_rpc_urls())?,
            l2: FallbackProviders::new("L2", &config.l2.all_rpc_urls())?,
            bridge: config.bridge.clone(),
            l1_gas_limit: config.cycle.l1_gas_limit,
            l2_gas_limit: config.cycle.l2_gas_limit,
            max_block_range: config.watcher.max_block_range,
        })
    }

    fn wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }

    fn providers(&self, layer: Layer) -> &FallbackProviders {
        match layer {
            Layer::L1 => &self.l1,
            Layer::L2 => &self.l2,
        }
    }

    fn messenger(&self, layer: Layer) -> Address {
        match layer {
            Layer::L1 => self.bridge.l1_messenger,
            Layer::L2 => self.bridge.l2_messenger,
        }
    }

    /// Hashes of the `SentMessage` logs emitted by the messenger on `layer`
    async fn message_hashes_from_tx(&self, layer: Layer, tx_hash: TxHash) -> Result<Vec<TxHash>> {
        let messenger = self.messenger(layer);
        let receipt = self
            .providers(layer)
            .call("get_transaction_receipt", |provider| async move {
                Ok(provider.get_transaction_receipt(tx_hash).await?)
            })
            .await?;

        let Some(receipt) = receipt else {
            return Ok(Vec::new());
        };

        let mut hashes = Vec::new();
        for log in receipt.inner.logs() {
            if log.address() != messenger {
                continue;
            }
            if log.topics().first() != Some(&CrossDomainMessenger::SentMessage::SIGNATURE_HASH) {
                continue;
            }
            let decoded = log
                .log_decode::<CrossDomainMessenger::SentMessage>()
                .wrap_err("Failed to decode SentMessage")?;
            let msg_hash = keccak256(&decoded.inner.data.message);
            debug!(layer = %layer, tx_hash = %tx_hash, msg_hash = %msg_hash, "Found cross-domain message");
            hashes.push(msg_hash);
        }

        Ok(hashes)
    }
}

/// First block of a relay log search ending at `head`
fn relay_search_floor(head: u64, lookback: u64, from_block: Option<u64>) -> u64 {
    match from_block {
        Some(from) => from.min(head),
        None => head.saturating_sub(lookback),
    }
}

/// Relay outcome carried by a messenger log, if it concerns `msg_hash`
fn relay_outcome(log: &Log, msg_hash: TxHash, strict: bool) -> Option<bool> {
    let topic = log.topics().first()?;
    if *topic == CrossDomainMessenger::RelayedMessage::SIGNATURE_HASH {
        let decoded = log
            .log_decode::<CrossDomainMessenger::RelayedMessage>()
            .ok()?;
        (decoded.inner.data.msgHash == msg_hash).then_some(true)
    } else if !strict && *topic == CrossDomainMessenger::FailedRelayedMessage::SIGNATURE_HASH {
        let decoded = log
            .log_decode::<CrossDomainMessenger::FailedRelayedMessage>()
            .ok()?;
        (decoded.inner.data.msgHash == msg_hash).then_some(false)
    } else {
        None
    }
}

#[async_trait]
impl BridgeGateway for OptimismGateway {
    fn wallet_address(&self) -> Address {
        self.signer.address()
    }

    async fn deposit_to(&self, to: Address, amount: U256) -> Result<TxHash> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet())
            .on_http(self.l1_rpc_url.parse().wrap_err("Invalid L1 RPC URL")?);

        let bridge = L1StandardBridge::new(self.bridge.l1_standard_bridge, &provider);

        let pending = match (self.bridge.l1_token, self.bridge.l2_token) {
            (Some(l1_token), Some(l2_token)) => {
                let token = ERC20::new(l1_token, &provider);
                let approve = token
                    .approve(self.bridge.l1_standard_bridge, amount)
                    .send()
                    .await
                    .map_err(|e| eyre!("Failed to send approve tx: {}", e))?;
                let approve_hash = *approve.tx_hash();
                let receipt = approve
                    .get_receipt()
                    .await
                    .map_err(|e| eyre!("Failed to get approve receipt: {}", e))?;
                if !receipt.status() {
                    return Err(eyre!("Approve transaction {} reverted", approve_hash));
                }
                debug!(tx_hash = %approve_hash, "L1 token approved for the standard bridge");

                bridge
                    .depositERC20To(l1_token, l2_token, to, amount, self.l2_gas_limit, Bytes::new())
                    .send()
                    .await
            }
            _ => {
                bridge
                    .depositETHTo(to, self.l2_gas_limit, Bytes::new())
                    .value(amount)
                    .send()
                    .await
            }
        }
        .map_err(|e| eyre!("Failed to send deposit tx: {}", e))?;

        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, amount = %amount, "Deposit transaction sent");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| Unconfirmed {
                what: "deposit",
                tx_hash,
                reason: e.to_string(),
            })?;
        if !receipt.status() {
            return Err(eyre!("Deposit transaction {} reverted", tx_hash));
        }

        Ok(tx_hash)
    }

    async fn withdraw_to(&self, to: Address, amount: U256) -> Result<TxHash> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet())
            .on_http(self.l2_rpc_url.parse().wrap_err("Invalid L2 RPC URL")?);

        let bridge = L2StandardBridge::new(self.bridge.l2_standard_bridge, &provider);
        let l2_token = self.bridge.l2_token.unwrap_or(L2_ETH_TOKEN);

        let pending = bridge
            .withdrawTo(l2_token, to, amount, self.l1_gas_limit, Bytes::new())
            .send()
            .await
            .map_err(|e| eyre!("Failed to send withdraw tx: {}", e))?;

        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, amount = %amount, "Withdraw transaction sent");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| Unconfirmed {
                what: "withdraw",
                tx_hash,
                reason: e.to_string(),
            })?;
        if !receipt.status() {
            return Err(eyre!("Withdraw transaction {} reverted", tx_hash));
        }

        Ok(tx_hash)
    }

    async fn relay_message(
        &self,
        message: &CrossDomainMessage,
        proof: &MessageProof,
    ) -> Result<TxHash> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet())
            .on_http(self.l1_rpc_url.parse().wrap_err("Invalid L1 RPC URL")?);

        let messenger = CrossDomainMessenger::new(self.bridge.l1_messenger, &provider);

        let pending = messenger
            .relayMessage(
                message.target,
                message.sender,
                message.message.clone(),
                message.message_nonce,
                L2MessageInclusionProof::from(proof),
            )
            .send()
            .await
            .map_err(|e| eyre!("Failed to send relay tx: {}", e))?;

        let tx_hash = *pending.tx_hash();
        debug!(tx_hash = %tx_hash, msg_hash = %message.hash(), "Relay transaction sent");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| Unconfirmed {
                what: "relay",
                tx_hash,
                reason: e.to_string(),
            })?;
        if !receipt.status() {
            return Err(eyre!("Relay transaction {} reverted", tx_hash));
        }

        Ok(tx_hash)
    }

    async fn message_hash_from_l1_tx(&self, tx_hash: TxHash) -> Result<Option<TxHash>> {
        let hashes = self.message_hashes_from_tx(Layer::L1, tx_hash).await?;
        Ok(hashes.first().copied())
    }

    async fn message_hash_from_l2_tx(&self, tx_hash: TxHash) -> Result<Option<TxHash>> {
        let hashes = self.message_hashes_from_tx(Layer::L2, tx_hash).await?;
        Ok(hashes.first().copied())
    }

    async fn message_hashes_from_l2_tx(&self, tx_hash: TxHash) -> Result<Vec<TxHash>> {
        self.message_hashes_from_tx(Layer::L2, tx_hash).await
    }

    async fn receipt_for_message(
        &self,
        destination: Layer,
        msg_hash: TxHash,
        strict: bool,
        from_block: Option<u64>,
    ) -> Result<Option<TxReceipt>> {
        let mut signatures = vec![CrossDomainMessenger::RelayedMessage::SIGNATURE_HASH];
        if !strict {
            signatures.push(CrossDomainMessenger::FailedRelayedMessage::SIGNATURE_HASH);
        }
        let filter = Filter::new()
            .address(self.messenger(destination))
            .event_signature(signatures);

        let lookback = self.bridge.message_lookback_blocks;
        let max_block_range = self.max_block_range;
        let logs = self
            .providers(destination)
            .call("get_logs", |provider| {
                let filter = filter.clone();
                async move {
                    let head = provider
                        .get_block_number()
                        .await
                        .wrap_err("Failed to get block number")?;
                    let from = relay_search_floor(head, lookback, from_block);
                    debug!(
                        layer = %destination,
                        msg_hash = %msg_hash,
                        from_block = from,
                        to_block = head,
                        "Searching relay logs"
                    );
                    get_logs_chunked(&provider, &filter, from, head, max_block_range).await
                }
            })
            .await?;

        // A successful relay wins over earlier failed attempts
        let mut failed = None;
        for log in &logs {
            let Some(success) = relay_outcome(log, msg_hash, strict) else {
                continue;
            };
            let Some(tx_hash) = log.transaction_hash else {
                continue;
            };
            let receipt = TxReceipt {
                tx_hash,
                block_number: log.block_number.unwrap_or_default(),
                success,
            };
            if success {
                return Ok(Some(receipt));
            }
            failed.get_or_insert(receipt);
        }

        Ok(failed)
    }
}

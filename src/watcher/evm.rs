//! Standard bridge log polling
//!
//! The cursor lives in memory only. After a restart the first poll looks back
//! `WATCHER_LOOKBACK_BLOCKS` blocks; replaying events is harmless since the
//! scanner decides every transition from chain state.

use alloy::primitives::{Address, B256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tracing::debug;

use super::{BridgeEvent, EventSource};
use crate::chain::evm::get_logs_chunked;
use crate::config::Config;
use crate::contracts::optimism::{L1StandardBridge, L2StandardBridge};
use crate::contracts::L2_ETH_TOKEN;
use crate::rpc_fallback::FallbackProviders;
use crate::types::Layer;

/// Which bridge events belong to us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    /// Address that initiated the transfer
    pub initiator: Address,
    /// (L1 token, L2 token); None when ETH is bridged
    pub tokens: Option<(Address, Address)>,
}

impl EventFilter {
    fn is_eth(&self) -> bool {
        self.tokens.is_none()
    }

    /// ERC-20 event for our pair, initiated by us
    fn matches_erc20(&self, l1_token: Address, l2_token: Address, from: Address) -> bool {
        from == self.initiator && self.tokens == Some((l1_token, l2_token))
    }

    /// L2 event, where ETH shows up as the L2 ETH token
    fn matches_l2(&self, l1_token: Address, l2_token: Address, from: Address) -> bool {
        if self.is_eth() {
            from == self.initiator && l2_token == L2_ETH_TOKEN
        } else {
            self.matches_erc20(l1_token, l2_token, from)
        }
    }
}

/// Decode a standard bridge log into the event it stands for, if it is ours
pub fn decode_log(layer: Layer, log: &Log, filter: &EventFilter) -> Option<BridgeEvent> {
    let tx_hash = log.transaction_hash?;
    let topic = *log.topics().first()?;

    match layer {
        Layer::L1 => {
            if topic == L1StandardBridge::ETHDepositInitiated::SIGNATURE_HASH {
                let event = log.log_decode::<L1StandardBridge::ETHDepositInitiated>().ok()?;
                let ours = filter.is_eth() && event.inner.data._from == filter.initiator;
                ours.then_some(BridgeEvent::DepositInitiated { tx_hash })
            } else if topic == L1StandardBridge::ERC20DepositInitiated::SIGNATURE_HASH {
                let event = log.log_decode::<L1StandardBridge::ERC20DepositInitiated>().ok()?;
                let data = &event.inner.data;
                filter
                    .matches_erc20(data._l1Token, data._l2Token, data._from)
                    .then_some(BridgeEvent::DepositInitiated { tx_hash })
            } else if topic == L1StandardBridge::ETHWithdrawalFinalized::SIGNATURE_HASH {
                let event = log.log_decode::<L1StandardBridge::ETHWithdrawalFinalized>().ok()?;
                let ours = filter.is_eth() && event.inner.data._from == filter.initiator;
                ours.then_some(BridgeEvent::WithdrawalFinalized { tx_hash })
            } else if topic == L1StandardBridge::ERC20WithdrawalFinalized::SIGNATURE_HASH {
                let event = log
                    .log_decode::<L1StandardBridge::ERC20WithdrawalFinalized>()
                    .ok()?;
                let data = &event.inner.data;
                filter
                    .matches_erc20(data._l1Token, data._l2Token, data._from)
                    .then_some(BridgeEvent::WithdrawalFinalized { tx_hash })
            } else {
                None
            }
        }
        Layer::L2 => {
            if topic == L2StandardBridge::WithdrawalInitiated::SIGNATURE_HASH {
                let event = log.log_decode::<L2StandardBridge::WithdrawalInitiated>().ok()?;
                let data = &event.inner.data;
                filter
                    .matches_l2(data._l1Token, data._l2Token, data._from)
                    .then_some(BridgeEvent::WithdrawalInitiated { tx_hash })
            } else if topic == L2StandardBridge::DepositFinalized::SIGNATURE_HASH {
                let event = log.log_decode::<L2StandardBridge::DepositFinalized>().ok()?;
                let data = &event.inner.data;
                filter
                    .matches_l2(data._l1Token, data._l2Token, data._from)
                    .then_some(BridgeEvent::DepositFinalized { tx_hash })
            } else {
                None
            }
        }
    }
}

fn signatures(layer: Layer) -> Vec<B256> {
    match layer {
        Layer::L1 => vec![
            L1StandardBridge::ETHDepositInitiated::SIGNATURE_HASH,
            L1StandardBridge::ERC20DepositInitiated::SIGNATURE_HASH,
            L1StandardBridge::ETHWithdrawalFinalized::SIGNATURE_HASH,
            L1StandardBridge::ERC20WithdrawalFinalized::SIGNATURE_HASH,
        ],
        Layer::L2 => vec![
            L2StandardBridge::WithdrawalInitiated::SIGNATURE_HASH,
            L2StandardBridge::DepositFinalized::SIGNATURE_HASH,
        ],
    }
}

/// Blocks to poll given the last polled block and the current head.
///
/// None when the head has not moved past the cursor, which is also what an
/// endpoint lagging behind the cursor reports.
fn poll_range(cursor: Option<u64>, head: u64, lookback_blocks: u64) -> Option<(u64, u64)> {
    let from_block = match cursor {
        Some(cursor) => cursor + 1,
        None => head.saturating_sub(lookback_blocks),
    };
    (from_block <= head).then_some((from_block, head))
}

/// Polls one layer's standard bridge for our events
pub struct EvmEventSource {
    layer: Layer,
    providers: FallbackProviders,
    bridge: Address,
    filter: EventFilter,
    lookback_blocks: u64,
    max_block_range: u64,
    cursor: Option<u64>,
}

impl EvmEventSource {
    pub fn new(layer: Layer, config: &Config, initiator: Address) -> Result<Self> {
        let (chain, bridge) = match layer {
            Layer::L1 => (&config.l1, config.bridge.l1_standard_bridge),
            Layer::L2 => (&config.l2, config.bridge.l2_standard_bridge),
        };
        let tokens = config.bridge.l1_token.zip(config.bridge.l2_token);

        Ok(Self {
            layer,
            providers: FallbackProviders::new(layer.as_str(), &chain.all_rpc_urls())?,
            bridge,
            filter: EventFilter { initiator, tokens },
            lookback_blocks: config.watcher.lookback_blocks,
            max_block_range: config.watcher.max_block_range,
            cursor: None,
        })
    }
}

#[async_trait]
impl EventSource for EvmEventSource {
    fn layer(&self) -> Layer {
        self.layer
    }

    async fn poll(&mut self) -> Result<Vec<BridgeEvent>> {
        let filter = Filter::new()
            .address(self.bridge)
            .event_signature(signatures(self.layer));
        let cursor = self.cursor;
        let lookback_blocks = self.lookback_blocks;
        let max_block_range = self.max_block_range;

        // Head and logs come from the same endpoint
        let polled = self
            .providers
            .call("get_logs", |provider| {
                let filter = filter.clone();
                async move {
                    let head = provider
                        .get_block_number()
                        .await
                        .wrap_err("Failed to get block number")?;
                    let Some((from_block, to_block)) = poll_range(cursor, head, lookback_blocks)
                    else {
                        return Ok(None);
                    };
                    let logs =
                        get_logs_chunked(&provider, &filter, from_block, to_block, max_block_range)
                            .await?;
                    Ok(Some((from_block, to_block, logs)))
                }
            })
            .await?;

        let Some((from_block, head, logs)) = polled else {
            return Ok(Vec::new());
        };

        let events: Vec<BridgeEvent> = logs
            .iter()
            .filter_map(|log| decode_log(self.layer, log, &self.filter))
            .collect();

        debug!(
            layer = %self.layer,
            from_block,
            to_block = head,
            logs = logs.len(),
            events = events.len(),
            "Polled bridge events"
        );

        self.cursor = Some(head);
        Ok(events)
    }
}

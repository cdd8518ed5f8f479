//! Chain access used by the tracker
//!
//! Everything the scanner, worker and watcher need from the outside world
//! goes through the three traits below. The alloy-backed implementations live
//! in the submodules; tests substitute in-memory fakes.

pub mod evm;
pub mod gateway;
pub mod proof;

use std::sync::Arc;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use eyre::Result;
use serde::Deserialize;
use thiserror::Error;

use crate::contracts::optimism;
use crate::types::{Layer, TxHash};

pub use evm::EvmChainClient;
pub use gateway::OptimismGateway;
pub use proof::HttpProofService;

/// A transaction as seen by `transaction(hash)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionInfo {
    pub tx_hash: TxHash,
    /// None while the transaction is still pending
    pub block_number: Option<u64>,
}

/// Outcome of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}

/// Where an L2 transaction's state root was committed on L1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchInclusion {
    pub l1_tx_hash: TxHash,
    pub block_number: u64,
}

/// A message sent through the cross-domain messenger
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossDomainMessage {
    pub target: Address,
    pub sender: Address,
    pub message: Bytes,
    pub message_nonce: U256,
}

impl CrossDomainMessage {
    /// Hash under which the destination messenger records the message
    pub fn hash(&self) -> TxHash {
        keccak256(self.calldata())
    }

    /// ABI encoding of `relayMessage(target, sender, message, nonce)`, the
    /// payload emitted by `SentMessage`
    pub fn calldata(&self) -> Vec<u8> {
        optimism::relayMessageCall {
            _target: self.target,
            _sender: self.sender,
            _message: self.message.clone(),
            _messageNonce: self.message_nonce,
        }
        .abi_encode()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchHeader {
    pub batch_index: U256,
    pub batch_root: B256,
    pub batch_size: U256,
    pub prev_total_elements: U256,
    pub extra_data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRootProof {
    pub index: U256,
    pub siblings: Vec<B256>,
}

/// Inclusion proof handed to the L1 messenger with a relayed message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProof {
    pub state_root: B256,
    pub state_root_batch_header: BatchHeader,
    pub state_root_proof: StateRootProof,
    pub state_trie_witness: Bytes,
    pub storage_trie_witness: Bytes,
}

impl From<&MessageProof> for optimism::L2MessageInclusionProof {
    fn from(proof: &MessageProof) -> Self {
        let header = &proof.state_root_batch_header;
        optimism::L2MessageInclusionProof {
            stateRoot: proof.state_root,
            stateRootBatchHeader: optimism::ChainBatchHeader {
                batchIndex: header.batch_index,
                batchRoot: header.batch_root,
                batchSize: header.batch_size,
                prevTotalElements: header.prev_total_elements,
                extraData: header.extra_data.clone(),
            },
            stateRootProof: optimism::ChainInclusionProof {
                index: proof.state_root_proof.index,
                siblings: proof.state_root_proof.siblings.clone(),
            },
            stateTrieWitness: proof.state_trie_witness.clone(),
            storageTrieWitness: proof.storage_trie_witness.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessagePair {
    pub message: CrossDomainMessage,
    pub proof: MessageProof,
}

/// Failure of a message/proof lookup
#[derive(Debug, Error)]
pub enum ProofError {
    /// The state root covering the transaction has not been published yet
    #[error("state root batch not published yet: {0}")]
    NotReady(String),

    #[error("proof lookup failed: {0:#}")]
    Failed(eyre::Report),
}

impl From<eyre::Report> for ProofError {
    fn from(e: eyre::Report) -> Self {
        ProofError::Failed(e)
    }
}

/// A submission that reached the mempool but whose receipt could not be read.
///
/// The transaction may still be mined, so the side effect counts as performed.
#[derive(Debug, Error)]
#[error("{what} transaction {tx_hash} already broadcast but not confirmed: {reason}")]
pub struct Unconfirmed {
    pub what: &'static str,
    pub tx_hash: TxHash,
    pub reason: String,
}

/// Read access to one chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn layer(&self) -> Layer;

    /// None when the node does not know the transaction at all
    async fn transaction(&self, tx_hash: TxHash) -> Result<Option<TransactionInfo>>;

    /// None while the transaction is not mined
    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>>;

    async fn block_number(&self) -> Result<u64>;

    async fn block_timestamp(&self, block_number: u64) -> Result<u64>;

    /// Timestamp of the latest block, the chain's notion of "now"
    async fn latest_block_timestamp(&self) -> Result<u64>;

    async fn balance(&self, owner: Address) -> Result<U256>;

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256>;
}

/// Bridge and messenger operations
#[async_trait]
pub trait BridgeGateway: Send + Sync {
    /// Address that signs every submission and receives every leg
    fn wallet_address(&self) -> Address;

    /// Submit an L1 -> L2 deposit of `amount` to `to`
    async fn deposit_to(&self, to: Address, amount: U256) -> Result<TxHash>;

    /// Submit an L2 -> L1 withdrawal of `amount` to `to`
    async fn withdraw_to(&self, to: Address, amount: U256) -> Result<TxHash>;

    /// Relay an L2 -> L1 message on L1, returning the successful relay tx
    async fn relay_message(&self, message: &CrossDomainMessage, proof: &MessageProof)
        -> Result<TxHash>;

    /// Hash of the first cross-domain message sent by an L1 transaction
    async fn message_hash_from_l1_tx(&self, tx_hash: TxHash) -> Result<Option<TxHash>>;

    /// Hash of the first cross-domain message sent by an L2 transaction
    async fn message_hash_from_l2_tx(&self, tx_hash: TxHash) -> Result<Option<TxHash>>;

    /// Hashes of every cross-domain message sent by an L2 transaction, in
    /// log order
    async fn message_hashes_from_l2_tx(&self, tx_hash: TxHash) -> Result<Vec<TxHash>>;

    /// Receipt of the transaction that relayed `msg_hash` on `destination`.
    ///
    /// With `strict` only successful relays count; otherwise a failed relay
    /// attempt is reported when no successful one exists. The search covers
    /// `from_block` up to the head, or the configured lookback below the head
    /// when no floor is known.
    async fn receipt_for_message(
        &self,
        destination: Layer,
        msg_hash: TxHash,
        strict: bool,
        from_block: Option<u64>,
    ) -> Result<Option<TxReceipt>>;
}

/// Batch inclusion and message proofs for L2 transactions
#[async_trait]
pub trait ProofService: Send + Sync {
    /// None while the transaction's state root is not in any batch
    async fn batch_inclusion_for_l2_tx(&self, tx_hash: TxHash) -> Result<Option<BatchInclusion>>;

    async fn messages_and_proofs_for_l2_tx(
        &self,
        tx_hash: TxHash,
    ) -> std::result::Result<Vec<MessagePair>, ProofError>;
}

/// Collaborators shared by the scanner, worker and watcher
#[derive(Clone)]
pub struct Chains {
    pub l1: Arc<dyn ChainClient>,
    pub l2: Arc<dyn ChainClient>,
    pub gateway: Arc<dyn BridgeGateway>,
    pub proofs: Arc<dyn ProofService>,
}

impl Chains {
    pub fn client(&self, layer: Layer) -> &Arc<dyn ChainClient> {
        match layer {
            Layer::L1 => &self.l1,
            Layer::L2 => &self.l2,
        }
    }

    /// Message hash of a transaction sent on `layer`
    pub async fn message_hash(&self, layer: Layer, tx_hash: TxHash) -> Result<Option<TxHash>> {
        match layer {
            Layer::L1 => self.gateway.message_hash_from_l1_tx(tx_hash).await,
            Layer::L2 => self.gateway.message_hash_from_l2_tx(tx_hash).await,
        }
    }
}

//! In-memory chain, gateway and proof service fakes shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};

use bridge_tracker::chain::{
    BatchHeader, BatchInclusion, BridgeGateway, ChainClient, Chains, CrossDomainMessage,
    MessagePair, MessageProof, ProofError, ProofService, StateRootProof, TransactionInfo,
    TxReceipt, Unconfirmed,
};
use bridge_tracker::policy::{CyclePolicy, RoundTrip};
use bridge_tracker::store::{SharedStore, TransferStore};
use bridge_tracker::worker::RetryConfig;
use bridge_tracker::{Layer, Scanner, TxHash, Worker};

pub const CHALLENGE_PERIOD: u64 = 100;
/// Block of relays added without an explicit one, above every search floor
pub const RELAY_BLOCK: u64 = 1_000_000;
pub const CHALLENGE_BUFFER: u64 = 15;

pub fn hash(byte: u8) -> TxHash {
    TxHash::repeat_byte(byte)
}

pub fn wallet() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        backoff_multiplier: 2.0,
    }
}

/// One chain: transactions, receipts and block times
pub struct MockChain {
    layer: Layer,
    transactions: Mutex<HashMap<TxHash, Option<u64>>>,
    receipts: Mutex<HashMap<TxHash, TxReceipt>>,
    block_timestamps: Mutex<HashMap<u64, u64>>,
    latest_timestamp: AtomicU64,
    fail_reads: AtomicBool,
}

impl MockChain {
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            transactions: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            block_timestamps: Mutex::new(HashMap::new()),
            latest_timestamp: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Known to the node, not mined
    pub fn pend(&self, tx_hash: TxHash) {
        self.transactions.lock().unwrap().insert(tx_hash, None);
    }

    pub fn mine(&self, tx_hash: TxHash, block_number: u64, success: bool) {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx_hash, Some(block_number));
        self.receipts.lock().unwrap().insert(
            tx_hash,
            TxReceipt {
                tx_hash,
                block_number,
                success,
            },
        );
    }

    pub fn set_block_timestamp(&self, block_number: u64, timestamp: u64) {
        self.block_timestamps
            .lock()
            .unwrap()
            .insert(block_number, timestamp);
    }

    pub fn set_latest_timestamp(&self, timestamp: u64) {
        self.latest_timestamp.store(timestamp, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(eyre!("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn layer(&self) -> Layer {
        self.layer
    }

    async fn transaction(&self, tx_hash: TxHash) -> Result<Option<TransactionInfo>> {
        self.check()?;
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .get(&tx_hash)
            .map(|block_number| TransactionInfo {
                tx_hash,
                block_number: *block_number,
            }))
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>> {
        self.check()?;
        Ok(self.receipts.lock().unwrap().get(&tx_hash).copied())
    }

    async fn block_number(&self) -> Result<u64> {
        self.check()?;
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .values()
            .map(|r| r.block_number)
            .max()
            .unwrap_or_default())
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64> {
        self.check()?;
        self.block_timestamps
            .lock()
            .unwrap()
            .get(&block_number)
            .copied()
            .ok_or_else(|| eyre!("block {} not found", block_number))
    }

    async fn latest_block_timestamp(&self) -> Result<u64> {
        self.check()?;
        Ok(self.latest_timestamp.load(Ordering::SeqCst))
    }

    async fn balance(&self, _owner: Address) -> Result<U256> {
        Ok(U256::ZERO)
    }

    async fn token_balance(&self, _token: Address, _owner: Address) -> Result<U256> {
        Ok(U256::ZERO)
    }
}

/// How the gateway answers submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Succeed,
    /// Reverts; never retried
    Revert,
    /// Broadcast but the receipt cannot be read
    Unconfirmed,
}

pub struct MockGateway {
    message_hashes: Mutex<HashMap<(Layer, TxHash), Vec<TxHash>>>,
    relays: Mutex<HashMap<(Layer, TxHash), TxReceipt>>,
    /// Messages whose next relay attempt reverts
    revert_once: Mutex<HashSet<TxHash>>,
    /// Search floor of every relay lookup, per destination layer
    pub lookups: Mutex<Vec<(Layer, Option<u64>)>>,
    pub deposits: Mutex<Vec<TxHash>>,
    pub withdrawals: Mutex<Vec<TxHash>>,
    pub relayed: Mutex<Vec<TxHash>>,
    submit_mode: Mutex<SubmitMode>,
    relay_mode: Mutex<SubmitMode>,
    /// Time a deposit or withdrawal takes after it is broadcast
    submit_delay: Mutex<Duration>,
    next_hash: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            message_hashes: Mutex::new(HashMap::new()),
            relays: Mutex::new(HashMap::new()),
            revert_once: Mutex::new(HashSet::new()),
            lookups: Mutex::new(Vec::new()),
            deposits: Mutex::new(Vec::new()),
            withdrawals: Mutex::new(Vec::new()),
            relayed: Mutex::new(Vec::new()),
            submit_mode: Mutex::new(SubmitMode::Succeed),
            relay_mode: Mutex::new(SubmitMode::Succeed),
            submit_delay: Mutex::new(Duration::ZERO),
            next_hash: AtomicU64::new(0x1000),
        }
    }

    pub fn set_message_hash(&self, layer: Layer, tx_hash: TxHash, msg_hash: TxHash) {
        self.set_message_hashes(layer, tx_hash, vec![msg_hash]);
    }

    pub fn set_message_hashes(&self, layer: Layer, tx_hash: TxHash, msg_hashes: Vec<TxHash>) {
        self.message_hashes
            .lock()
            .unwrap()
            .insert((layer, tx_hash), msg_hashes);
    }

    /// Make the next relay of `msg_hash` revert
    pub fn revert_relay_once(&self, msg_hash: TxHash) {
        self.revert_once.lock().unwrap().insert(msg_hash);
    }

    fn message_hashes(&self, layer: Layer, tx_hash: TxHash) -> Vec<TxHash> {
        self.message_hashes
            .lock()
            .unwrap()
            .get(&(layer, tx_hash))
            .cloned()
            .unwrap_or_default()
    }

    /// A relay of `msg_hash` on `destination` by `relay_tx_hash`
    pub fn add_relay(&self, destination: Layer, msg_hash: TxHash, relay_tx_hash: TxHash) {
        self.add_relay_at(destination, msg_hash, relay_tx_hash, RELAY_BLOCK, true);
    }

    /// A relay in `block_number`; `success` false stands for a failed execution
    pub fn add_relay_at(
        &self,
        destination: Layer,
        msg_hash: TxHash,
        relay_tx_hash: TxHash,
        block_number: u64,
        success: bool,
    ) {
        self.relays.lock().unwrap().insert(
            (destination, msg_hash),
            TxReceipt {
                tx_hash: relay_tx_hash,
                block_number,
                success,
            },
        );
    }

    pub fn set_submit_mode(&self, mode: SubmitMode) {
        *self.submit_mode.lock().unwrap() = mode;
    }

    pub fn set_relay_mode(&self, mode: SubmitMode) {
        *self.relay_mode.lock().unwrap() = mode;
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    async fn wait_for_receipt(&self) {
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn deposit_count(&self) -> usize {
        self.deposits.lock().unwrap().len()
    }

    pub fn withdrawal_count(&self) -> usize {
        self.withdrawals.lock().unwrap().len()
    }

    pub fn relay_count(&self) -> usize {
        self.relayed.lock().unwrap().len()
    }

    fn fresh_hash(&self) -> TxHash {
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
        TxHash::from(U256::from(n))
    }

    fn submit(&self, what: &'static str, mode: SubmitMode, log: &Mutex<Vec<TxHash>>) -> Result<TxHash> {
        match mode {
            SubmitMode::Revert => Err(eyre!("{} transaction reverted", what)),
            SubmitMode::Succeed => {
                let tx_hash = self.fresh_hash();
                log.lock().unwrap().push(tx_hash);
                Ok(tx_hash)
            }
            SubmitMode::Unconfirmed => {
                let tx_hash = self.fresh_hash();
                log.lock().unwrap().push(tx_hash);
                Err(Unconfirmed {
                    what,
                    tx_hash,
                    reason: "receipt request timed out".to_string(),
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl BridgeGateway for MockGateway {
    fn wallet_address(&self) -> Address {
        wallet()
    }

    async fn deposit_to(&self, _to: Address, _amount: U256) -> Result<TxHash> {
        let mode = *self.submit_mode.lock().unwrap();
        let result = self.submit("deposit", mode, &self.deposits);
        self.wait_for_receipt().await;
        result
    }

    async fn withdraw_to(&self, _to: Address, _amount: U256) -> Result<TxHash> {
        let mode = *self.submit_mode.lock().unwrap();
        let result = self.submit("withdraw", mode, &self.withdrawals);
        self.wait_for_receipt().await;
        result
    }

    async fn relay_message(
        &self,
        message: &CrossDomainMessage,
        _proof: &MessageProof,
    ) -> Result<TxHash> {
        if self.revert_once.lock().unwrap().remove(&message.hash()) {
            return Err(eyre!("relay transaction reverted"));
        }
        let mode = *self.relay_mode.lock().unwrap();
        let tx_hash = self.submit("relay", mode, &self.relayed)?;
        self.add_relay(Layer::L1, message.hash(), tx_hash);
        Ok(tx_hash)
    }

    async fn message_hash_from_l1_tx(&self, tx_hash: TxHash) -> Result<Option<TxHash>> {
        Ok(self.message_hashes(Layer::L1, tx_hash).first().copied())
    }

    async fn message_hash_from_l2_tx(&self, tx_hash: TxHash) -> Result<Option<TxHash>> {
        Ok(self.message_hashes(Layer::L2, tx_hash).first().copied())
    }

    async fn message_hashes_from_l2_tx(&self, tx_hash: TxHash) -> Result<Vec<TxHash>> {
        Ok(self.message_hashes(Layer::L2, tx_hash))
    }

    async fn receipt_for_message(
        &self,
        destination: Layer,
        msg_hash: TxHash,
        strict: bool,
        from_block: Option<u64>,
    ) -> Result<Option<TxReceipt>> {
        self.lookups.lock().unwrap().push((destination, from_block));
        let floor = from_block.unwrap_or_default();
        Ok(self
            .relays
            .lock()
            .unwrap()
            .get(&(destination, msg_hash))
            .copied()
            .filter(|receipt| receipt.block_number >= floor)
            .filter(|receipt| receipt.success || !strict))
    }
}

pub struct MockProofs {
    inclusions: Mutex<HashMap<TxHash, BatchInclusion>>,
    messages: Mutex<HashMap<TxHash, Vec<MessagePair>>>,
    /// Number of upcoming message lookups answered with "not ready"
    not_ready: AtomicU32,
    pub inclusion_calls: AtomicU32,
    pub message_calls: AtomicU32,
}

impl MockProofs {
    pub fn new() -> Self {
        Self {
            inclusions: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            not_ready: AtomicU32::new(0),
            inclusion_calls: AtomicU32::new(0),
            message_calls: AtomicU32::new(0),
        }
    }

    pub fn set_inclusion(&self, tx_hash: TxHash, l1_tx_hash: TxHash, block_number: u64) {
        self.inclusions.lock().unwrap().insert(
            tx_hash,
            BatchInclusion {
                l1_tx_hash,
                block_number,
            },
        );
    }

    pub fn set_messages(&self, tx_hash: TxHash, pairs: Vec<MessagePair>) {
        self.messages.lock().unwrap().insert(tx_hash, pairs);
    }

    pub fn set_not_ready(&self, answers: u32) {
        self.not_ready.store(answers, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProofService for MockProofs {
    async fn batch_inclusion_for_l2_tx(&self, tx_hash: TxHash) -> Result<Option<BatchInclusion>> {
        self.inclusion_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inclusions.lock().unwrap().get(&tx_hash).copied())
    }

    async fn messages_and_proofs_for_l2_tx(
        &self,
        tx_hash: TxHash,
    ) -> std::result::Result<Vec<MessagePair>, ProofError> {
        self.message_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.not_ready.load(Ordering::SeqCst);
        if pending > 0 {
            self.not_ready.store(pending - 1, Ordering::SeqCst);
            return Err(ProofError::NotReady(format!(
                "unable to find state root batch for tx {}",
                tx_hash
            )));
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&tx_hash)
            .cloned()
            .unwrap_or_default())
    }
}

/// A message with a placeholder proof
pub fn message_pair(nonce: u64) -> MessagePair {
    MessagePair {
        message: CrossDomainMessage {
            target: Address::repeat_byte(0x11),
            sender: Address::repeat_byte(0x22),
            message: Bytes::from(vec![0xca, 0xfe]),
            message_nonce: U256::from(nonce),
        },
        proof: MessageProof {
            state_root: B256::repeat_byte(0x33),
            state_root_batch_header: BatchHeader {
                batch_index: U256::from(1),
                batch_root: B256::repeat_byte(0x44),
                batch_size: U256::from(10),
                prev_total_elements: U256::ZERO,
                extra_data: Bytes::new(),
            },
            state_root_proof: StateRootProof {
                index: U256::from(3),
                siblings: vec![B256::repeat_byte(0x55)],
            },
            state_trie_witness: Bytes::from(vec![0x01]),
            storage_trie_witness: Bytes::from(vec![0x02]),
        },
    }
}

/// Mocks, a store in a temp dir, and the components wired to them
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: SharedStore,
    pub l1: Arc<MockChain>,
    pub l2: Arc<MockChain>,
    pub gateway: Arc<MockGateway>,
    pub proofs: Arc<MockProofs>,
    pub policy: Arc<dyn CyclePolicy>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(Arc::new(RoundTrip))
    }

    pub fn with_policy(policy: Arc<dyn CyclePolicy>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = TransferStore::open(dir.path().join("pending-transactions.json"), true).unwrap();

        Self {
            dir,
            store: SharedStore::new(store),
            l1: Arc::new(MockChain::new(Layer::L1)),
            l2: Arc::new(MockChain::new(Layer::L2)),
            gateway: Arc::new(MockGateway::new()),
            proofs: Arc::new(MockProofs::new()),
            policy,
        }
    }

    pub fn store_path(&self) -> std::path::PathBuf {
        self.dir.path().join("pending-transactions.json")
    }

    pub fn chains(&self) -> Chains {
        Chains {
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            gateway: self.gateway.clone(),
            proofs: self.proofs.clone(),
        }
    }

    pub fn scanner(&self) -> Scanner {
        Scanner::new(
            self.chains(),
            self.store.clone(),
            self.policy.clone(),
            CHALLENGE_PERIOD + CHALLENGE_BUFFER,
        )
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            self.chains(),
            self.store.clone(),
            self.policy.clone(),
            U256::from(99u64),
            fast_retry(2),
            fast_retry(2),
        )
    }

    /// L1 deposit `tx_hash`, mined, carrying message `msg_hash`
    pub fn mined_deposit(&self, tx_hash: TxHash, msg_hash: TxHash) {
        self.l1.mine(tx_hash, 10, true);
        self.gateway.set_message_hash(Layer::L1, tx_hash, msg_hash);
    }

    /// L2 withdrawal `tx_hash`, mined and batched by `batch_tx` at L1 block
    /// `batch_block` with timestamp `batched_at`. Returns its message.
    pub fn batched_withdrawal(
        &self,
        tx_hash: TxHash,
        batch_tx: TxHash,
        batch_block: u64,
        batched_at: u64,
    ) -> MessagePair {
        let pair = message_pair(u64::from(tx_hash[31]));
        self.batched_withdrawal_with(tx_hash, batch_tx, batch_block, batched_at, vec![pair.clone()]);
        pair
    }

    /// Like [`Harness::batched_withdrawal`], for a withdrawal sending `pairs`
    pub fn batched_withdrawal_with(
        &self,
        tx_hash: TxHash,
        batch_tx: TxHash,
        batch_block: u64,
        batched_at: u64,
        pairs: Vec<MessagePair>,
    ) {
        self.l2.mine(tx_hash, 20, true);
        self.gateway.set_message_hashes(
            Layer::L2,
            tx_hash,
            pairs.iter().map(|pair| pair.message.hash()).collect(),
        );
        self.proofs.set_inclusion(tx_hash, batch_tx, batch_block);
        self.proofs.set_messages(tx_hash, pairs);
        self.l1.set_block_timestamp(batch_block, batched_at);
    }
}

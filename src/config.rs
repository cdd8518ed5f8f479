use alloy::primitives::{Address, U256};
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::policy::CycleMode;

/// L2 cross-domain messenger predeploy
pub const L2_MESSENGER_PREDEPLOY: Address =
    alloy::primitives::address!("4200000000000000000000000000000000000007");

/// L2 standard bridge predeploy
pub const L2_STANDARD_BRIDGE_PREDEPLOY: Address =
    alloy::primitives::address!("4200000000000000000000000000000000000010");

/// Main configuration for the tracker
#[derive(Debug, Clone)]
pub struct Config {
    pub l1: ChainConfig,
    pub l2: ChainConfig,
    pub bridge: BridgeConfig,
    pub cycle: CycleConfig,
    pub scheduler: SchedulerConfig,
    pub watcher: WatcherConfig,
    pub retry: RetrySettings,
    pub store: StoreConfig,
    /// node-exporter textfile the metrics are written to after every pass
    pub metrics_textfile: Option<PathBuf>,
}

/// RPC endpoints of one chain
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Additional RPC URLs for fallback (tried in order when primary fails)
    pub rpc_fallback_urls: Vec<String>,
    pub chain_id: u64,
}

impl ChainConfig {
    /// All RPC URLs: primary followed by fallbacks.
    pub fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = vec![self.rpc_url.clone()];
        urls.extend(self.rpc_fallback_urls.iter().cloned());
        urls
    }
}

/// Bridge contracts, proof service and challenge window
#[derive(Clone)]
pub struct BridgeConfig {
    pub private_key: String,
    pub l1_messenger: Address,
    pub l1_standard_bridge: Address,
    pub l1_state_commitment_chain: Address,
    pub l2_messenger: Address,
    pub l2_standard_bridge: Address,
    /// Token pair; both unset means ETH is bridged
    pub l1_token: Option<Address>,
    pub l2_token: Option<Address>,
    pub proof_service_url: String,
    pub challenge_period_secs: u64,
    pub challenge_buffer_secs: u64,
    /// L2 blocks that precede the first state batch element
    pub l2_genesis_blocks: u64,
    /// How far below the head relay events are searched when a record gives
    /// no lower bound
    pub message_lookback_blocks: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("private_key", &"<redacted>")
            .field("l1_messenger", &self.l1_messenger)
            .field("l1_standard_bridge", &self.l1_standard_bridge)
            .field("l1_state_commitment_chain", &self.l1_state_commitment_chain)
            .field("l2_messenger", &self.l2_messenger)
            .field("l2_standard_bridge", &self.l2_standard_bridge)
            .field("l1_token", &self.l1_token)
            .field("l2_token", &self.l2_token)
            .field("proof_service_url", &self.proof_service_url)
            .field("challenge_period_secs", &self.challenge_period_secs)
            .field("challenge_buffer_secs", &self.challenge_buffer_secs)
            .field("l2_genesis_blocks", &self.l2_genesis_blocks)
            .field("message_lookback_blocks", &self.message_lookback_blocks)
            .finish()
    }
}

impl BridgeConfig {
    /// Seconds that must pass after batch inclusion before a withdrawal is relayed
    pub fn challenge_window_secs(&self) -> u64 {
        self.challenge_period_secs + self.challenge_buffer_secs
    }

    pub fn bridges_eth(&self) -> bool {
        self.l1_token.is_none()
    }
}

/// Follow-up legs submitted by the worker
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub mode: CycleMode,
    pub amount: U256,
    /// Gas forwarded for the L1 side of a withdrawal
    pub l1_gas_limit: u32,
    /// Gas forwarded for the L2 side of a deposit
    pub l2_gas_limit: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval_secs: u64,
    pub work_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub lookback_blocks: u64,
    pub max_block_range: u64,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay_ms: u64,
    pub proof_attempts: u32,
    pub proof_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub create_if_missing: bool,
}

/// Default functions
fn default_challenge_period_secs() -> u64 {
    // 60 L1 blocks of 15 seconds
    900
}

fn default_challenge_buffer_secs() -> u64 {
    15
}

fn default_l2_genesis_blocks() -> u64 {
    1
}

fn default_message_lookback_blocks() -> u64 {
    10_000_000
}

fn default_cycle_amount() -> U256 {
    // 99 tokens with 18 decimals
    U256::from(99_000_000_000_000_000_000u128)
}

fn default_l1_gas_limit() -> u32 {
    100_000
}

fn default_l2_gas_limit() -> u32 {
    2_000_000
}

fn default_scan_interval() -> u64 {
    60
}

fn default_work_interval() -> u64 {
    180
}

fn default_watcher_poll_interval() -> u64 {
    5000
}

fn default_watcher_lookback_blocks() -> u64 {
    1000
}

fn default_max_block_range() -> u64 {
    1000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5000
}

fn default_proof_retry_attempts() -> u32 {
    5
}

fn default_proof_retry_delay() -> u64 {
    10_000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("pending-transactions.json")
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

fn optional<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_address(name: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse()
        .wrap_err_with(|| format!("{} must be a valid hex address", name))
}

fn required_address(name: &str) -> Result<Address> {
    parse_address(name, &required(name)?)
}

fn optional_address(name: &str) -> Result<Option<Address>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse_address(name, &raw).map(Some),
        _ => Ok(None),
    }
}

fn chain_from_env(prefix: &str) -> Result<ChainConfig> {
    let url_var = format!("{}_RPC_URL", prefix);
    let raw = required(&url_var)?;
    let urls = crate::rpc_fallback::parse_rpc_urls(&raw);
    if urls.is_empty() {
        return Err(eyre!("{} cannot be empty", url_var));
    }

    let id_var = format!("{}_CHAIN_ID", prefix);
    Ok(ChainConfig {
        rpc_url: urls[0].clone(),
        rpc_fallback_urls: urls[1..].to_vec(),
        chain_id: required(&id_var)?
            .trim()
            .parse()
            .wrap_err_with(|| format!("{} must be a valid u64", id_var))?,
    })
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let l1 = chain_from_env("L1")?;
        let l2 = chain_from_env("L2")?;

        let bridge = BridgeConfig {
            private_key: required("PRIVATE_KEY")?,
            l1_messenger: required_address("L1_MESSENGER_ADDRESS")?,
            l1_standard_bridge: required_address("L1_STANDARD_BRIDGE_ADDRESS")?,
            l1_state_commitment_chain: required_address("L1_STATE_COMMITMENT_CHAIN_ADDRESS")?,
            l2_messenger: optional_address("L2_MESSENGER_ADDRESS")?
                .unwrap_or(L2_MESSENGER_PREDEPLOY),
            l2_standard_bridge: optional_address("L2_STANDARD_BRIDGE_ADDRESS")?
                .unwrap_or(L2_STANDARD_BRIDGE_PREDEPLOY),
            l1_token: optional_address("L1_TOKEN_ADDRESS")?,
            l2_token: optional_address("L2_TOKEN_ADDRESS")?,
            proof_service_url: required("PROOF_SERVICE_URL")?,
            challenge_period_secs: optional(
                "CHALLENGE_PERIOD_SECONDS",
                default_challenge_period_secs(),
            ),
            challenge_buffer_secs: optional(
                "CHALLENGE_BUFFER_SECONDS",
                default_challenge_buffer_secs(),
            ),
            l2_genesis_blocks: optional("L2_GENESIS_BLOCKS", default_l2_genesis_blocks()),
            message_lookback_blocks: optional(
                "MESSAGE_LOOKBACK_BLOCKS",
                default_message_lookback_blocks(),
            ),
        };

        let cycle = CycleConfig {
            mode: match env::var("CYCLE_MODE") {
                Ok(raw) => raw.parse()?,
                Err(_) => CycleMode::default(),
            },
            amount: match env::var("CYCLE_AMOUNT_WEI") {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .wrap_err("CYCLE_AMOUNT_WEI must be a decimal integer")?,
                Err(_) => default_cycle_amount(),
            },
            l1_gas_limit: optional("L1_GAS_LIMIT", default_l1_gas_limit()),
            l2_gas_limit: optional("L2_GAS_LIMIT", default_l2_gas_limit()),
        };

        let scheduler = SchedulerConfig {
            scan_interval_secs: optional("SCAN_INTERVAL_SECS", default_scan_interval()),
            work_interval_secs: optional("WORK_INTERVAL_SECS", default_work_interval()),
        };

        let watcher = WatcherConfig {
            enabled: optional("WATCHER_ENABLED", false),
            poll_interval_ms: optional("WATCHER_POLL_INTERVAL_MS", default_watcher_poll_interval()),
            lookback_blocks: optional(
                "WATCHER_LOOKBACK_BLOCKS",
                default_watcher_lookback_blocks(),
            ),
            max_block_range: optional("MAX_BLOCK_RANGE", default_max_block_range()),
        };

        let retry = RetrySettings {
            attempts: optional("RETRY_ATTEMPTS", default_retry_attempts()),
            delay_ms: optional("RETRY_DELAY_MS", default_retry_delay()),
            proof_attempts: optional("PROOF_RETRY_ATTEMPTS", default_proof_retry_attempts()),
            proof_delay_ms: optional("PROOF_RETRY_DELAY_MS", default_proof_retry_delay()),
        };

        let store = StoreConfig {
            path: env::var("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_store_path()),
            create_if_missing: optional("STORE_CREATE_IF_MISSING", true),
        };

        let metrics_textfile = env::var("METRICS_TEXTFILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let config = Config {
            l1,
            l2,
            bridge,
            cycle,
            scheduler,
            watcher,
            retry,
            store,
            metrics_textfile,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.l1.rpc_url.is_empty() {
            return Err(eyre!("l1.rpc_url cannot be empty"));
        }

        if self.l2.rpc_url.is_empty() {
            return Err(eyre!("l2.rpc_url cannot be empty"));
        }

        if self.l1.chain_id == self.l2.chain_id {
            return Err(eyre!(
                "L1_CHAIN_ID and L2_CHAIN_ID must differ (both are {})",
                self.l1.chain_id
            ));
        }

        let key = self.bridge.private_key.trim_start_matches("0x");
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(eyre!("bridge.private_key must be 32 bytes of hex (optionally 0x prefixed)"));
        }

        if self.bridge.l1_token.is_some() != self.bridge.l2_token.is_some() {
            return Err(eyre!(
                "L1_TOKEN_ADDRESS and L2_TOKEN_ADDRESS must be set together (or both unset for ETH)"
            ));
        }

        if self.bridge.proof_service_url.is_empty() {
            return Err(eyre!("bridge.proof_service_url cannot be empty"));
        }

        if self.bridge.message_lookback_blocks == 0 {
            return Err(eyre!("MESSAGE_LOOKBACK_BLOCKS must be greater than 0"));
        }

        if self.cycle.mode == CycleMode::RoundTrip && self.cycle.amount.is_zero() {
            return Err(eyre!("CYCLE_AMOUNT_WEI must be greater than 0 in round-trip mode"));
        }

        if self.scheduler.scan_interval_secs == 0 || self.scheduler.work_interval_secs == 0 {
            return Err(eyre!("scheduler intervals must be greater than 0"));
        }

        if self.watcher.enabled && self.watcher.poll_interval_ms == 0 {
            return Err(eyre!("WATCHER_POLL_INTERVAL_MS must be greater than 0"));
        }

        if self.watcher.max_block_range == 0 {
            return Err(eyre!("MAX_BLOCK_RANGE must be greater than 0"));
        }

        if self.retry.attempts == 0 || self.retry.proof_attempts == 0 {
            return Err(eyre!("retry attempts must be at least 1"));
        }

        Ok(())
    }
}

//! Bridge tracker CLI
//!
//! - `run`         scanner, worker and optional event watcher until SIGINT/SIGTERM
//! - `record`      track an already submitted transaction
//! - `start-cycle` submit the first deposit and track it
//! - `status`      print the pending-transactions store
//! - `balances`    wallet balances on both layers

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::utils::format_ether;
use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use tracing::{error, info, warn};

use bridge_tracker::chain::{EvmChainClient, HttpProofService, OptimismGateway, Unconfirmed};
use bridge_tracker::watcher::{EventSource, EvmEventSource};
use bridge_tracker::{
    BridgeGateway, Chains, Config, Layer, Scanner, Scheduler, SharedStore, TransferStore, TxHash,
    Watcher, Worker,
};

#[derive(Parser)]
#[command(name = "bridge-tracker")]
#[command(about = "Tracks L1 <-> L2 canonical bridge transfers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Environment file read before the process environment
    #[arg(long, global = true, default_value = ".env")]
    env_file: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanner, the worker and the event watcher
    Run,

    /// Track a submitted transaction as Sent
    Record {
        /// Transaction hash (0x-prefixed)
        #[arg(long)]
        tx_hash: String,

        /// Layer the transaction was sent on (L1 or L2)
        #[arg(long)]
        layer: String,
    },

    /// Submit the first deposit of a cycle and track it
    StartCycle,

    /// Print every tracked transfer
    Status {
        /// Print the raw store contents as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the wallet's balances on both layers
    Balances,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    if Path::new(&cli.env_file).exists() {
        dotenvy::from_filename(&cli.env_file)
            .wrap_err_with(|| format!("Failed to load env file {}", cli.env_file))?;
    }
    init_logging(cli.verbose);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = Config::load_from_file(&cli.env_file)?;
    info!(
        l1_chain_id = config.l1.chain_id,
        l2_chain_id = config.l2.chain_id,
        mode = %config.cycle.mode,
        store = %config.store.path.display(),
        "Configuration loaded"
    );

    let store = SharedStore::new(TransferStore::open(
        &config.store.path,
        config.store.create_if_missing,
    )?);

    match cli.command {
        Commands::Run => run(&config, store).await,
        Commands::Record { tx_hash, layer } => {
            let tx_hash: TxHash = tx_hash
                .trim()
                .parse()
                .wrap_err("--tx-hash must be a 32-byte hex hash")?;
            let layer: Layer = layer.parse()?;
            store.record_transfer(tx_hash, layer).await?;
            println!("Tracking {} on {}", tx_hash, layer);
            Ok(())
        }
        Commands::StartCycle => start_cycle(&config, store).await,
        Commands::Status { json } => print_status(store, json).await,
        Commands::Balances => print_balances(&config).await,
    }
}

fn build_chains(config: &Config) -> Result<Chains> {
    Ok(Chains {
        l1: Arc::new(EvmChainClient::new(Layer::L1, &config.l1)?),
        l2: Arc::new(EvmChainClient::new(Layer::L2, &config.l2)?),
        gateway: Arc::new(OptimismGateway::new(config)?),
        proofs: Arc::new(HttpProofService::new(config)?),
    })
}

async fn run(config: &Config, store: SharedStore) -> Result<()> {
    info!("Starting bridge tracker");

    let chains = build_chains(config)?;
    let policy = config.cycle.mode.policy();
    let scanner = Scanner::new(
        chains.clone(),
        store.clone(),
        policy,
        config.bridge.challenge_window_secs(),
    );
    let worker = Worker::from_config(chains.clone(), store, config);

    let watcher = if config.watcher.enabled {
        let wallet = chains.gateway.wallet_address();
        let sources: Vec<Box<dyn EventSource>> = vec![
            Box::new(EvmEventSource::new(Layer::L1, config, wallet)?),
            Box::new(EvmEventSource::new(Layer::L2, config, wallet)?),
        ];
        Some(Watcher::new(
            scanner.clone(),
            worker.clone(),
            sources,
            Duration::from_millis(config.watcher.poll_interval_ms),
        ))
    } else {
        None
    };

    let scheduler = Scheduler::new(
        scanner,
        worker,
        watcher,
        &config.scheduler,
        config.metrics_textfile.clone(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let result = scheduler.run(shutdown_rx).await;
    if let Err(e) = &result {
        error!(error = %e, "Scheduler error");
    }

    info!("Bridge tracker stopped");
    result
}

async fn start_cycle(config: &Config, store: SharedStore) -> Result<()> {
    let gateway = OptimismGateway::new(config)?;
    let wallet = gateway.wallet_address();
    let amount = config.cycle.amount;

    info!(wallet = %wallet, amount = %amount, "Submitting first deposit");
    let tx_hash = match gateway.deposit_to(wallet, amount).await {
        Ok(tx_hash) => tx_hash,
        Err(e) => match e.downcast_ref::<Unconfirmed>() {
            Some(unconfirmed) => {
                warn!(tx_hash = %unconfirmed.tx_hash, "Deposit not confirmed yet, tracking it anyway");
                unconfirmed.tx_hash
            }
            None => return Err(e.wrap_err("Failed to submit the first deposit")),
        },
    };

    store.record_transfer(tx_hash, Layer::L1).await?;
    println!("Deposit {} submitted and tracked", tx_hash);
    Ok(())
}

async fn print_status(store: SharedStore, json: bool) -> Result<()> {
    let transfers = store.snapshot().await?;

    if json {
        let records: Vec<_> = transfers.iter().collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if transfers.is_empty() {
        println!("No tracked transfers");
        return Ok(());
    }

    for record in transfers.iter() {
        let relay = record
            .relay_tx_hash()
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {:<8} next={:<8} relay={}  created={}",
            record.tx_hash,
            record.layer(),
            record.status().as_str(),
            record.next_action().as_str(),
            relay,
            record.created_at.to_rfc3339()
        );
        if let Some(failed) = record.failed_relay_tx_hash() {
            println!("    message execution failed on L2 in {}", failed);
        }
    }

    for ((layer, status), count) in transfers.counts() {
        println!("{} {}: {}", layer, status, count);
    }
    Ok(())
}

async fn print_balances(config: &Config) -> Result<()> {
    let chains = build_chains(config)?;
    let wallet = chains.gateway.wallet_address();

    println!("Wallet {}", wallet);
    for layer in [Layer::L1, Layer::L2] {
        let client = chains.client(layer);
        let eth = client
            .balance(wallet)
            .await
            .wrap_err_with(|| format!("Failed to read {} balance", layer))?;
        println!("{} ETH:   {}", layer, format_ether(eth));

        let token = match layer {
            Layer::L1 => config.bridge.l1_token,
            Layer::L2 => config.bridge.l2_token,
        };
        if let Some(token) = token {
            let balance = client
                .token_balance(token, wallet)
                .await
                .wrap_err_with(|| format!("Failed to read {} token balance", layer))?;
            println!("{} token: {} ({})", layer, format_ether(balance), token);
        }
    }

    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "debug"
    } else {
        "info,bridge_tracker=debug"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

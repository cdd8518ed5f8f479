//! Event watcher
//!
//! Push-side companion to the scanner and worker. Bridge events only tell the
//! watcher which records are worth looking at early; the transition itself is
//! computed by the same scanner and worker code, under the same store lock,
//! so an event that races a scheduled pass changes nothing twice.

pub mod evm;

use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::scanner::Scanner;
use crate::types::{Layer, Status, TxHash};
use crate::worker::Worker;

pub use evm::EvmEventSource;

/// Standard bridge event concerning the configured wallet and token pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    /// L1 deposit submitted
    DepositInitiated { tx_hash: TxHash },
    /// Deposit credited on L2
    DepositFinalized { tx_hash: TxHash },
    /// L2 withdrawal submitted
    WithdrawalInitiated { tx_hash: TxHash },
    /// Withdrawal relayed on L1
    WithdrawalFinalized { tx_hash: TxHash },
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::DepositInitiated { .. } => "DepositInitiated",
            BridgeEvent::DepositFinalized { .. } => "DepositFinalized",
            BridgeEvent::WithdrawalInitiated { .. } => "WithdrawalInitiated",
            BridgeEvent::WithdrawalFinalized { .. } => "WithdrawalFinalized",
        }
    }

    pub fn tx_hash(&self) -> TxHash {
        match self {
            BridgeEvent::DepositInitiated { tx_hash }
            | BridgeEvent::DepositFinalized { tx_hash }
            | BridgeEvent::WithdrawalInitiated { tx_hash }
            | BridgeEvent::WithdrawalFinalized { tx_hash } => *tx_hash,
        }
    }
}

/// Produces bridge events for one layer
#[async_trait]
pub trait EventSource: Send + Sync {
    fn layer(&self) -> Layer;

    /// Events since the previous poll
    async fn poll(&mut self) -> Result<Vec<BridgeEvent>>;
}

pub struct Watcher {
    scanner: Scanner,
    worker: Worker,
    sources: Vec<Box<dyn EventSource>>,
    poll_interval: Duration,
}

impl Watcher {
    pub fn new(
        scanner: Scanner,
        worker: Worker,
        sources: Vec<Box<dyn EventSource>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scanner,
            worker,
            sources,
            poll_interval,
        }
    }

    /// Advance whatever records `event` concerns
    pub async fn handle(&self, event: &BridgeEvent) -> Result<()> {
        debug!(event = event.name(), tx_hash = %event.tx_hash(), "Handling bridge event");

        match *event {
            BridgeEvent::DepositInitiated { tx_hash } => {
                self.scanner
                    .scan_where(|r| {
                        r.tx_hash == tx_hash && r.layer() == Layer::L1 && r.status() == Status::Sent
                    })
                    .await?;
            }
            BridgeEvent::DepositFinalized { .. } => {
                // The L2 event does not carry the L1 hash; any waiting deposit may match
                self.scanner
                    .scan_where(|r| r.layer() == Layer::L1 && r.status() == Status::Waiting)
                    .await?;
            }
            BridgeEvent::WithdrawalInitiated { tx_hash } => {
                self.scanner
                    .scan_where(|r| {
                        r.tx_hash == tx_hash && r.layer() == Layer::L2 && r.status() == Status::Sent
                    })
                    .await?;
            }
            BridgeEvent::WithdrawalFinalized { .. } => {
                self.worker.reconcile_ready().await?;
            }
        }

        Ok(())
    }

    /// Poll every source once and handle what it returned.
    ///
    /// A failing source is skipped until the next poll.
    pub async fn poll_once(&mut self) -> usize {
        let mut events = Vec::new();
        for source in self.sources.iter_mut() {
            match source.poll().await {
                Ok(found) => events.extend(found),
                Err(e) => {
                    warn!(layer = %source.layer(), error = %format!("{:#}", e), "Event poll failed");
                }
            }
        }

        let mut handled = 0;
        for event in &events {
            match self.handle(event).await {
                Ok(()) => handled += 1,
                Err(e) => {
                    warn!(
                        event = event.name(),
                        tx_hash = %event.tx_hash(),
                        error = %format!("{:#}", e),
                        "Failed to handle bridge event"
                    );
                }
            }
        }
        handled
    }

    /// Poll until shutdown
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            sources = self.sources.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Event watcher starting"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let handled = self.poll_once().await;
                    if handled > 0 {
                        debug!(handled, "Bridge events handled");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping event watcher");
                    return Ok(());
                }
            }
        }
    }
}

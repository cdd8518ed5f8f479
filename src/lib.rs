//! Bridge transfer tracker
//!
//! Follows L1 <-> L2 canonical bridge transfers from submission through the
//! challenge period to their relay, and submits the follow-up leg each relayed
//! transfer asks for. The pending-transactions file is the only durable state.

pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod rpc_fallback;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod watcher;
pub mod worker;

pub use chain::{BridgeGateway, ChainClient, Chains, ProofService};
pub use config::Config;
pub use error::{StoreError, TransferError};
pub use policy::{CycleMode, CyclePolicy};
pub use scanner::Scanner;
pub use scheduler::Scheduler;
pub use store::{SharedStore, TransferRecord, TransferStore};
pub use types::{Layer, NextAction, Status, TxHash};
pub use watcher::Watcher;
pub use worker::Worker;

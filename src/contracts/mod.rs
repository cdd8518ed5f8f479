//! Contract bindings

pub mod optimism;

use alloy::primitives::{address, Address};

/// ETH representation on L2, used as the token of ETH withdrawals
pub const L2_ETH_TOKEN: Address = address!("deaddeaddeaddeaddeaddeaddeaddeaddead0000");

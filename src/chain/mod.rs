//! Chain module - the network collaborators of the coordinator
//!
//! This module provides:
//! - The transaction-count and receipt queries the nonce and pending trackers need
//! - The raw transaction broadcast used by the publish path
//! - A JSON-RPC provider with automatic failover implementing both

pub mod provider;

pub use provider::ChainProvider;

use crate::error::WalletResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

/// Inclusion data for a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub block_number: u64,
    /// False when the transaction reverted; its nonce is consumed either way
    pub success: bool,
}

/// Read access to the remote network
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Number of transactions mined from `address` (`eth_getTransactionCount`)
    async fn get_transaction_count(&self, address: Address) -> WalletResult<U256>;

    async fn get_transaction_receipt(&self, tx_hash: H256) -> WalletResult<Option<TxReceipt>>;
}

/// Broadcast of signed transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, signed_tx: Bytes) -> WalletResult<H256>;
}

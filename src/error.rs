//! Error types for the wallet transaction coordinator

use ethers::types::{Address, U256};
use std::fmt;
use thiserror::Error;

/// Why a nonce could not be produced yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingReason {
    /// No network transaction count cached for the address; a query was issued
    AwaitingNetworkNonce,
    /// Another allocation for the same address holds the lock
    AllocationInFlight,
}

impl PendingReason {
    /// Label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingReason::AwaitingNetworkNonce => "awaiting_network_nonce",
            PendingReason::AllocationInFlight => "allocation_in_flight",
        }
    }
}

impl fmt::Display for PendingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Nonce for {address:?} not available yet ({reason})")]
    NoncePending {
        address: Address,
        reason: PendingReason,
    },

    #[error("Nonce invariant violated for {address:?} at nonce {nonce}: {message}")]
    NonceInvariant {
        address: Address,
        nonce: U256,
        message: String,
    },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("State manager error: {0}")]
    State(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::NoncePending { .. }
                | WalletError::ChainConnection { .. }
                | WalletError::Timeout { .. }
        )
    }

    /// Nonce not resolvable yet; the caller should retry later
    pub fn is_pending(&self) -> bool {
        matches!(self, WalletError::NoncePending { .. })
    }
}

/// Result type for coordinator operations
pub type WalletResult<T> = Result<T, WalletError>;

//! Wallet transaction coordinator - nonce allocation and lifecycle tracking
//!
//! Computes the next nonce for an account by reconciling the network's
//! transaction count with locally confirmed and in-flight transactions, and
//! drives each transaction from approval through publishing to confirmation.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod state;
pub mod tx;

pub use chain::{ChainProvider, NetworkClient, Publisher, TxReceipt};
pub use error::{PendingReason, WalletError, WalletResult};
pub use state::{InMemoryStateManager, TxMeta, TxMetaId, TxStateManager, TxStatus};
pub use tx::{
    EthTransaction, GasPrice, NonceTracker, TransactionController, TxObserver, TxSigner,
};

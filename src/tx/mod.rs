//! Transaction lifecycle: nonce allocation, approval, publishing and reconciliation

mod controller;
mod nonce;
mod observer;
mod pending;
mod signer;
mod transaction;

pub use controller::TransactionController;
pub use nonce::{NonceReservation, NonceTracker};
pub use observer::{ObserverId, ObserverRegistry, TxObserver};
pub use pending::PendingTxTracker;
pub use signer::{KeyringSigner, TxSigner};
pub use transaction::{parse_address, EthTransaction, GasPrice};

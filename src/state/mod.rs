//! Transaction record state
//!
//! Handles:
//! - Transaction metadata and its status lifecycle
//! - The storage contract the nonce tracker and controller read from
//! - An in-memory store for single-process wallets

mod manager;
mod meta;

pub use manager::{InMemoryStateManager, TxStateManager};
pub use meta::{TxMeta, TxMetaId, TxStatus};

#[cfg(test)]
pub use manager::MockTxStateManager;

//! Reconciles submitted transactions against the chain
//!
//! A submitted transaction is:
//! - Confirmed once a receipt with a block number exists (reverted or not,
//!   the nonce is consumed)
//! - Dropped when it has no receipt but its nonce was already used, either by
//!   another locally confirmed transaction or according to a network count
//!   read before the receipt lookup

use crate::chain::NetworkClient;
use crate::error::WalletResult;
use crate::state::{TxMeta, TxStateManager, TxStatus};

use chrono::Utc;
use ethers::types::{Address, U256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PendingTxTracker {
    state_manager: Arc<dyn TxStateManager>,
    network: Arc<dyn NetworkClient>,
}

impl PendingTxTracker {
    pub fn new(state_manager: Arc<dyn TxStateManager>, network: Arc<dyn NetworkClient>) -> Self {
        Self {
            state_manager,
            network,
        }
    }

    /// Check every submitted transaction once, returning the records whose
    /// status changed. Network failures leave the record untouched.
    pub async fn update_pending_transactions(&self) -> WalletResult<Vec<TxMeta>> {
        let mut submitted = self
            .state_manager
            .get_transactions_by_status(TxStatus::Submitted, None)?;
        submitted.sort_by_key(|meta| (meta.from, meta.nonce()));

        let mut confirmed_nonces: HashSet<(Address, U256)> = self
            .state_manager
            .get_transactions_by_status(TxStatus::Confirmed, None)?
            .iter()
            .filter_map(|meta| meta.nonce().map(|nonce| (meta.from, nonce)))
            .collect();
        let mut network_counts: HashMap<Address, U256> = HashMap::new();
        let mut changed = Vec::new();

        for mut meta in submitted {
            let (tx_hash, nonce) = match (meta.tx_hash, meta.nonce()) {
                (Some(hash), Some(nonce)) => (hash, nonce),
                _ => {
                    warn!("Submitted tx {} is missing its hash or nonce", meta.id);
                    continue;
                }
            };

            // the count is read before the receipt, so a tx mined in between
            // shows up as a receipt instead of a used nonce
            let taken = self
                .is_nonce_taken(&meta, nonce, &confirmed_nonces, &mut network_counts)
                .await;

            let receipt = match self.network.get_transaction_receipt(tx_hash).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    warn!("Failed to get receipt for {:?}: {}", tx_hash, e);
                    continue;
                }
            };

            if let Some(receipt) = receipt {
                if !receipt.success {
                    warn!("Transaction {:?} reverted in block {}", tx_hash, receipt.block_number);
                }
                meta.transition_to(TxStatus::Confirmed)?;
                meta.confirmed_at = Some(Utc::now());
                confirmed_nonces.insert((meta.from, nonce));
                info!(
                    "Transaction {} confirmed in block {} (nonce {})",
                    meta.id, receipt.block_number, nonce
                );
            } else if taken {
                meta.transition_to(TxStatus::Dropped)?;
                info!("Transaction {} dropped (nonce {} taken)", meta.id, nonce);
            } else {
                debug!("Transaction {} still pending", meta.id);
                continue;
            }

            self.state_manager.add_or_update_tx(meta.clone())?;
            changed.push(meta);
        }

        Ok(changed)
    }

    async fn is_nonce_taken(
        &self,
        meta: &TxMeta,
        nonce: U256,
        confirmed_nonces: &HashSet<(Address, U256)>,
        network_counts: &mut HashMap<Address, U256>,
    ) -> bool {
        if confirmed_nonces.contains(&(meta.from, nonce)) {
            return true;
        }

        let count = match network_counts.get(&meta.from) {
            Some(count) => *count,
            None => match self.network.get_transaction_count(meta.from).await {
                Ok(count) => {
                    network_counts.insert(meta.from, count);
                    count
                }
                Err(e) => {
                    warn!("Failed to get transaction count for {:?}: {}", meta.from, e);
                    return false;
                }
            },
        };

        count > nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockNetworkClient, TxReceipt};
    use crate::error::WalletError;
    use crate::state::InMemoryStateManager;
    use crate::tx::EthTransaction;
    use ethers::types::H256;

    fn submitted(store: &InMemoryStateManager, from: Address, nonce: u64, hash: u8) -> TxMeta {
        let mut meta = TxMeta::new_unapproved(from, EthTransaction::default());
        meta.tx.nonce = Some(U256::from(nonce));
        meta.status = TxStatus::Submitted;
        meta.tx_hash = Some(H256::repeat_byte(hash));
        store.add_or_update_tx(meta.clone()).unwrap();
        meta
    }

    fn status(store: &InMemoryStateManager, meta: &TxMeta) -> TxStatus {
        store.get_tx(&meta.id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_receipt_confirms() {
        let store = Arc::new(InMemoryStateManager::new());
        let from = Address::repeat_byte(1);
        let mined = submitted(&store, from, 0, 0xaa);
        let waiting = submitted(&store, from, 1, 0xbb);

        let mut network = MockNetworkClient::new();
        network
            .expect_get_transaction_receipt()
            .returning(|hash| {
                Ok((hash == H256::repeat_byte(0xaa)).then_some(TxReceipt {
                    block_number: 100,
                    success: true,
                }))
            });
        network
            .expect_get_transaction_count()
            .returning(|_| Ok(U256::from(1)));

        let tracker = PendingTxTracker::new(store.clone(), Arc::new(network));
        let changed = tracker.update_pending_transactions().await.unwrap();

        assert_eq!(changed.len(), 1);
        assert_eq!(status(&store, &mined), TxStatus::Confirmed);
        assert!(store.get_tx(&mined.id).unwrap().unwrap().confirmed_at.is_some());
        assert_eq!(status(&store, &waiting), TxStatus::Submitted);
    }

    #[tokio::test]
    async fn test_replaced_nonce_drops() {
        let store = Arc::new(InMemoryStateManager::new());
        let from = Address::repeat_byte(1);
        let replaced = submitted(&store, from, 4, 0xcc);

        let mut network = MockNetworkClient::new();
        network.expect_get_transaction_receipt().returning(|_| Ok(None));
        network
            .expect_get_transaction_count()
            .times(1)
            .returning(|_| Ok(U256::from(5)));

        let tracker = PendingTxTracker::new(store.clone(), Arc::new(network));
        let changed = tracker.update_pending_transactions().await.unwrap();

        assert_eq!(changed.len(), 1);
        assert_eq!(status(&store, &replaced), TxStatus::Dropped);
    }

    #[tokio::test]
    async fn test_local_confirmed_duplicate_drops() {
        let store = Arc::new(InMemoryStateManager::new());
        let from = Address::repeat_byte(1);
        let mut winner = TxMeta::new_unapproved(from, EthTransaction::default());
        winner.tx.nonce = Some(U256::from(2));
        winner.status = TxStatus::Confirmed;
        store.add_or_update_tx(winner).unwrap();
        let loser = submitted(&store, from, 2, 0xdd);

        let mut network = MockNetworkClient::new();
        network.expect_get_transaction_receipt().returning(|_| Ok(None));
        network.expect_get_transaction_count().times(0);

        let tracker = PendingTxTracker::new(store.clone(), Arc::new(network));
        tracker.update_pending_transactions().await.unwrap();
        assert_eq!(status(&store, &loser), TxStatus::Dropped);
    }

    #[tokio::test]
    async fn test_network_errors_leave_records_alone() {
        let store = Arc::new(InMemoryStateManager::new());
        let meta = submitted(&store, Address::repeat_byte(1), 0, 0xee);

        let mut network = MockNetworkClient::new();
        network
            .expect_get_transaction_count()
            .returning(|_| Ok(U256::from(1)));
        network.expect_get_transaction_receipt().returning(|_| {
            Err(WalletError::Timeout {
                operation: "receipt".to_string(),
            })
        });

        let tracker = PendingTxTracker::new(store.clone(), Arc::new(network));
        let changed = tracker.update_pending_transactions().await.unwrap();
        assert!(changed.is_empty());
        assert_eq!(status(&store, &meta), TxStatus::Submitted);
    }

    #[tokio::test]
    async fn test_mined_between_lookups_confirms() {
        let store = Arc::new(InMemoryStateManager::new());
        let meta = submitted(&store, Address::repeat_byte(1), 6, 0xab);

        // the tx lands in a block while the count is being read
        let mined: Arc<parking_lot::Mutex<Option<TxReceipt>>> = Default::default();
        let mut network = MockNetworkClient::new();
        let on_count = mined.clone();
        network.expect_get_transaction_count().returning(move |_| {
            *on_count.lock() = Some(TxReceipt {
                block_number: 7,
                success: true,
            });
            Ok(U256::from(7))
        });
        let on_receipt = mined.clone();
        network
            .expect_get_transaction_receipt()
            .returning(move |_| Ok(*on_receipt.lock()));

        let tracker = PendingTxTracker::new(store.clone(), Arc::new(network));
        let changed = tracker.update_pending_transactions().await.unwrap();

        assert_eq!(changed.len(), 1);
        assert_eq!(status(&store, &meta), TxStatus::Confirmed);
    }
}

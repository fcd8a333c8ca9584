//! Transaction record storage

use super::meta::{TxMeta, TxMetaId, TxStatus};
use crate::error::{WalletError, WalletResult};

use ethers::types::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Storage of transaction records.
///
/// Every read must reflect a consistent snapshot at call time.
#[cfg_attr(test, mockall::automock)]
pub trait TxStateManager: Send + Sync {
    fn get_tx(&self, id: &TxMetaId) -> WalletResult<Option<TxMeta>>;

    /// Insert a record or replace the one with the same id
    fn add_or_update_tx(&self, meta: TxMeta) -> WalletResult<()>;

    /// Records in `status`, optionally restricted to one sender, oldest first
    fn get_transactions_by_status(
        &self,
        status: TxStatus,
        from: Option<Address>,
    ) -> WalletResult<Vec<TxMeta>>;

    /// Every record from one sender, read as a single snapshot, oldest first
    fn get_transactions_by_address(&self, from: Address) -> WalletResult<Vec<TxMeta>>;

    fn delete_tx(&self, id: &TxMetaId) -> WalletResult<bool>;
}

/// Process-local state manager
#[derive(Default)]
pub struct InMemoryStateManager {
    transactions: RwLock<HashMap<TxMetaId, TxMeta>>,
}

impl InMemoryStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }

    /// Count of records per status
    pub fn stats(&self) -> HashMap<TxStatus, usize> {
        let mut stats = HashMap::new();
        for meta in self.transactions.read().values() {
            *stats.entry(meta.status).or_insert(0) += 1;
        }
        stats
    }
}

impl TxStateManager for InMemoryStateManager {
    fn get_tx(&self, id: &TxMetaId) -> WalletResult<Option<TxMeta>> {
        Ok(self.transactions.read().get(id).cloned())
    }

    fn add_or_update_tx(&self, meta: TxMeta) -> WalletResult<()> {
        let mut transactions = self.transactions.write();
        if let Some(existing) = transactions.get(&meta.id) {
            if existing.status.is_terminal() && !existing.status.can_transition_to(meta.status) {
                return Err(WalletError::State(format!(
                    "tx {} is {} and cannot be updated to {}",
                    meta.id, existing.status, meta.status
                )));
            }
        }
        debug!("Storing tx {} ({})", meta.id, meta.status);
        transactions.insert(meta.id, meta);
        Ok(())
    }

    fn get_transactions_by_status(
        &self,
        status: TxStatus,
        from: Option<Address>,
    ) -> WalletResult<Vec<TxMeta>> {
        let mut metas: Vec<TxMeta> = self
            .transactions
            .read()
            .values()
            .filter(|meta| meta.status == status && from.map_or(true, |f| meta.from == f))
            .cloned()
            .collect();
        metas.sort_by_key(|meta| meta.created_at);
        Ok(metas)
    }

    fn get_transactions_by_address(&self, from: Address) -> WalletResult<Vec<TxMeta>> {
        let mut metas: Vec<TxMeta> = self
            .transactions
            .read()
            .values()
            .filter(|meta| meta.from == from)
            .cloned()
            .collect();
        metas.sort_by_key(|meta| meta.created_at);
        Ok(metas)
    }

    fn delete_tx(&self, id: &TxMetaId) -> WalletResult<bool> {
        Ok(self.transactions.write().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::EthTransaction;

    fn meta(from: Address, status: TxStatus) -> TxMeta {
        let mut meta = TxMeta::new_unapproved(from, EthTransaction::default());
        meta.status = status;
        meta
    }

    #[test]
    fn test_filter_by_status_and_sender() {
        let store = InMemoryStateManager::new();
        let alice = Address::repeat_byte(0xa1);
        let bob = Address::repeat_byte(0xb0);

        store.add_or_update_tx(meta(alice, TxStatus::Submitted)).unwrap();
        store.add_or_update_tx(meta(alice, TxStatus::Confirmed)).unwrap();
        store.add_or_update_tx(meta(bob, TxStatus::Submitted)).unwrap();

        let alice_submitted = store
            .get_transactions_by_status(TxStatus::Submitted, Some(alice))
            .unwrap();
        assert_eq!(alice_submitted.len(), 1);
        assert_eq!(alice_submitted[0].from, alice);

        let all_submitted = store
            .get_transactions_by_status(TxStatus::Submitted, None)
            .unwrap();
        assert_eq!(all_submitted.len(), 2);
        assert_eq!(store.stats().get(&TxStatus::Submitted), Some(&2));
    }

    #[test]
    fn test_update_replaces_record() {
        let store = InMemoryStateManager::new();
        let mut record = meta(Address::zero(), TxStatus::Unapproved);
        store.add_or_update_tx(record.clone()).unwrap();

        record.status = TxStatus::Approved;
        store.add_or_update_tx(record.clone()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get_tx(&record.id).unwrap().map(|m| m.status),
            Some(TxStatus::Approved)
        );
        assert!(store.delete_tx(&record.id).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_by_address() {
        let store = InMemoryStateManager::new();
        let alice = Address::repeat_byte(0xa1);
        store.add_or_update_tx(meta(alice, TxStatus::Approved)).unwrap();
        store.add_or_update_tx(meta(alice, TxStatus::Confirmed)).unwrap();
        store.add_or_update_tx(meta(Address::repeat_byte(0xb0), TxStatus::Submitted)).unwrap();

        let records = store.get_transactions_by_address(alice).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|m| m.from == alice));
    }

    #[test]
    fn test_terminal_records_are_not_mutated() {
        let store = InMemoryStateManager::new();
        let mut record = meta(Address::zero(), TxStatus::Dropped);
        store.add_or_update_tx(record.clone()).unwrap();

        record.status = TxStatus::Confirmed;
        assert!(matches!(
            store.add_or_update_tx(record.clone()),
            Err(WalletError::State(_))
        ));
        assert_eq!(
            store.get_tx(&record.id).unwrap().map(|m| m.status),
            Some(TxStatus::Dropped)
        );

        // failed publishes may still be approved again
        let mut failed = meta(Address::zero(), TxStatus::Error);
        store.add_or_update_tx(failed.clone()).unwrap();
        failed.status = TxStatus::Approved;
        store.add_or_update_tx(failed).unwrap();
    }
}

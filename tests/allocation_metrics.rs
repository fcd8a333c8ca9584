//! Allocation counter behaviour. Kept in its own test binary since the
//! prometheus registry is process wide.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wallet_txcoord::metrics::NONCE_ALLOCATED;
use wallet_txcoord::{
    EthTransaction, InMemoryStateManager, NetworkClient, Publisher, TransactionController,
    TxMetaId, TxReceipt, TxSigner, WalletError, WalletResult,
};

struct FixedCount(u64);

#[async_trait]
impl NetworkClient for FixedCount {
    async fn get_transaction_count(&self, _address: Address) -> WalletResult<U256> {
        Ok(U256::from(self.0))
    }

    async fn get_transaction_receipt(&self, _tx_hash: H256) -> WalletResult<Option<TxReceipt>> {
        Ok(None)
    }
}

struct AcceptAll;

#[async_trait]
impl Publisher for AcceptAll {
    async fn publish(&self, _signed_tx: Bytes) -> WalletResult<H256> {
        Ok(H256::repeat_byte(0x42))
    }
}

/// Refuses to sign until unlocked
#[derive(Default)]
struct LockedSigner {
    unlocked: AtomicBool,
}

impl TxSigner for LockedSigner {
    fn sign(&self, _from: Address, _tx: &EthTransaction) -> WalletResult<Bytes> {
        if !self.unlocked.load(Ordering::SeqCst) {
            return Err(WalletError::Wallet("keyring locked".to_string()));
        }
        Ok(Bytes::from(vec![0x01]))
    }
}

async fn try_until_settled(
    controller: &TransactionController,
    id: &TxMetaId,
) -> WalletResult<U256> {
    for _ in 0..1_000 {
        match controller.try_approve_transaction(id) {
            Err(e) if e.is_pending() => tokio::time::sleep(Duration::from_millis(1)).await,
            other => return other,
        }
    }
    panic!("approval of {} stayed pending", id);
}

#[tokio::test]
async fn test_only_stored_approvals_are_counted() {
    let signer = Arc::new(LockedSigner::default());
    let controller = TransactionController::new(
        Arc::new(InMemoryStateManager::new()),
        Arc::new(FixedCount(9)),
        Arc::new(AcceptAll),
        signer.clone(),
    );
    let from = Address::repeat_byte(0x33);
    let id = controller
        .add_unapproved_transaction(from, EthTransaction::default())
        .unwrap();
    let before = NONCE_ALLOCATED.get();

    let err = try_until_settled(&controller, &id).await.unwrap_err();
    assert!(matches!(err, WalletError::Wallet(_)));
    assert_eq!(NONCE_ALLOCATED.get(), before);

    signer.unlocked.store(true, Ordering::SeqCst);
    assert_eq!(try_until_settled(&controller, &id).await.unwrap(), U256::from(9));
    assert_eq!(NONCE_ALLOCATED.get(), before + 1);
}

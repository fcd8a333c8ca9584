//! Transaction lifecycle orchestration
//!
//! Unapproved -> Approved (nonce assigned) -> Submitted (hash assigned) ->
//! Confirmed | Dropped, with Approved -> Error -> Approved as the retry path
//! after a failed publish.

use super::nonce::NonceTracker;
use super::observer::{ObserverId, ObserverRegistry, TxObserver};
use super::pending::PendingTxTracker;
use super::signer::TxSigner;
use super::transaction::EthTransaction;
use crate::chain::{NetworkClient, Publisher};
use crate::error::{WalletError, WalletResult};
use crate::metrics;
use crate::state::{TxMeta, TxMetaId, TxStateManager, TxStatus};

use chrono::Utc;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Collaborators shared with the publish completion task
#[derive(Clone)]
struct Shared {
    state_manager: Arc<dyn TxStateManager>,
    nonce_tracker: Arc<NonceTracker>,
    observers: Arc<ObserverRegistry>,
}

pub struct TransactionController {
    shared: Shared,
    pending_tracker: PendingTxTracker,
    signer: Arc<dyn TxSigner>,
    publisher: Arc<dyn Publisher>,
}

impl TransactionController {
    pub fn new(
        state_manager: Arc<dyn TxStateManager>,
        network: Arc<dyn NetworkClient>,
        publisher: Arc<dyn Publisher>,
        signer: Arc<dyn TxSigner>,
    ) -> Self {
        let nonce_tracker = Arc::new(NonceTracker::new(state_manager.clone(), network.clone()));
        let pending_tracker = PendingTxTracker::new(state_manager.clone(), network);

        Self {
            shared: Shared {
                state_manager,
                nonce_tracker,
                observers: Arc::new(ObserverRegistry::new()),
            },
            pending_tracker,
            signer,
            publisher,
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn TxObserver>) -> ObserverId {
        self.shared.observers.add_observer(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.remove_observer(id)
    }

    pub fn nonce_tracker(&self) -> &NonceTracker {
        &self.shared.nonce_tracker
    }

    /// Store a new unapproved transaction and notify observers
    pub fn add_unapproved_transaction(
        &self,
        from: Address,
        tx: EthTransaction,
    ) -> WalletResult<TxMetaId> {
        let meta = TxMeta::new_unapproved(from, tx);
        let id = meta.id;

        self.shared.state_manager.add_or_update_tx(meta.clone())?;
        info!("New unapproved transaction {} from {:?}", id, from);
        metrics::record_tx_status(TxStatus::Unapproved);

        self.shared.observers.notify_new_unapproved_tx(&meta);
        Ok(id)
    }

    /// Approve a transaction, returning false when it is unknown, in the wrong
    /// state, or its nonce is not available yet. The caller owns retries.
    pub fn approve_transaction(&self, id: &TxMetaId) -> bool {
        match self.try_approve_transaction(id) {
            Ok(_) => true,
            Err(e) if e.is_pending() => {
                debug!("Approval of {} deferred: {}", id, e);
                false
            }
            Err(e) => {
                warn!("Approval of {} failed: {}", id, e);
                false
            }
        }
    }

    /// Approve a transaction: assign its nonce, sign it and start publishing.
    ///
    /// Returns the assigned nonce. Publishing completes in the background.
    pub fn try_approve_transaction(&self, id: &TxMetaId) -> WalletResult<U256> {
        let from = self.approvable(id)?.from;
        let reservation = self.shared.nonce_tracker.reserve_next_nonce(from)?;
        let nonce = reservation.nonce();

        // re-read under the address lock, a concurrent approval may have won
        let mut meta = self.approvable(id)?;

        let mut stamped = meta.tx.clone();
        stamped.nonce = Some(nonce);
        let signed_tx = self.signer.sign(meta.from, &stamped)?;

        meta.transition_to(TxStatus::Approved)?;
        meta.tx = stamped;
        meta.last_error = None;
        self.shared.state_manager.add_or_update_tx(meta.clone())?;

        // the nonce is visible to the next allocation from here on
        drop(reservation);
        metrics::record_nonce_allocated();

        info!("Approved transaction {} with nonce {}", id, nonce);
        metrics::record_tx_status(TxStatus::Approved);
        self.shared.observers.notify_status_changed(&meta);

        self.publish_transaction(*id, signed_tx);
        Ok(nonce)
    }

    /// Reject an unapproved transaction
    pub fn reject_transaction(&self, id: &TxMetaId) -> bool {
        let result = self.get_existing(id).and_then(|mut meta| {
            meta.transition_to(TxStatus::Rejected)?;
            self.shared.state_manager.add_or_update_tx(meta.clone())?;
            Ok(meta)
        });

        match result {
            Ok(meta) => {
                info!("Rejected transaction {}", id);
                metrics::record_tx_status(TxStatus::Rejected);
                self.shared.observers.notify_status_changed(&meta);
                true
            }
            Err(e) => {
                warn!("Rejection of {} failed: {}", id, e);
                false
            }
        }
    }

    pub fn get_transaction(&self, id: &TxMetaId) -> WalletResult<Option<TxMeta>> {
        self.shared.state_manager.get_tx(id)
    }

    pub fn get_next_nonce(&self, from: Address) -> WalletResult<U256> {
        self.shared.nonce_tracker.get_next_nonce(from)
    }

    /// Reconcile submitted transactions with the chain, notifying observers of
    /// every status change. Returns the number of records updated.
    pub async fn update_pending_transactions(&self) -> WalletResult<usize> {
        let changed = self.pending_tracker.update_pending_transactions().await?;
        for meta in &changed {
            metrics::record_tx_status(meta.status);
            self.shared.observers.notify_status_changed(meta);
        }
        Ok(changed.len())
    }

    fn get_existing(&self, id: &TxMetaId) -> WalletResult<TxMeta> {
        self.shared
            .state_manager
            .get_tx(id)?
            .ok_or_else(|| WalletError::TransactionNotFound {
                tx_id: id.to_string(),
            })
    }

    fn approvable(&self, id: &TxMetaId) -> WalletResult<TxMeta> {
        let meta = self.get_existing(id)?;
        if !meta.status.can_transition_to(TxStatus::Approved) {
            return Err(WalletError::InvalidStateTransition {
                from: meta.status.to_string(),
                to: TxStatus::Approved.to_string(),
            });
        }
        Ok(meta)
    }

    fn publish_transaction(&self, id: TxMetaId, signed_tx: Bytes) {
        let shared = self.shared.clone();

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let err = WalletError::Internal("no async runtime to publish on".to_string());
                shared.on_publish_result(id, Err(err));
                return;
            }
        };

        let publisher = self.publisher.clone();
        handle.spawn(async move {
            let result = publisher.publish(signed_tx).await;
            shared.on_publish_result(id, result);
        });
    }
}

impl Shared {
    fn on_publish_result(&self, id: TxMetaId, result: WalletResult<H256>) {
        let mut meta = match self.state_manager.get_tx(&id) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                warn!("Published transaction {} no longer stored", id);
                return;
            }
            Err(e) => {
                error!("Failed to load published transaction {}: {}", id, e);
                return;
            }
        };

        let from = meta.from;
        let status = match result {
            Ok(tx_hash) => {
                if let Err(e) = meta.transition_to(TxStatus::Submitted) {
                    error!("Cannot mark {} submitted: {}", id, e);
                    return;
                }
                meta.tx_hash = Some(tx_hash);
                meta.submitted_at = Some(Utc::now());
                info!("Transaction {} submitted: {:?}", id, tx_hash);
                TxStatus::Submitted
            }
            Err(publish_error) => {
                if let Err(e) = meta.transition_to(TxStatus::Error) {
                    error!("Cannot mark {} failed: {}", id, e);
                    return;
                }
                let released = meta.tx.nonce.take();
                meta.last_error = Some(publish_error.to_string());
                warn!(
                    "Publishing transaction {} failed, released nonce {:?}: {}",
                    id, released, publish_error
                );
                metrics::record_publish_failure();
                TxStatus::Error
            }
        };

        if let Err(e) = self.state_manager.add_or_update_tx(meta.clone()) {
            error!("Failed to store transaction {}: {}", id, e);
            return;
        }
        if status == TxStatus::Error {
            self.nonce_tracker.invalidate(from);
        }

        metrics::record_tx_status(status);
        self.observers.notify_status_changed(&meta);
    }
}

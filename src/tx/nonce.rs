//! Nonce allocation for reliable transaction submission
//!
//! Merges three independently updated sources into the next usable nonce:
//! - The transaction count reported by the network (a floor)
//! - Locally confirmed transactions
//! - Locally approved or submitted transactions not yet mined
//!
//! The network count is cached per address and consumed by each successful
//! allocation, so every allocation starts from a fresh query.

use crate::chain::NetworkClient;
use crate::error::{PendingReason, WalletError, WalletResult};
use crate::metrics;
use crate::state::{TxMeta, TxStateManager, TxStatus};

use dashmap::{DashMap, DashSet};
use ethers::types::{Address, U256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

/// Held while a nonce is being allocated for an address
struct AllocationGuard {
    in_flight: Arc<DashSet<Address>>,
    address: Address,
}

impl AllocationGuard {
    /// Non-blocking: returns None when another allocation holds the address
    fn try_acquire(in_flight: &Arc<DashSet<Address>>, address: Address) -> Option<Self> {
        if !in_flight.insert(address) {
            return None;
        }
        Some(Self {
            in_flight: in_flight.clone(),
            address,
        })
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.address);
    }
}

/// A computed nonce whose address stays locked until the reservation drops
pub struct NonceReservation {
    nonce: U256,
    guard: AllocationGuard,
}

impl NonceReservation {
    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    pub fn address(&self) -> Address {
        self.guard.address
    }
}

/// Computes the next nonce per address
pub struct NonceTracker {
    state_manager: Arc<dyn TxStateManager>,
    network: Arc<dyn NetworkClient>,
    /// Last transaction count reported by the network, consumed on allocation
    network_nonces: Arc<DashMap<Address, U256>>,
    /// Addresses with a transaction count query outstanding
    queries: Arc<DashSet<Address>>,
    /// Addresses with an allocation in progress
    allocating: Arc<DashSet<Address>>,
}

impl NonceTracker {
    pub fn new(state_manager: Arc<dyn TxStateManager>, network: Arc<dyn NetworkClient>) -> Self {
        Self {
            state_manager,
            network,
            network_nonces: Arc::new(DashMap::new()),
            queries: Arc::new(DashSet::new()),
            allocating: Arc::new(DashSet::new()),
        }
    }

    /// Get the next nonce for `from`.
    ///
    /// Returns `NoncePending` while the network count is unknown or another
    /// allocation for the address is running; the caller retries.
    pub fn get_next_nonce(&self, from: Address) -> WalletResult<U256> {
        let nonce = self.reserve_next_nonce(from)?.nonce();
        metrics::record_nonce_allocated();
        Ok(nonce)
    }

    /// Like [`get_next_nonce`](Self::get_next_nonce), but keeps the address
    /// locked until the returned reservation is dropped. The caller records
    /// the allocation once the nonce is stored.
    pub fn reserve_next_nonce(&self, from: Address) -> WalletResult<NonceReservation> {
        if !self.network_nonces.contains_key(&from) {
            self.request_network_nonce(from);
            return Err(pending(from, PendingReason::AwaitingNetworkNonce));
        }

        let guard = AllocationGuard::try_acquire(&self.allocating, from)
            .ok_or_else(|| pending(from, PendingReason::AllocationInFlight))?;

        // A racing allocation may have consumed the entry after our check
        let network_nonce = match self.network_nonces.remove(&from) {
            Some((_, nonce)) => nonce,
            None => {
                drop(guard);
                self.request_network_nonce(from);
                return Err(pending(from, PendingReason::AwaitingNetworkNonce));
            }
        };

        let nonce = self.compute_next_nonce(from, network_nonce)?;

        debug!(
            "Reserved nonce {} for {:?} (network nonce {})",
            nonce, from, network_nonce
        );

        Ok(NonceReservation { nonce, guard })
    }

    /// Drop the cached network count so the next allocation queries again
    pub fn invalidate(&self, from: Address) {
        if self.network_nonces.remove(&from).is_some() {
            debug!("Invalidated cached network nonce for {:?}", from);
        }
    }

    /// Cached network count, if any
    pub fn cached_network_nonce(&self, from: Address) -> Option<U256> {
        self.network_nonces.get(&from).map(|n| *n)
    }

    fn compute_next_nonce(&self, from: Address, network_nonce: U256) -> WalletResult<U256> {
        // one read, so a record moving along its lifecycle is seen exactly once
        let records = self.state_manager.get_transactions_by_address(from)?;

        let confirmed: Vec<&TxMeta> = records
            .iter()
            .filter(|meta| meta.status == TxStatus::Confirmed)
            .collect();
        let local_highest = highest_locally_confirmed(&confirmed);

        let highest_confirmed = std::cmp::max(network_nonce, local_highest);

        let held_nonces: BTreeSet<U256> = records
            .iter()
            .filter(|meta| meta.status.holds_nonce())
            .filter_map(TxMeta::nonce)
            .collect();

        let highest_continuous_from = highest_continuous_from(&held_nonces, highest_confirmed);

        let nonce = std::cmp::max(network_nonce, highest_continuous_from);

        if held_nonces.contains(&nonce) {
            error!("Nonce {} for {:?} is already held by a local transaction", nonce, from);
            return Err(WalletError::NonceInvariant {
                address: from,
                nonce,
                message: "nonce already held by an approved or submitted transaction"
                    .to_string(),
            });
        }

        Ok(nonce)
    }

    /// Issue a transaction count query unless one is already outstanding
    fn request_network_nonce(&self, from: Address) {
        if !self.queries.insert(from) {
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available to query nonce for {:?}", from);
                self.queries.remove(&from);
                return;
            }
        };

        let network = self.network.clone();
        let network_nonces = self.network_nonces.clone();
        let queries = self.queries.clone();
        metrics::set_outstanding_nonce_queries(queries.len());

        handle.spawn(async move {
            match network.get_transaction_count(from).await {
                Ok(count) => {
                    debug!("Network nonce for {:?}: {}", from, count);
                    network_nonces.insert(from, count);
                }
                Err(e) => {
                    warn!("Failed to get network nonce for {:?}: {}", from, e);
                }
            }
            queries.remove(&from);
            metrics::set_outstanding_nonce_queries(queries.len());
        });
    }
}

fn pending(address: Address, reason: PendingReason) -> WalletError {
    metrics::record_nonce_pending(reason);
    WalletError::NoncePending { address, reason }
}

/// One past the highest confirmed nonce, or zero without confirmed records
fn highest_locally_confirmed(metas: &[&TxMeta]) -> U256 {
    metas
        .iter()
        .filter_map(|meta| meta.nonce())
        .max()
        .map(|highest| highest.saturating_add(U256::one()))
        .unwrap_or_default()
}

/// First nonce at or after `start` that no held transaction occupies
fn highest_continuous_from(held: &BTreeSet<U256>, start: U256) -> U256 {
    let mut highest = start;
    while held.contains(&highest) {
        highest += U256::one();
    }
    highest
}

//! Transaction event subscribers

use crate::state::TxMeta;

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives transaction lifecycle events
pub trait TxObserver: Send + Sync {
    fn on_new_unapproved_tx(&self, meta: &TxMeta);

    fn on_transaction_status_changed(&self, _meta: &TxMeta) {}
}

/// Handle returned by [`ObserverRegistry::add_observer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered list of subscribers.
///
/// Events are delivered in registration order to the observers registered
/// when the event fires. Callbacks run outside the lock and may add or
/// remove observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<(ObserverId, Arc<dyn TxObserver>)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn TxObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Returns false if the observer was not registered
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn notify_new_unapproved_tx(&self, meta: &TxMeta) {
        for observer in self.snapshot() {
            observer.on_new_unapproved_tx(meta);
        }
    }

    pub fn notify_status_changed(&self, meta: &TxMeta) {
        for observer in self.snapshot() {
            observer.on_transaction_status_changed(meta);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn TxObserver>> {
        self.observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }
}

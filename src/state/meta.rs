//! Local transaction records

use crate::error::{WalletError, WalletResult};
use crate::tx::EthTransaction;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a local transaction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxMetaId(Uuid);

impl TxMetaId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxMetaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxMetaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TxMetaId {
    type Err = WalletError;

    fn from_str(s: &str) -> WalletResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| WalletError::TransactionNotFound { tx_id: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Unapproved,
    Approved,
    Submitted,
    Confirmed,
    Rejected,
    Dropped,
    Error,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Unapproved => "unapproved",
            TxStatus::Approved => "approved",
            TxStatus::Submitted => "submitted",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Rejected => "rejected",
            TxStatus::Dropped => "dropped",
            TxStatus::Error => "error",
        }
    }

    /// Terminal records are retained but never mutated. Error is terminal
    /// except for the re-approval path.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed | TxStatus::Rejected | TxStatus::Dropped | TxStatus::Error
        )
    }

    /// Whether a record holding this status still occupies its nonce slot
    pub fn holds_nonce(&self) -> bool {
        matches!(self, TxStatus::Approved | TxStatus::Submitted)
    }

    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Unapproved, Approved)
                | (Unapproved, Rejected)
                | (Approved, Submitted)
                | (Approved, Error)
                | (Submitted, Confirmed)
                | (Submitted, Dropped)
                | (Error, Approved)
        )
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction record owned by the state manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMeta {
    pub id: TxMetaId,
    pub from: Address,
    pub tx: EthTransaction,
    pub status: TxStatus,
    pub tx_hash: Option<H256>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl TxMeta {
    /// New unapproved record. Any nonce carried by `tx` is discarded.
    pub fn new_unapproved(from: Address, mut tx: EthTransaction) -> Self {
        tx.nonce = None;
        Self {
            id: TxMetaId::new(),
            from,
            tx,
            status: TxStatus::Unapproved,
            tx_hash: None,
            created_at: Utc::now(),
            submitted_at: None,
            confirmed_at: None,
            last_error: None,
        }
    }

    pub fn nonce(&self) -> Option<U256> {
        self.tx.nonce
    }

    /// Move to `next`, refusing transitions outside the lifecycle
    pub fn transition_to(&mut self, next: TxStatus) -> WalletResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(WalletError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use TxStatus::*;
        assert!(Unapproved.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Confirmed));
        assert!(Submitted.can_transition_to(Dropped));
        assert!(Approved.can_transition_to(Error));
        assert!(Error.can_transition_to(Approved));

        // no skipping, no regression
        assert!(!Unapproved.can_transition_to(Submitted));
        assert!(!Submitted.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Unapproved));
        for terminal in [Confirmed, Rejected, Dropped] {
            for next in [Unapproved, Approved, Submitted, Confirmed, Rejected, Dropped, Error] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_transition_to_rejects_skips() {
        let mut meta = TxMeta::new_unapproved(Address::zero(), EthTransaction::default());
        let err = meta.transition_to(TxStatus::Submitted).unwrap_err();
        assert!(matches!(err, WalletError::InvalidStateTransition { .. }));
        assert_eq!(meta.status, TxStatus::Unapproved);

        meta.transition_to(TxStatus::Approved).unwrap();
        assert_eq!(meta.status, TxStatus::Approved);
    }

    #[test]
    fn test_new_unapproved_discards_nonce() {
        let tx = EthTransaction {
            nonce: Some(U256::from(9)),
            ..Default::default()
        };
        let meta = TxMeta::new_unapproved(Address::zero(), tx);
        assert_eq!(meta.status, TxStatus::Unapproved);
        assert_eq!(meta.nonce(), None);
    }

    #[test]
    fn test_id_round_trips_through_string() {
        let id = TxMetaId::new();
        assert_eq!(id.to_string().parse::<TxMetaId>().unwrap(), id);
        assert!("garbage".parse::<TxMetaId>().is_err());
    }
}

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::entry::EntryStatus;
use crate::payout::PayoutStatus;

/// The record a failure refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Entry(Uuid),
    /// A transaction being recorded for a store, before it has an entry id.
    Transaction(String),
    Wallet(String),
    Payout(Uuid),
    CommissionRate(RateTarget),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry(id) => write!(f, "ledger entry {}", id),
            Self::Transaction(store_id) => write!(f, "new transaction of store {}", store_id),
            Self::Wallet(store_id) => write!(f, "wallet of store {}", store_id),
            Self::Payout(id) => write!(f, "payout {}", id),
            Self::CommissionRate(target) => write!(f, "{} commission rate", target),
        }
    }
}

/// Where a commission rate applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateTarget {
    Global,
    Store(String),
    Transaction(String),
    Entry(Uuid),
}

impl fmt::Display for RateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Store(store_id) => write!(f, "store {}", store_id),
            Self::Transaction(store_id) => write!(f, "new transaction of store {}", store_id),
            Self::Entry(id) => write!(f, "ledger entry {}", id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid amount {amount} for {entity}: amount must be positive")]
    InvalidAmount { entity: EntityRef, amount: i64 },

    #[error("invalid commission rate {rate} for {target}: rate must be within [0, 1]")]
    InvalidRate { target: RateTarget, rate: f64 },

    #[error(
        "insufficient balance in wallet of store {store_id}: requested {requested}, available {available}"
    )]
    InsufficientBalance {
        store_id: String,
        requested: u64,
        available: u64,
    },

    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: EntityRef,
        from: String,
        to: String,
    },

    #[error("payout {payout_id} was already processed (status {status})")]
    AlreadyProcessed {
        payout_id: Uuid,
        status: PayoutStatus,
    },

    #[error("rejecting payout {payout_id} requires a non-blank reason")]
    MissingReason { payout_id: Uuid },

    #[error(
        "replacing the invoice of ledger entry {entry_id} requires exactly one of a new rate or a new fee amount"
    )]
    AmbiguousReplacement { entry_id: Uuid },

    #[error("{entity} not found")]
    NotFound { entity: EntityRef },

    #[error("actor {actor} is not authorized to administer payouts")]
    Unauthorized { actor: String },

    #[error("concurrent modification of {entity}: {detail}")]
    Conflict { entity: EntityRef, detail: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    pub fn entry_transition(id: Uuid, from: EntryStatus, to: EntryStatus) -> Self {
        Self::InvalidTransition {
            entity: EntityRef::Entry(id),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn payout_transition(id: Uuid, from: PayoutStatus, to: PayoutStatus) -> Self {
        Self::InvalidTransition {
            entity: EntityRef::Payout(id),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Infrastructure failures. A write that ended this way has an unknown
    /// outcome and must be resolved by re-reading state before any retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Timeout(_))
    }

    pub fn is_business(&self) -> bool {
        !self.is_transient()
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_entity_and_invariant() {
        let id = Uuid::now_v7();
        let err = LedgerError::AlreadyProcessed {
            payout_id: id,
            status: PayoutStatus::Approved,
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("approved"));

        let err = LedgerError::InsufficientBalance {
            store_id: "S1".to_string(),
            requested: 50_000,
            available: 0,
        };
        assert!(err.to_string().contains("store S1"));

        let err = LedgerError::InvalidRate {
            target: RateTarget::Transaction("S1".to_string()),
            rate: 1.5,
        };
        assert_eq!(
            err.to_string(),
            "invalid commission rate 1.5 for new transaction of store S1: rate must be within [0, 1]"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(LedgerError::Storage("down".into()).is_transient());
        assert!(
            LedgerError::MissingReason {
                payout_id: Uuid::now_v7()
            }
            .is_business()
        );
    }
}

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::entry::{Adjustment, EntryChange, EntryStatus, LedgerEntry};
use crate::payout::{PayoutRequest, PayoutStatus, StatusChange};
use crate::wallet::WalletTransaction;

/// One write inside an [`ExecutionPlan`]. Guards (`expected*`) are checked
/// inside the adapter's atomic section, never before it.
#[derive(Debug, Clone)]
pub enum Operation {
    InsertEntry {
        entry: LedgerEntry,
    },
    TransitionEntry {
        entry_id: Uuid,
        expected: Vec<EntryStatus>,
        change: EntryChange,
    },
    /// Assert an entry's status without changing it
    GuardEntry {
        entry_id: Uuid,
        expected: Vec<EntryStatus>,
        action: &'static str,
    },
    InsertAdjustment {
        adjustment: Adjustment,
    },
    /// Move a store's `pending` balance; saturates at zero
    HoldPending {
        store_id: String,
        delta: i64,
    },
    Credit {
        transaction: WalletTransaction,
        /// Amount moving out of `pending` together with this credit
        release_pending: u64,
    },
    /// Fails the whole plan with `InsufficientBalance` if `available` is short
    Debit {
        transaction: WalletTransaction,
    },
    /// Replace a wallet's balances, conditioned on the version that was read
    OverwriteBalance {
        store_id: String,
        expected_version: u64,
        available: u64,
        pending: u64,
        transaction: Option<WalletTransaction>,
    },
    InsertPayout {
        payout: PayoutRequest,
        /// Hashed idempotency key
        idempotency_key: Option<String>,
    },
    TransitionPayout {
        payout_id: Uuid,
        expected: PayoutStatus,
        change: StatusChange,
    },
}

impl Operation {
    fn wallet_store(&self) -> Option<&str> {
        match self {
            Operation::HoldPending { store_id, .. }
            | Operation::OverwriteBalance { store_id, .. } => Some(store_id),
            Operation::Credit { transaction, .. } | Operation::Debit { transaction } => {
                Some(&transaction.store_id)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::InsertEntry { .. } => "insert_entry",
            Operation::TransitionEntry { .. } => "transition_entry",
            Operation::GuardEntry { .. } => "guard_entry",
            Operation::InsertAdjustment { .. } => "insert_adjustment",
            Operation::HoldPending { .. } => "hold_pending",
            Operation::Credit { .. } => "credit",
            Operation::Debit { .. } => "debit",
            Operation::OverwriteBalance { .. } => "overwrite_balance",
            Operation::InsertPayout { .. } => "insert_payout",
            Operation::TransitionPayout { .. } => "transition_payout",
        }
    }
}

/// An ordered set of writes that an adapter applies all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    operations: Vec<Operation>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(op: Operation) -> Self {
        let mut plan = Self::new();
        plan.add(op);
        plan
    }

    pub fn add(&mut self, op: Operation) -> &mut Self {
        self.operations.push(op);
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Stores whose wallet row the plan touches, in a stable order.
    /// Adapters lock wallets in this order so concurrent plans cannot deadlock.
    pub fn wallet_locks(&self) -> Vec<String> {
        self.operations
            .iter()
            .filter_map(Operation::wallet_store)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

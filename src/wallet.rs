use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::LedgerContext;
use crate::entry::EntryStatus;
use crate::error::{EntityRef, LedgerError};
use crate::payout::PayoutStatus;
use crate::plan::{ExecutionPlan, Operation};

/// Stored wallet record of one store.
///
/// `available` is never negative: it is unsigned, and every debit is checked
/// against it inside the adapter's atomic section. `version` increases on
/// every mutation and is the compare-and-swap token for overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub store_id: String,
    pub available: u64,
    pub pending: u64,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
}

impl WalletBalance {
    /// A store that has never been credited.
    pub fn empty(store_id: &str) -> Self {
        Self {
            store_id: store_id.to_string(),
            available: 0,
            pending: 0,
            version: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.available + self.pending
    }

    pub(crate) fn hold_pending(&mut self, delta: i64, at: DateTime<Utc>) {
        self.pending = if delta >= 0 {
            self.pending.saturating_add(delta as u64)
        } else {
            self.pending.saturating_sub(delta.unsigned_abs())
        };
        self.touch(at);
    }

    pub(crate) fn apply_credit(&mut self, amount: u64, release_pending: u64, at: DateTime<Utc>) {
        self.available += amount;
        self.pending = self.pending.saturating_sub(release_pending);
        self.touch(at);
    }

    pub(crate) fn apply_debit(&mut self, amount: u64, at: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.available < amount {
            return Err(LedgerError::InsufficientBalance {
                store_id: self.store_id.clone(),
                requested: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        self.touch(at);
        Ok(())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.last_updated = at;
    }
}

/// Balance view returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub store_id: String,
    pub available: u64,
    pub pending: u64,
    pub total: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Balance {
    fn from_wallet(store_id: &str, wallet: Option<WalletBalance>) -> Self {
        match wallet {
            Some(w) => Self {
                store_id: w.store_id.clone(),
                available: w.available,
                pending: w.pending,
                total: w.total(),
                last_updated: Some(w.last_updated),
            },
            None => Self {
                store_id: store_id.to_string(),
                available: 0,
                pending: 0,
                total: 0,
                last_updated: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "credit" => Some(TransactionType::Credit),
            "debit" => Some(TransactionType::Debit),
            _ => None,
        }
    }
}

/// What caused a wallet movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletSource {
    OrderPayment,
    Adjustment,
    Payout,
    Reconciliation,
}

impl WalletSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletSource::OrderPayment => "order_payment",
            WalletSource::Adjustment => "adjustment",
            WalletSource::Payout => "payout",
            WalletSource::Reconciliation => "reconciliation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "order_payment" => Some(WalletSource::OrderPayment),
            "adjustment" => Some(WalletSource::Adjustment),
            "payout" => Some(WalletSource::Payout),
            "reconciliation" => Some(WalletSource::Reconciliation),
            _ => None,
        }
    }
}

impl fmt::Display for WalletSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedIds {
    pub order_id: Option<Uuid>,
    pub payout_id: Option<Uuid>,
}

impl RelatedIds {
    pub fn order(id: Uuid) -> Self {
        Self {
            order_id: Some(id),
            payout_id: None,
        }
    }

    pub fn payout(id: Uuid) -> Self {
        Self {
            order_id: None,
            payout_id: Some(id),
        }
    }
}

/// Append-only audit record of one wallet movement. Never edited or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub store_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: u64,
    pub source: WalletSource,
    pub related_order_id: Option<Uuid>,
    pub related_payout_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    fn new(
        kind: TransactionType,
        store_id: &str,
        amount: u64,
        source: WalletSource,
        related: RelatedIds,
        description: &str,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            store_id: store_id.to_string(),
            kind,
            amount,
            source,
            related_order_id: related.order_id,
            related_payout_id: related.payout_id,
            description: description.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn credit(
        store_id: &str,
        amount: u64,
        source: WalletSource,
        related: RelatedIds,
        description: &str,
    ) -> Self {
        Self::new(TransactionType::Credit, store_id, amount, source, related, description)
    }

    pub fn debit(
        store_id: &str,
        amount: u64,
        source: WalletSource,
        related: RelatedIds,
        description: &str,
    ) -> Self {
        Self::new(TransactionType::Debit, store_id, amount, source, related, description)
    }

    /// Effect on `available`.
    pub fn signed_amount(&self) -> i64 {
        match self.kind {
            TransactionType::Credit => self.amount as i64,
            TransactionType::Debit => -(self.amount as i64),
        }
    }
}

/// Outcome of re-deriving a wallet from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub store_id: String,
    pub previous_available: u64,
    pub previous_pending: u64,
    pub available: u64,
    pub pending: u64,
    /// `available - previous_available`
    pub drift: i64,
    /// How far below zero the ledger-derived balance fell before clamping
    pub shortfall: u64,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.drift == 0 && self.pending == self.previous_pending && self.shortfall == 0
    }
}

/// Per-store wallet operations.
#[derive(Clone)]
pub struct Wallet {
    ctx: LedgerContext,
}

impl Wallet {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Stores without a wallet record read as all zeros.
    pub async fn get_balance(&self, store_id: &str) -> Result<Balance, LedgerError> {
        let wallet = self.ctx.get_wallet(store_id).await?;
        Ok(Balance::from_wallet(store_id, wallet))
    }

    pub async fn credit(
        &self,
        store_id: &str,
        amount: u64,
        source: WalletSource,
        related: RelatedIds,
        description: &str,
    ) -> Result<WalletTransaction, LedgerError> {
        require_positive(store_id, amount)?;

        let transaction = WalletTransaction::credit(store_id, amount, source, related, description);
        self.ctx
            .execute(&ExecutionPlan::single(Operation::Credit {
                transaction: transaction.clone(),
                release_pending: 0,
            }))
            .await?;

        counter!("ledger.wallet.credits").increment(1);
        tracing::info!(store_id, amount, source = %source, "wallet credited");
        Ok(transaction)
    }

    pub async fn debit(
        &self,
        store_id: &str,
        amount: u64,
        payout_id: Uuid,
        description: &str,
    ) -> Result<WalletTransaction, LedgerError> {
        require_positive(store_id, amount)?;

        let transaction = WalletTransaction::debit(
            store_id,
            amount,
            WalletSource::Payout,
            RelatedIds::payout(payout_id),
            description,
        );
        self.ctx
            .execute(&ExecutionPlan::single(Operation::Debit {
                transaction: transaction.clone(),
            }))
            .await?;

        counter!("ledger.wallet.debits").increment(1);
        tracing::info!(store_id, amount, %payout_id, "wallet debited");
        Ok(transaction)
    }

    pub async fn transactions(&self, store_id: &str) -> Result<Vec<WalletTransaction>, LedgerError> {
        self.ctx.get_wallet_transactions(store_id).await
    }

    /// Fold the transaction log into the available balance it implies.
    pub async fn replay(&self, store_id: &str) -> Result<i64, LedgerError> {
        let transactions = self.ctx.get_wallet_transactions(store_id).await?;
        Ok(transactions.iter().map(WalletTransaction::signed_amount).sum())
    }

    /// Overwrite the wallet with the balance derived from the ledger:
    ///
    /// - `available` = store amounts of paid/settled entries, plus their
    ///   adjustments, minus approved and completed payouts
    /// - `pending` = store amounts of pending entries
    ///
    /// The difference is recorded as one reconciliation wallet transaction.
    /// Running it twice in a row leaves the second run with no drift.
    ///
    /// A wallet movement that commits while the ledger is being read makes
    /// the overwrite fail with [`LedgerError::Conflict`]; the caller retries.
    pub async fn reconcile_from_ledger(&self, store_id: &str) -> Result<Reconciliation, LedgerError> {
        // The version must be captured before the ledger snapshot.
        let current = self
            .ctx
            .get_wallet(store_id)
            .await?
            .unwrap_or_else(|| WalletBalance::empty(store_id));
        let entries = self.ctx.get_entries_for_store(store_id).await?;
        let adjustments = self.ctx.get_adjustments_for_store(store_id).await?;
        let payouts = self.ctx.get_payouts_for_store(store_id).await?;

        let statuses: HashMap<Uuid, EntryStatus> =
            entries.iter().map(|e| (e.id, e.status)).collect();

        let earned: i64 = entries
            .iter()
            .filter(|e| e.status.is_earned())
            .map(|e| e.store_amount as i64)
            .sum();
        let adjusted: i64 = adjustments
            .iter()
            .filter(|a| statuses.get(&a.entry_id).is_some_and(EntryStatus::is_earned))
            .map(|a| a.delta_store_amount)
            .sum();
        let paid_out: i64 = payouts
            .iter()
            .filter(|p| matches!(p.status, PayoutStatus::Approved | PayoutStatus::Completed))
            .map(|p| p.amount as i64)
            .sum();
        let pending: u64 = entries
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .map(|e| e.store_amount)
            .sum();

        let derived = earned + adjusted - paid_out;
        let shortfall = if derived < 0 { derived.unsigned_abs() } else { 0 };
        let available = derived.max(0) as u64;
        if shortfall > 0 {
            tracing::warn!(
                store_id,
                shortfall,
                "ledger-derived balance is negative, clamping wallet to zero"
            );
        }

        let report = Reconciliation {
            store_id: store_id.to_string(),
            previous_available: current.available,
            previous_pending: current.pending,
            available,
            pending,
            drift: available as i64 - current.available as i64,
            shortfall,
        };

        if report.drift == 0 && report.pending == current.pending {
            tracing::debug!(store_id, "wallet agrees with ledger");
            return Ok(report);
        }

        let description = "reconciled from ledger";
        let transaction = match report.drift {
            0 => None,
            d if d > 0 => Some(WalletTransaction::credit(
                store_id,
                d as u64,
                WalletSource::Reconciliation,
                RelatedIds::default(),
                description,
            )),
            d => Some(WalletTransaction::debit(
                store_id,
                d.unsigned_abs(),
                WalletSource::Reconciliation,
                RelatedIds::default(),
                description,
            )),
        };

        self.ctx
            .execute(&ExecutionPlan::single(Operation::OverwriteBalance {
                store_id: store_id.to_string(),
                expected_version: current.version,
                available,
                pending,
                transaction,
            }))
            .await?;

        tracing::warn!(
            store_id,
            drift = report.drift,
            previous_pending = report.previous_pending,
            pending = report.pending,
            "wallet drifted from ledger and was repaired"
        );
        Ok(report)
    }
}

pub(crate) fn require_positive(store_id: &str, amount: u64) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount {
            entity: EntityRef::Wallet(store_id.to_string()),
            amount: 0,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use std::sync::Arc;
    use std::time::Duration;

    fn wallet() -> Wallet {
        let ctx = LedgerContext::new(Arc::new(MemoryAdapter::new()), Duration::from_secs(1));
        Wallet::new(ctx)
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut w = WalletBalance::empty("S1");
        w.apply_credit(100, 0, Utc::now());
        let err = w.apply_debit(101, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                requested: 101,
                available: 100,
                ..
            }
        ));
        assert_eq!(w.available, 100);
        assert_eq!(w.version, 1);
    }

    #[test]
    fn test_hold_pending_saturates() {
        let mut w = WalletBalance::empty("S1");
        w.hold_pending(50, Utc::now());
        w.hold_pending(-80, Utc::now());
        assert_eq!(w.pending, 0);
    }

    #[tokio::test]
    async fn test_unknown_store_reads_zero() {
        let balance = wallet().get_balance("nobody").await.unwrap();
        assert_eq!(balance.available, 0);
        assert_eq!(balance.pending, 0);
        assert_eq!(balance.total, 0);
        assert!(balance.last_updated.is_none());
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let wallet = wallet();
        wallet
            .credit("S1", 500, WalletSource::Adjustment, RelatedIds::default(), "bonus")
            .await
            .unwrap();
        wallet
            .debit("S1", 200, Uuid::now_v7(), "payout")
            .await
            .unwrap();

        let balance = wallet.get_balance("S1").await.unwrap();
        assert_eq!(balance.available, 300);
        assert_eq!(balance.total, 300);

        let txs = wallet.transactions("S1").await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].kind, TransactionType::Credit);
        assert_eq!(txs[1].kind, TransactionType::Debit);
        assert_eq!(wallet.replay("S1").await.unwrap(), 300);
    }

    #[tokio::test]
    async fn test_zero_amounts_rejected() {
        let wallet = wallet();
        assert!(matches!(
            wallet
                .credit("S1", 0, WalletSource::Adjustment, RelatedIds::default(), "x")
                .await,
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            wallet.debit("S1", 0, Uuid::now_v7(), "x").await,
            Err(LedgerError::InvalidAmount { .. })
        ));
    }

    #[tokio::test]
    async fn test_overdraft_leaves_no_trace() {
        let wallet = wallet();
        wallet
            .credit("S1", 100, WalletSource::Adjustment, RelatedIds::default(), "seed")
            .await
            .unwrap();

        let err = wallet.debit("S1", 150, Uuid::now_v7(), "too much").await;
        assert!(matches!(err, Err(LedgerError::InsufficientBalance { .. })));
        assert_eq!(wallet.get_balance("S1").await.unwrap().available, 100);
        assert_eq!(wallet.transactions("S1").await.unwrap().len(), 1);
    }
}

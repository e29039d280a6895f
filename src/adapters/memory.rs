use crate::{
    Adjustment, EntityRef, ExecutionPlan, LedgerAdapter, LedgerEntry, LedgerError, Operation,
    PayoutRequest, PayoutStatus, WalletBalance, WalletTransaction,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Default)]
struct MemoryStore {
    entries: HashMap<Uuid, LedgerEntry>,
    adjustments: Vec<Adjustment>,
    wallets: HashMap<String, WalletBalance>,
    wallet_transactions: Vec<WalletTransaction>,
    payouts: HashMap<Uuid, PayoutRequest>,
    idempotency_keys: HashMap<String, Uuid>,
    global_rate: Option<f64>,
    store_rates: HashMap<String, f64>,
}

impl MemoryStore {
    fn wallet_mut(&mut self, store_id: &str) -> &mut WalletBalance {
        self.wallets
            .entry(store_id.to_string())
            .or_insert_with(|| WalletBalance::empty(store_id))
    }

    fn apply(&mut self, op: &Operation) -> Result<(), LedgerError> {
        match op {
            Operation::InsertEntry { entry } => {
                if self.entries.contains_key(&entry.id) {
                    return Err(LedgerError::Conflict {
                        entity: EntityRef::Entry(entry.id),
                        detail: "entry already exists".to_string(),
                    });
                }
                self.entries.insert(entry.id, entry.clone());
            }
            Operation::TransitionEntry {
                entry_id,
                expected,
                change,
            } => {
                let entry = self.entries.get_mut(entry_id).ok_or(LedgerError::NotFound {
                    entity: EntityRef::Entry(*entry_id),
                })?;
                if !expected.contains(&entry.status) || !entry.status.can_transition_to(change.next)
                {
                    return Err(LedgerError::entry_transition(
                        *entry_id,
                        entry.status,
                        change.next,
                    ));
                }
                entry.apply(change);
            }
            Operation::GuardEntry {
                entry_id,
                expected,
                action,
            } => {
                let entry = self.entries.get(entry_id).ok_or(LedgerError::NotFound {
                    entity: EntityRef::Entry(*entry_id),
                })?;
                if !expected.contains(&entry.status) {
                    return Err(LedgerError::InvalidTransition {
                        entity: EntityRef::Entry(*entry_id),
                        from: entry.status.to_string(),
                        to: action.to_string(),
                    });
                }
            }
            Operation::InsertAdjustment { adjustment } => {
                self.adjustments.push(adjustment.clone());
            }
            Operation::HoldPending { store_id, delta } => {
                self.wallet_mut(store_id).hold_pending(*delta, Utc::now());
            }
            Operation::Credit {
                transaction,
                release_pending,
            } => {
                self.wallet_mut(&transaction.store_id).apply_credit(
                    transaction.amount,
                    *release_pending,
                    transaction.created_at,
                );
                self.wallet_transactions.push(transaction.clone());
            }
            Operation::Debit { transaction } => {
                self.wallet_mut(&transaction.store_id)
                    .apply_debit(transaction.amount, transaction.created_at)?;
                self.wallet_transactions.push(transaction.clone());
            }
            Operation::OverwriteBalance {
                store_id,
                expected_version,
                available,
                pending,
                transaction,
            } => {
                let wallet = self.wallet_mut(store_id);
                if wallet.version != *expected_version {
                    return Err(LedgerError::Conflict {
                        entity: EntityRef::Wallet(store_id.clone()),
                        detail: format!(
                            "expected version {}, found {}",
                            expected_version, wallet.version
                        ),
                    });
                }
                wallet.available = *available;
                wallet.pending = *pending;
                wallet.version += 1;
                wallet.last_updated = Utc::now();
                if let Some(transaction) = transaction {
                    self.wallet_transactions.push(transaction.clone());
                }
            }
            Operation::InsertPayout {
                payout,
                idempotency_key,
            } => {
                if let Some(key) = idempotency_key {
                    if let Some(existing) = self.idempotency_keys.get(key) {
                        return Err(LedgerError::Conflict {
                            entity: EntityRef::Payout(*existing),
                            detail: "duplicate idempotency key".to_string(),
                        });
                    }
                    self.idempotency_keys.insert(key.clone(), payout.id);
                }
                if self.payouts.contains_key(&payout.id) {
                    return Err(LedgerError::Conflict {
                        entity: EntityRef::Payout(payout.id),
                        detail: "payout already exists".to_string(),
                    });
                }
                self.payouts.insert(payout.id, payout.clone());
            }
            Operation::TransitionPayout {
                payout_id,
                expected,
                change,
            } => {
                let payout = self.payouts.get_mut(payout_id).ok_or(LedgerError::NotFound {
                    entity: EntityRef::Payout(*payout_id),
                })?;
                if payout.status != *expected || !payout.status.can_transition_to(change.status) {
                    return Err(PayoutStatus::guard_error(
                        *payout_id,
                        *expected,
                        payout.status,
                        change.status,
                    ));
                }
                payout.apply(change);
            }
        }
        Ok(())
    }
}

/// In-process adapter. Plans are applied to a staged copy of the whole store
/// under one lock and swapped in only if every operation succeeds.
pub struct MemoryAdapter {
    store: Mutex<MemoryStore>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(MemoryStore::default()),
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerAdapter for MemoryAdapter {
    async fn execute_plan(&self, plan: &ExecutionPlan) -> Result<(), LedgerError> {
        let mut store = self.store.lock().await;
        // Staging copies the whole store, so each plan costs time linear in
        // stored history. Fine for tests and single-process use; durable
        // deployments go through the Postgres adapter.
        let mut staged = store.clone();

        for op in plan.operations() {
            staged.apply(op)?;
        }

        *store = staged;
        Ok(())
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        let store = self.store.lock().await;
        store
            .entries
            .get(&entry_id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: EntityRef::Entry(entry_id),
            })
    }

    async fn get_entries_for_store(&self, store_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let store = self.store.lock().await;
        let mut entries: Vec<LedgerEntry> = store
            .entries
            .values()
            .filter(|e| e.store_id == store_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    async fn get_adjustments_for_store(
        &self,
        store_id: &str,
    ) -> Result<Vec<Adjustment>, LedgerError> {
        let store = self.store.lock().await;
        Ok(store
            .adjustments
            .iter()
            .filter(|a| a.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn get_wallet(&self, store_id: &str) -> Result<Option<WalletBalance>, LedgerError> {
        let store = self.store.lock().await;
        Ok(store.wallets.get(store_id).cloned())
    }

    async fn get_wallet_transactions(
        &self,
        store_id: &str,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let store = self.store.lock().await;
        Ok(store
            .wallet_transactions
            .iter()
            .filter(|t| t.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn get_payout(&self, payout_id: Uuid) -> Result<PayoutRequest, LedgerError> {
        let store = self.store.lock().await;
        store
            .payouts
            .get(&payout_id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: EntityRef::Payout(payout_id),
            })
    }

    async fn get_payouts_for_store(
        &self,
        store_id: &str,
    ) -> Result<Vec<PayoutRequest>, LedgerError> {
        let store = self.store.lock().await;
        let mut payouts: Vec<PayoutRequest> = store
            .payouts
            .values()
            .filter(|p| p.store_id == store_id)
            .cloned()
            .collect();
        payouts.sort_by_key(|p| (p.requested_at, p.id));
        Ok(payouts)
    }

    async fn get_payouts_by_status(
        &self,
        status: PayoutStatus,
    ) -> Result<Vec<PayoutRequest>, LedgerError> {
        let store = self.store.lock().await;
        let mut payouts: Vec<PayoutRequest> = store
            .payouts
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        payouts.sort_by_key(|p| (p.requested_at, p.id));
        Ok(payouts)
    }

    async fn get_payout_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PayoutRequest>, LedgerError> {
        let store = self.store.lock().await;
        Ok(store
            .idempotency_keys
            .get(key)
            .and_then(|id| store.payouts.get(id))
            .cloned())
    }

    async fn get_global_rate(&self) -> Result<Option<f64>, LedgerError> {
        Ok(self.store.lock().await.global_rate)
    }

    async fn set_global_rate(&self, rate: f64) -> Result<(), LedgerError> {
        self.store.lock().await.global_rate = Some(rate);
        Ok(())
    }

    async fn get_store_rate(&self, store_id: &str) -> Result<Option<f64>, LedgerError> {
        Ok(self.store.lock().await.store_rates.get(store_id).copied())
    }

    async fn set_store_rate(&self, store_id: &str, rate: Option<f64>) -> Result<(), LedgerError> {
        let mut store = self.store.lock().await;
        match rate {
            Some(rate) => store.store_rates.insert(store_id.to_string(), rate),
            None => store.store_rates.remove(store_id),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CommissionRate, EntryChange, EntryStatus, RateTarget, RelatedIds, WalletSource,
    };

    fn pending_entry(store_id: &str, amount: u64) -> LedgerEntry {
        let rate = CommissionRate::new(0.10, RateTarget::Global).unwrap();
        LedgerEntry::new_pending(store_id, amount, "gcash", rate.value(), rate.split(amount))
    }

    #[tokio::test]
    async fn test_failed_plan_leaves_store_untouched() {
        let adapter = MemoryAdapter::new();
        let entry = pending_entry("S1", 1_000);

        let mut plan = ExecutionPlan::new();
        plan.add(Operation::InsertEntry {
            entry: entry.clone(),
        })
        .add(Operation::Credit {
            transaction: WalletTransaction::credit(
                "S1",
                900,
                WalletSource::OrderPayment,
                RelatedIds::order(entry.id),
                "order",
            ),
            release_pending: 0,
        })
        .add(Operation::Debit {
            transaction: WalletTransaction::debit(
                "S1",
                5_000,
                WalletSource::Payout,
                RelatedIds::payout(Uuid::now_v7()),
                "too large",
            ),
        });

        let result = adapter.execute_plan(&plan).await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { available: 900, .. })));

        assert!(adapter.get_entry(entry.id).await.is_err());
        assert!(adapter.get_wallet("S1").await.unwrap().is_none());
        assert!(adapter.get_wallet_transactions("S1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_plan_keeps_committed_history() {
        let adapter = MemoryAdapter::new();
        for amount in [400, 600] {
            let entry = pending_entry("S1", amount);
            let mut plan = ExecutionPlan::new();
            plan.add(Operation::InsertEntry {
                entry: entry.clone(),
            })
            .add(Operation::Credit {
                transaction: WalletTransaction::credit(
                    "S1",
                    amount,
                    WalletSource::OrderPayment,
                    RelatedIds::order(entry.id),
                    "order",
                ),
                release_pending: 0,
            });
            adapter.execute_plan(&plan).await.unwrap();
        }

        let mut plan = ExecutionPlan::new();
        plan.add(Operation::Debit {
            transaction: WalletTransaction::debit(
                "S1",
                300,
                WalletSource::Payout,
                RelatedIds::payout(Uuid::now_v7()),
                "first",
            ),
        })
        .add(Operation::Debit {
            transaction: WalletTransaction::debit(
                "S1",
                800,
                WalletSource::Payout,
                RelatedIds::payout(Uuid::now_v7()),
                "second",
            ),
        });
        assert!(matches!(
            adapter.execute_plan(&plan).await,
            Err(LedgerError::InsufficientBalance { available: 700, .. })
        ));

        let wallet = adapter.get_wallet("S1").await.unwrap().unwrap();
        assert_eq!(wallet.available, 1_000);
        assert_eq!(wallet.version, 2);
        assert_eq!(adapter.get_entries_for_store("S1").await.unwrap().len(), 2);
        assert_eq!(adapter.get_wallet_transactions("S1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transition_guard_checked_inside_plan() {
        let adapter = MemoryAdapter::new();
        let entry = pending_entry("S1", 1_000);
        adapter
            .execute_plan(&ExecutionPlan::single(Operation::InsertEntry {
                entry: entry.clone(),
            }))
            .await
            .unwrap();

        let to_paid = ExecutionPlan::single(Operation::TransitionEntry {
            entry_id: entry.id,
            expected: vec![EntryStatus::Pending],
            change: EntryChange::to(EntryStatus::Paid, Utc::now()),
        });
        adapter.execute_plan(&to_paid).await.unwrap();

        assert!(matches!(
            adapter.execute_plan(&to_paid).await,
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_overwrite_requires_matching_version() {
        let adapter = MemoryAdapter::new();
        adapter
            .execute_plan(&ExecutionPlan::single(Operation::HoldPending {
                store_id: "S1".into(),
                delta: 500,
            }))
            .await
            .unwrap();

        let stale = ExecutionPlan::single(Operation::OverwriteBalance {
            store_id: "S1".into(),
            expected_version: 0,
            available: 10,
            pending: 0,
            transaction: None,
        });
        assert!(matches!(
            adapter.execute_plan(&stale).await,
            Err(LedgerError::Conflict { .. })
        ));

        let fresh = ExecutionPlan::single(Operation::OverwriteBalance {
            store_id: "S1".into(),
            expected_version: 1,
            available: 10,
            pending: 0,
            transaction: None,
        });
        adapter.execute_plan(&fresh).await.unwrap();
        let wallet = adapter.get_wallet("S1").await.unwrap().unwrap();
        assert_eq!((wallet.available, wallet.pending, wallet.version), (10, 0, 2));
    }
}

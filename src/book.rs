use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use uuid::Uuid;

use crate::commission::{CommissionRate, CommissionResolver, CommissionSplit};
use crate::context::LedgerContext;
use crate::entry::{
    Adjustment, EarningsSummary, EntryChange, EntryStatus, LedgerEntry, PaymentConfirmation,
};
use crate::error::{EntityRef, LedgerError, RateTarget};
use crate::plan::{ExecutionPlan, Operation};
use crate::wallet::{RelatedIds, WalletSource, WalletTransaction};

/// The ledger store: order payments per store and their lifecycle.
///
/// Every status change that moves money is written in the same plan as the
/// wallet movement it causes.
#[derive(Clone)]
pub struct LedgerBook {
    ctx: LedgerContext,
    commission: Arc<CommissionResolver>,
}

impl LedgerBook {
    pub fn new(ctx: LedgerContext, commission: Arc<CommissionResolver>) -> Self {
        Self { ctx, commission }
    }

    /// Record a new `PENDING` entry. Its store amount is held as the store's
    /// pending balance until payment is confirmed.
    pub async fn record_transaction(
        &self,
        store_id: &str,
        amount: u64,
        payment_method: &str,
        rate: f64,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount {
                entity: EntityRef::Transaction(store_id.to_string()),
                amount: 0,
            });
        }
        let rate = CommissionRate::new(rate, RateTarget::Transaction(store_id.to_string()))?;
        let entry = LedgerEntry::new_pending(
            store_id,
            amount,
            payment_method,
            rate.value(),
            rate.split(amount),
        );

        let mut plan = ExecutionPlan::new();
        plan.add(Operation::InsertEntry {
            entry: entry.clone(),
        });
        if entry.store_amount > 0 {
            plan.add(Operation::HoldPending {
                store_id: store_id.to_string(),
                delta: entry.store_amount as i64,
            });
        }
        self.ctx.execute(&plan).await?;

        counter!("ledger.entries.recorded").increment(1);
        histogram!("ledger.entry.amount").record(amount as f64);
        tracing::info!(
            entry_id = %entry.id,
            store_id,
            amount,
            commission = entry.commission,
            store_amount = entry.store_amount,
            payment_method,
            "ledger entry recorded"
        );
        Ok(entry)
    }

    /// Record with the rate the commission resolver picks for the store.
    pub async fn record_transaction_with_resolved_rate(
        &self,
        store_id: &str,
        amount: u64,
        payment_method: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let rate = self.commission.resolve_rate(Some(store_id)).await?;
        self.record_transaction(store_id, amount, payment_method, rate.value())
            .await
    }

    /// `PENDING → PAID`, crediting the store amount to the wallet.
    pub async fn mark_paid(
        &self,
        entry_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut entry = self.ctx.get_entry(entry_id).await?;
        if entry.status != EntryStatus::Pending {
            return Err(LedgerError::entry_transition(
                entry_id,
                entry.status,
                EntryStatus::Paid,
            ));
        }

        let change = EntryChange::to(EntryStatus::Paid, paid_at);
        let mut plan = ExecutionPlan::new();
        plan.add(Operation::TransitionEntry {
            entry_id,
            expected: vec![EntryStatus::Pending],
            change: change.clone(),
        });
        if entry.store_amount > 0 {
            plan.add(Operation::Credit {
                transaction: WalletTransaction::credit(
                    &entry.store_id,
                    entry.store_amount,
                    WalletSource::OrderPayment,
                    RelatedIds::order(entry_id),
                    &format!("order payment {} ({})", entry_id, entry.payment_method),
                ),
                release_pending: entry.store_amount,
            });
        }
        self.ctx.execute(&plan).await?;

        entry.apply(&change);
        counter!("ledger.wallet.credits").increment(1);
        tracing::info!(
            %entry_id,
            store_id = %entry.store_id,
            store_amount = entry.store_amount,
            "entry paid, wallet credited"
        );
        Ok(entry)
    }

    /// Webhook entry point. A redelivered confirmation for an entry that is
    /// already paid is acknowledged without crediting again.
    pub async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = self.ctx.get_entry(confirmation.entry_id).await?;
        if entry.status.is_earned() {
            tracing::info!(
                entry_id = %entry.id,
                provider_reference = ?confirmation.provider_reference,
                "duplicate payment confirmation ignored"
            );
            return Ok(entry);
        }

        match self.mark_paid(confirmation.entry_id, confirmation.paid_at).await {
            Err(LedgerError::InvalidTransition { .. }) => {
                // Lost a race against a concurrent delivery of the same event
                let entry = self.ctx.get_entry(confirmation.entry_id).await?;
                if entry.status.is_earned() {
                    return Ok(entry);
                }
                Err(LedgerError::entry_transition(
                    entry.id,
                    entry.status,
                    EntryStatus::Paid,
                ))
            }
            other => other,
        }
    }

    /// `PAID → SETTLED`. No wallet effect.
    pub async fn mark_settled(&self, entry_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        self.transition(
            entry_id,
            &[EntryStatus::Paid],
            EntryChange::to(EntryStatus::Settled, Utc::now()),
        )
        .await
    }

    /// `PAID | SETTLED → REFUNDED`. The wallet credit is deliberately left in
    /// place; reversing it is a separate admin decision.
    pub async fn mark_refunded(
        &self,
        entry_id: Uuid,
        reason: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.transition(
            entry_id,
            &[EntryStatus::Paid, EntryStatus::Settled],
            EntryChange::to(EntryStatus::Refunded, Utc::now()).with_note(reason),
        )
        .await
    }

    async fn transition(
        &self,
        entry_id: Uuid,
        expected: &[EntryStatus],
        change: EntryChange,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut entry = self.ctx.get_entry(entry_id).await?;
        if !expected.contains(&entry.status) {
            return Err(LedgerError::entry_transition(entry_id, entry.status, change.next));
        }

        self.ctx
            .execute(&ExecutionPlan::single(Operation::TransitionEntry {
                entry_id,
                expected: expected.to_vec(),
                change: change.clone(),
            }))
            .await?;

        let from = entry.status;
        entry.apply(&change);
        tracing::info!(%entry_id, %from, to = %entry.status, "entry status changed");
        Ok(entry)
    }

    /// Void a pending invoice and issue a replacement with a different fee.
    /// Exactly one of `new_rate` and `new_fee_amount` must be given.
    pub async fn replace_invoice(
        &self,
        entry_id: Uuid,
        new_rate: Option<f64>,
        new_fee_amount: Option<u64>,
    ) -> Result<LedgerEntry, LedgerError> {
        let old = self.ctx.get_entry(entry_id).await?;
        if old.status != EntryStatus::Pending {
            return Err(LedgerError::entry_transition(
                entry_id,
                old.status,
                EntryStatus::Voided,
            ));
        }

        let (rate, split) = match (new_rate, new_fee_amount) {
            (Some(rate), None) => {
                let rate = CommissionRate::new(rate, RateTarget::Entry(entry_id))?;
                (rate.value(), rate.split(old.amount))
            }
            (None, Some(fee)) => {
                if fee > old.amount {
                    return Err(LedgerError::InvalidAmount {
                        entity: EntityRef::Entry(entry_id),
                        amount: fee as i64,
                    });
                }
                (
                    fee as f64 / old.amount as f64,
                    CommissionSplit::from_commission(old.amount, fee),
                )
            }
            _ => return Err(LedgerError::AmbiguousReplacement { entry_id }),
        };

        let mut replacement =
            LedgerEntry::new_pending(&old.store_id, old.amount, &old.payment_method, rate, split);
        replacement.replaces = Some(entry_id);

        let mut plan = ExecutionPlan::new();
        plan.add(Operation::TransitionEntry {
            entry_id,
            expected: vec![EntryStatus::Pending],
            change: EntryChange::to(EntryStatus::Voided, Utc::now())
                .with_note("invoice replaced")
                .replaced_by(replacement.id),
        })
        .add(Operation::InsertEntry {
            entry: replacement.clone(),
        });
        let delta = replacement.store_amount as i64 - old.store_amount as i64;
        if delta != 0 {
            plan.add(Operation::HoldPending {
                store_id: old.store_id.clone(),
                delta,
            });
        }
        self.ctx.execute(&plan).await?;

        tracing::info!(
            voided = %entry_id,
            replacement = %replacement.id,
            commission = replacement.commission,
            store_amount = replacement.store_amount,
            "invoice replaced"
        );
        Ok(replacement)
    }

    /// Correct a store's earnings on a paid entry with a signed delta. The
    /// entry itself is untouched; the wallet moves by the delta.
    pub async fn record_adjustment(
        &self,
        entry_id: Uuid,
        delta_store_amount: i64,
        reason: &str,
    ) -> Result<Adjustment, LedgerError> {
        if delta_store_amount == 0 {
            return Err(LedgerError::InvalidAmount {
                entity: EntityRef::Entry(entry_id),
                amount: 0,
            });
        }

        let entry = self.ctx.get_entry(entry_id).await?;
        if !entry.status.is_earned() {
            return Err(LedgerError::InvalidTransition {
                entity: EntityRef::Entry(entry_id),
                from: entry.status.to_string(),
                to: "ADJUSTED".to_string(),
            });
        }

        let adjustment = Adjustment::new(&entry, delta_store_amount, reason);
        let description = format!("adjustment on {}: {}", entry_id, reason);
        let related = RelatedIds::order(entry_id);
        let amount = delta_store_amount.unsigned_abs();
        let wallet_op = if delta_store_amount > 0 {
            Operation::Credit {
                transaction: WalletTransaction::credit(
                    &entry.store_id,
                    amount,
                    WalletSource::Adjustment,
                    related,
                    &description,
                ),
                release_pending: 0,
            }
        } else {
            Operation::Debit {
                transaction: WalletTransaction::debit(
                    &entry.store_id,
                    amount,
                    WalletSource::Adjustment,
                    related,
                    &description,
                ),
            }
        };

        let mut plan = ExecutionPlan::new();
        plan.add(Operation::GuardEntry {
            entry_id,
            expected: vec![EntryStatus::Paid, EntryStatus::Settled],
            action: "ADJUSTED",
        })
        .add(Operation::InsertAdjustment {
            adjustment: adjustment.clone(),
        })
        .add(wallet_op);
        self.ctx.execute(&plan).await?;

        tracing::info!(
            %entry_id,
            store_id = %entry.store_id,
            delta = delta_store_amount,
            reason,
            "adjustment recorded"
        );
        Ok(adjustment)
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        self.ctx.get_entry(entry_id).await
    }

    pub async fn entries_for_store(&self, store_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.ctx.get_entries_for_store(store_id).await
    }

    pub async fn adjustments_for_store(
        &self,
        store_id: &str,
    ) -> Result<Vec<Adjustment>, LedgerError> {
        self.ctx.get_adjustments_for_store(store_id).await
    }

    /// Totals over paid and settled entries. Voided entries never count.
    pub async fn summary(&self, store_id: &str) -> Result<EarningsSummary, LedgerError> {
        let entries = self.ctx.get_entries_for_store(store_id).await?;
        let adjustments = self.ctx.get_adjustments_for_store(store_id).await?;

        let mut summary = EarningsSummary::default();
        let mut earned: HashMap<Uuid, bool> = HashMap::new();
        for entry in &entries {
            earned.insert(entry.id, entry.status.is_earned());
            match entry.status {
                EntryStatus::Paid | EntryStatus::Settled => {
                    summary.gross += entry.amount;
                    summary.commission += entry.commission;
                    summary.store_amount += entry.store_amount;
                    summary.entry_count += 1;
                }
                EntryStatus::Pending => summary.pending_store_amount += entry.store_amount,
                EntryStatus::Refunded | EntryStatus::Voided => {}
            }
        }
        summary.adjustments = adjustments
            .iter()
            .filter(|a| earned.get(&a.entry_id).copied().unwrap_or(false))
            .map(|a| a.delta_store_amount)
            .sum();

        Ok(summary)
    }
}

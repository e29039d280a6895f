use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use uuid::Uuid;

use crate::entry::{Adjustment, LedgerEntry};
use crate::error::LedgerError;
use crate::payout::{PayoutRequest, PayoutStatus};
use crate::plan::ExecutionPlan;
use crate::wallet::{WalletBalance, WalletTransaction};
use crate::LedgerAdapter;

/// Shared handle on the adapter. Every storage call is bounded by `timeout`;
/// an expired call surfaces as [`LedgerError::Timeout`] and is not retried.
#[derive(Clone)]
pub struct LedgerContext {
    adapter: Arc<dyn LedgerAdapter>,
    timeout: Duration,
}

impl LedgerContext {
    pub fn new(adapter: Arc<dyn LedgerAdapter>, timeout: Duration) -> Self {
        Self { adapter, timeout }
    }

    pub fn adapter(&self) -> &dyn LedgerAdapter {
        self.adapter.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.timeout)),
        }
    }

    /// Apply a plan atomically.
    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<(), LedgerError> {
        histogram!("ledger.plan.operations").record(plan.len() as f64);

        let result = self.bounded(self.adapter.execute_plan(plan)).await;

        counter!("ledger.plans.total",
            "status" => match &result {
                Ok(()) => "success",
                Err(e) if e.is_transient() => "error",
                Err(_) => "rejected",
            }
        )
        .increment(1);

        if let Err(err) = &result {
            if err.is_transient() {
                let ops: Vec<&str> = plan.operations().iter().map(|op| op.name()).collect();
                tracing::error!(error = %err, operations = ?ops, "plan outcome unknown");
            }
        }
        result
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        self.bounded(self.adapter.get_entry(entry_id)).await
    }

    pub async fn get_entries_for_store(&self, store_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.bounded(self.adapter.get_entries_for_store(store_id)).await
    }

    pub async fn get_adjustments_for_store(
        &self,
        store_id: &str,
    ) -> Result<Vec<Adjustment>, LedgerError> {
        self.bounded(self.adapter.get_adjustments_for_store(store_id))
            .await
    }

    pub async fn get_wallet(&self, store_id: &str) -> Result<Option<WalletBalance>, LedgerError> {
        self.bounded(self.adapter.get_wallet(store_id)).await
    }

    pub async fn get_wallet_transactions(
        &self,
        store_id: &str,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        self.bounded(self.adapter.get_wallet_transactions(store_id))
            .await
    }

    pub async fn get_payout(&self, payout_id: Uuid) -> Result<PayoutRequest, LedgerError> {
        self.bounded(self.adapter.get_payout(payout_id)).await
    }

    pub async fn get_payouts_for_store(
        &self,
        store_id: &str,
    ) -> Result<Vec<PayoutRequest>, LedgerError> {
        self.bounded(self.adapter.get_payouts_for_store(store_id))
            .await
    }

    pub async fn get_payouts_by_status(
        &self,
        status: PayoutStatus,
    ) -> Result<Vec<PayoutRequest>, LedgerError> {
        self.bounded(self.adapter.get_payouts_by_status(status)).await
    }

    pub async fn get_payout_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PayoutRequest>, LedgerError> {
        self.bounded(self.adapter.get_payout_by_idempotency_key(key))
            .await
    }

    pub async fn get_global_rate(&self) -> Result<Option<f64>, LedgerError> {
        self.bounded(self.adapter.get_global_rate()).await
    }

    pub async fn set_global_rate(&self, rate: f64) -> Result<(), LedgerError> {
        self.bounded(self.adapter.set_global_rate(rate)).await
    }

    pub async fn get_store_rate(&self, store_id: &str) -> Result<Option<f64>, LedgerError> {
        self.bounded(self.adapter.get_store_rate(store_id)).await
    }

    pub async fn set_store_rate(&self, store_id: &str, rate: Option<f64>) -> Result<(), LedgerError> {
        self.bounded(self.adapter.set_store_rate(store_id, rate))
            .await
    }
}

//! # tinda-ledger
//!
//! The money-moving core of the TindaGo marketplace admin: commission
//! resolution, the per-store ledger of order payments, store wallets, and
//! the payout approval workflow.
//!
//! ```text
//! order payment ─► CommissionResolver ─► LedgerBook (PENDING, pending balance)
//!                                            │ payment confirmed
//!                                            ▼
//!                                 LedgerBook::mark_paid ─► Wallet credit
//!                                                             │
//! store payout request ─► PayoutWorkflow::approve ─► Wallet debit
//! ```
//!
//! Every write goes through [`LedgerAdapter::execute_plan`], which applies a
//! whole [`ExecutionPlan`] or nothing. Debits are checked against the wallet
//! inside that atomic section, so two approvals racing for the same balance
//! cannot both win.
//!
//! ```rust,ignore
//! use tinda_ledger::{LedgerSystem, LedgerConfig, adapters::MemoryAdapter};
//!
//! let system = LedgerSystem::new(Box::new(MemoryAdapter::new()), &LedgerConfig::default())?;
//! let entry = system.book().record_transaction("S1", 100_000, "gcash", 0.10).await?;
//! system.book().mark_paid(entry.id, chrono::Utc::now()).await?;
//! assert_eq!(system.wallet().get_balance("S1").await?.available, 90_000);
//! ```

pub mod adapters;
pub mod auth;
pub mod book;
pub mod commission;
pub mod config;
pub mod context;
pub mod currency;
pub mod entry;
pub mod error;
pub mod payout;
pub mod plan;
pub mod telemetry;
pub mod wallet;

pub use auth::{AdminAuthorizer, AllowAllAdmins, StaticAdmins};
pub use book::LedgerBook;
pub use commission::{CommissionRate, CommissionResolver, CommissionSplit};
pub use config::LedgerConfig;
pub use context::LedgerContext;
pub use currency::Currency;
pub use entry::{
    Adjustment, EarningsSummary, EntryChange, EntryStatus, LedgerEntry, PaymentConfirmation,
};
pub use error::{EntityRef, LedgerError, RateTarget};
pub use payout::{
    AccountDetails, BulkApproval, BulkFailure, PayoutDraft, PayoutMethod, PayoutRequest,
    PayoutStatus, PayoutWorkflow, StatusChange,
};
pub use plan::{ExecutionPlan, Operation};
pub use wallet::{
    Balance, Reconciliation, RelatedIds, TransactionType, Wallet, WalletBalance, WalletSource,
    WalletTransaction,
};

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) fn hash_idempotency_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// Persistence seam for the ledger.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Execute the complete plan atomically.
    /// Implementors MUST:
    /// 1. Begin a transaction (or take the store-wide lock)
    /// 2. Lock the wallets from `plan.wallet_locks()` in that order
    /// 3. Check every guard and every debit against current state, failing
    ///    with the matching business error
    /// 4. Apply all operations, bumping the version of each touched wallet
    /// 5. Commit on success, roll back on any error
    async fn execute_plan(&self, plan: &ExecutionPlan) -> Result<(), LedgerError>;

    // READ OPERATIONS
    async fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry, LedgerError>;
    async fn get_entries_for_store(&self, store_id: &str) -> Result<Vec<LedgerEntry>, LedgerError>;
    async fn get_adjustments_for_store(&self, store_id: &str)
    -> Result<Vec<Adjustment>, LedgerError>;
    async fn get_wallet(&self, store_id: &str) -> Result<Option<WalletBalance>, LedgerError>;
    async fn get_wallet_transactions(
        &self,
        store_id: &str,
    ) -> Result<Vec<WalletTransaction>, LedgerError>;
    async fn get_payout(&self, payout_id: Uuid) -> Result<PayoutRequest, LedgerError>;
    async fn get_payouts_for_store(&self, store_id: &str)
    -> Result<Vec<PayoutRequest>, LedgerError>;
    async fn get_payouts_by_status(
        &self,
        status: PayoutStatus,
    ) -> Result<Vec<PayoutRequest>, LedgerError>;
    /// `key` is already hashed.
    async fn get_payout_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PayoutRequest>, LedgerError>;

    // COMMISSION SETTINGS
    async fn get_global_rate(&self) -> Result<Option<f64>, LedgerError>;
    async fn set_global_rate(&self, rate: f64) -> Result<(), LedgerError>;
    async fn get_store_rate(&self, store_id: &str) -> Result<Option<f64>, LedgerError>;
    /// `None` removes the override.
    async fn set_store_rate(&self, store_id: &str, rate: Option<f64>) -> Result<(), LedgerError>;
}

/// The assembled ledger: one adapter shared by every service.
pub struct LedgerSystem {
    ctx: LedgerContext,
    commission: Arc<CommissionResolver>,
    book: LedgerBook,
    wallet: Wallet,
    payouts: PayoutWorkflow,
    currency: Currency,
}

impl LedgerSystem {
    /// Assemble with every admin authorized; see [`LedgerSystem::with_authorizer`].
    pub fn new(adapter: Box<dyn LedgerAdapter>, config: &LedgerConfig) -> Result<Self, LedgerError> {
        Self::with_authorizer(adapter, config, Arc::new(AllowAllAdmins))
    }

    pub fn with_authorizer(
        adapter: Box<dyn LedgerAdapter>,
        config: &LedgerConfig,
        authorizer: Arc<dyn AdminAuthorizer>,
    ) -> Result<Self, LedgerError> {
        let ctx = LedgerContext::new(adapter.into(), config.storage_timeout());
        let commission = Arc::new(CommissionResolver::new(
            ctx.clone(),
            config.default_commission_rate()?,
            config.commission_cache_ttl(),
        ));

        Ok(Self {
            book: LedgerBook::new(ctx.clone(), Arc::clone(&commission)),
            wallet: Wallet::new(ctx.clone()),
            payouts: PayoutWorkflow::new(ctx.clone(), authorizer)
                .with_balance_check_on_create(config.check_balance_on_payout_create),
            currency: config.currency(),
            commission,
            ctx,
        })
    }

    pub fn context(&self) -> &LedgerContext {
        &self.ctx
    }

    pub fn adapter(&self) -> &dyn LedgerAdapter {
        self.ctx.adapter()
    }

    pub fn commission(&self) -> &CommissionResolver {
        &self.commission
    }

    pub fn book(&self) -> &LedgerBook {
        &self.book
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn payouts(&self) -> &PayoutWorkflow {
        &self.payouts
    }

    /// Display currency of legacy amounts.
    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Store legacy payout documents as one plan, amounts read in
    /// [`LedgerSystem::currency`]. A document imported before fails the whole
    /// batch with [`LedgerError::Conflict`].
    pub async fn import_legacy_payouts(
        &self,
        records: &[adapters::legacy::LegacyPayoutRecord],
    ) -> Result<usize, LedgerError> {
        let plan = adapters::legacy::import_plan(records, &self.currency)?;
        if plan.is_empty() {
            return Ok(0);
        }
        self.ctx.execute(&plan).await?;
        tracing::info!(count = plan.len(), currency = %self.currency.code, "legacy payouts imported");
        Ok(plan.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_hash_is_stable() {
        let a = hash_idempotency_key("payout-S1-2026-10-19");
        let b = hash_idempotency_key("payout-S1-2026-10-19");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_idempotency_key("payout-S1-2026-10-20"));
    }

    #[test]
    fn test_invalid_default_rate_fails_assembly() {
        let config = LedgerConfig {
            default_commission_rate: -1.0,
            ..LedgerConfig::default()
        };
        let result = LedgerSystem::new(Box::new(adapters::MemoryAdapter::new()), &config);
        assert!(matches!(result, Err(LedgerError::InvalidRate { .. })));
    }

    #[tokio::test]
    async fn test_legacy_import_uses_configured_currency() {
        let config = LedgerConfig {
            currency: "JPY".to_string(),
            currency_decimals: 0,
            ..LedgerConfig::default()
        };
        let system = LedgerSystem::new(Box::new(adapters::MemoryAdapter::new()), &config).unwrap();
        assert_eq!(system.currency(), &Currency::new("JPY", 0));

        let doc = r#"{
            "id": "-Nx-yen-1",
            "storeId": "S9",
            "amount": 1500,
            "payoutMethod": "bank_transfer",
            "accountDetails": { "accountName": "Taro", "accountNumber": "0012", "bankName": "MUFG" },
            "status": "pending",
            "requestedAt": 1760000000000
        }"#;
        let record = adapters::legacy::LegacyPayoutRecord::try_from(doc.as_bytes()).unwrap();
        let records = std::slice::from_ref(&record);

        assert_eq!(system.import_legacy_payouts(records).await.unwrap(), 1);
        let imported = system.payouts().for_store("S9").await.unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].amount, 1_500);
        assert_eq!(imported[0].status, PayoutStatus::Pending);

        assert!(matches!(
            system.import_legacy_payouts(records).await,
            Err(LedgerError::Conflict { .. })
        ));
        assert_eq!(system.import_legacy_payouts(&[]).await.unwrap(), 0);
    }
}

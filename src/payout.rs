use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AdminAuthorizer, require_admin};
use crate::context::LedgerContext;
use crate::error::{EntityRef, LedgerError};
use crate::hash_idempotency_key;
use crate::plan::{ExecutionPlan, Operation};
use crate::wallet::{RelatedIds, WalletSource, WalletTransaction};

/// Payout state machine:
/// `pending → approved → completed`, or `pending → rejected`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl PayoutStatus {
    pub fn can_transition_to(&self, target: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, target),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Rejected | PayoutStatus::Completed)
    }

    /// Error for a payout found in `actual` when `expected` was required.
    /// Approve and reject both expect `pending`; losing that race means
    /// someone else already processed the payout.
    pub fn guard_error(
        payout_id: Uuid,
        expected: PayoutStatus,
        actual: PayoutStatus,
        next: PayoutStatus,
    ) -> LedgerError {
        if expected == PayoutStatus::Pending {
            LedgerError::AlreadyProcessed {
                payout_id,
                status: actual,
            }
        } else {
            LedgerError::payout_transition(payout_id, actual, next)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Approved => "approved",
            PayoutStatus::Rejected => "rejected",
            PayoutStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PayoutStatus::Pending),
            "approved" => Some(PayoutStatus::Approved),
            "rejected" => Some(PayoutStatus::Rejected),
            "completed" => Some(PayoutStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External payout rail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutMethod {
    Bank,
    Gcash,
    Paymaya,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::Bank => "bank",
            PayoutMethod::Gcash => "gcash",
            PayoutMethod::Paymaya => "paymaya",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace(['_', ' ', '-'], "").as_str() {
            "bank" | "banktransfer" => Some(PayoutMethod::Bank),
            "gcash" => Some(PayoutMethod::Gcash),
            "paymaya" | "maya" => Some(PayoutMethod::Paymaya),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub account_name: String,
    pub account_number: String,
    /// Only meaningful for bank payouts
    #[serde(default)]
    pub bank_name: Option<String>,
}

/// One entry of a payout's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: PayoutStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
    pub actor: String,
}

impl StatusChange {
    pub fn new(status: PayoutStatus, actor: &str, note: Option<&str>) -> Self {
        Self {
            status,
            at: Utc::now(),
            note: note.map(str::to_string),
            actor: actor.to_string(),
        }
    }
}

/// A store's request to withdraw from its wallet.
///
/// `amount` is fixed at creation. `history` is append-only and holds one
/// entry for creation plus one per transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: Uuid,
    pub store_id: String,
    pub amount: u64,
    pub method: PayoutMethod,
    pub account: AccountDetails,
    pub notes: Option<String>,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,

    pub status: PayoutStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_note: Option<String>,

    pub history: Vec<StatusChange>,
}

impl PayoutRequest {
    fn from_draft(draft: PayoutDraft) -> Self {
        let requested_by = draft.requested_by.unwrap_or_else(|| draft.store_id.clone());
        let created = StatusChange::new(PayoutStatus::Pending, &requested_by, draft.notes.as_deref());
        Self {
            id: Uuid::now_v7(),
            store_id: draft.store_id,
            amount: draft.amount,
            method: draft.method,
            account: draft.account,
            notes: draft.notes,
            requested_by,
            requested_at: created.at,
            status: PayoutStatus::Pending,
            processed_at: None,
            processed_by: None,
            admin_notes: None,
            rejection_reason: None,
            completed_at: None,
            completion_note: None,
            history: vec![created],
        }
    }

    /// Apply an already-validated transition and append it to the history.
    pub(crate) fn apply(&mut self, change: &StatusChange) {
        self.status = change.status;
        match change.status {
            PayoutStatus::Approved => {
                self.processed_at = Some(change.at);
                self.processed_by = Some(change.actor.clone());
                self.admin_notes = change.note.clone();
            }
            PayoutStatus::Rejected => {
                self.processed_at = Some(change.at);
                self.processed_by = Some(change.actor.clone());
                self.rejection_reason = change.note.clone();
            }
            PayoutStatus::Completed => {
                self.completed_at = Some(change.at);
                self.completion_note = change.note.clone();
            }
            PayoutStatus::Pending => {}
        }
        self.history.push(change.clone());
    }
}

/// Input for creating a payout.
#[derive(Debug, Clone)]
pub struct PayoutDraft {
    pub store_id: String,
    pub amount: u64,
    pub method: PayoutMethod,
    pub account: AccountDetails,
    pub notes: Option<String>,
    /// Defaults to the store itself
    pub requested_by: Option<String>,
}

impl PayoutDraft {
    pub fn new(store_id: &str, amount: u64, method: PayoutMethod, account: AccountDetails) -> Self {
        Self {
            store_id: store_id.to_string(),
            amount,
            method,
            account,
            notes: None,
            requested_by: None,
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// An admin creating the request on the store's behalf.
    pub fn requested_by(mut self, actor: impl Into<String>) -> Self {
        self.requested_by = Some(actor.into());
        self
    }
}

#[derive(Debug)]
pub struct BulkFailure {
    pub payout_id: Uuid,
    pub error: LedgerError,
}

/// Per-id outcome of a bulk approval.
#[derive(Debug, Default)]
pub struct BulkApproval {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

impl BulkApproval {
    pub fn failed_ids(&self) -> Vec<Uuid> {
        self.failed.iter().map(|f| f.payout_id).collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives payout requests through their state machine.
#[derive(Clone)]
pub struct PayoutWorkflow {
    ctx: LedgerContext,
    authorizer: Arc<dyn AdminAuthorizer>,
    check_balance_on_create: bool,
}

impl PayoutWorkflow {
    pub fn new(ctx: LedgerContext, authorizer: Arc<dyn AdminAuthorizer>) -> Self {
        Self {
            ctx,
            authorizer,
            check_balance_on_create: false,
        }
    }

    /// Reject creation up front when the wallet cannot cover the amount.
    /// Advisory only: approval re-checks against the balance at that time.
    pub fn with_balance_check_on_create(mut self, enabled: bool) -> Self {
        self.check_balance_on_create = enabled;
        self
    }

    pub async fn create(&self, draft: PayoutDraft) -> Result<PayoutRequest, LedgerError> {
        self.insert(draft, None).await
    }

    /// Create, or return the payout an earlier call with the same key created.
    pub async fn create_idempotent(
        &self,
        draft: PayoutDraft,
        idempotency_key: &str,
    ) -> Result<PayoutRequest, LedgerError> {
        let key = hash_idempotency_key(idempotency_key);
        if let Some(existing) = self.ctx.get_payout_by_idempotency_key(&key).await? {
            return same_request(existing, &draft);
        }

        match self.insert(draft.clone(), Some(key.clone())).await {
            Err(LedgerError::Conflict { .. }) => {
                let existing = self
                    .ctx
                    .get_payout_by_idempotency_key(&key)
                    .await?
                    .ok_or_else(|| LedgerError::Storage("idempotency key vanished".to_string()))?;
                same_request(existing, &draft)
            }
            other => other,
        }
    }

    async fn insert(
        &self,
        draft: PayoutDraft,
        idempotency_key: Option<String>,
    ) -> Result<PayoutRequest, LedgerError> {
        if draft.amount == 0 {
            return Err(LedgerError::InvalidAmount {
                entity: EntityRef::Wallet(draft.store_id.clone()),
                amount: 0,
            });
        }

        if self.check_balance_on_create {
            let available = self
                .ctx
                .get_wallet(&draft.store_id)
                .await?
                .map(|w| w.available)
                .unwrap_or(0);
            if available < draft.amount {
                return Err(LedgerError::InsufficientBalance {
                    store_id: draft.store_id.clone(),
                    requested: draft.amount,
                    available,
                });
            }
        }

        let payout = PayoutRequest::from_draft(draft);
        self.ctx
            .execute(&ExecutionPlan::single(Operation::InsertPayout {
                payout: payout.clone(),
                idempotency_key,
            }))
            .await?;

        counter!("ledger.payouts.transitions", "status" => "pending").increment(1);
        histogram!("ledger.payout.amount").record(payout.amount as f64);
        tracing::info!(
            payout_id = %payout.id,
            store_id = %payout.store_id,
            amount = payout.amount,
            method = payout.method.as_str(),
            "payout requested"
        );
        Ok(payout)
    }

    /// Approve a pending payout and debit the store's wallet in the same
    /// atomic write. If the wallet cannot cover the amount nothing changes.
    pub async fn approve(
        &self,
        payout_id: Uuid,
        admin_id: &str,
        notes: Option<&str>,
    ) -> Result<PayoutRequest, LedgerError> {
        require_admin(self.authorizer.as_ref(), admin_id).await?;
        self.approve_authorized(payout_id, admin_id, notes).await
    }

    async fn approve_authorized(
        &self,
        payout_id: Uuid,
        admin_id: &str,
        notes: Option<&str>,
    ) -> Result<PayoutRequest, LedgerError> {
        let mut payout = self.ctx.get_payout(payout_id).await?;
        if payout.status != PayoutStatus::Pending {
            return Err(LedgerError::AlreadyProcessed {
                payout_id,
                status: payout.status,
            });
        }

        let change = StatusChange::new(PayoutStatus::Approved, admin_id, notes);
        let debit = WalletTransaction::debit(
            &payout.store_id,
            payout.amount,
            WalletSource::Payout,
            RelatedIds::payout(payout_id),
            &format!("payout {} via {}", payout_id, payout.method.as_str()),
        );

        let mut plan = ExecutionPlan::new();
        plan.add(Operation::TransitionPayout {
            payout_id,
            expected: PayoutStatus::Pending,
            change: change.clone(),
        })
        .add(Operation::Debit { transaction: debit });

        if let Err(err) = self.ctx.execute(&plan).await {
            tracing::warn!(%payout_id, admin_id, error = %err, "payout approval failed");
            return Err(err);
        }

        payout.apply(&change);
        counter!("ledger.payouts.transitions", "status" => "approved").increment(1);
        counter!("ledger.wallet.debits").increment(1);
        tracing::info!(
            %payout_id,
            store_id = %payout.store_id,
            amount = payout.amount,
            admin_id,
            "payout approved, wallet debited"
        );
        Ok(payout)
    }

    pub async fn reject(
        &self,
        payout_id: Uuid,
        admin_id: &str,
        reason: &str,
    ) -> Result<PayoutRequest, LedgerError> {
        require_admin(self.authorizer.as_ref(), admin_id).await?;
        if reason.trim().is_empty() {
            return Err(LedgerError::MissingReason { payout_id });
        }

        let mut payout = self.ctx.get_payout(payout_id).await?;
        if payout.status != PayoutStatus::Pending {
            return Err(LedgerError::AlreadyProcessed {
                payout_id,
                status: payout.status,
            });
        }

        let change = StatusChange::new(PayoutStatus::Rejected, admin_id, Some(reason.trim()));
        self.ctx
            .execute(&ExecutionPlan::single(Operation::TransitionPayout {
                payout_id,
                expected: PayoutStatus::Pending,
                change: change.clone(),
            }))
            .await?;

        payout.apply(&change);
        counter!("ledger.payouts.transitions", "status" => "rejected").increment(1);
        tracing::info!(%payout_id, admin_id, reason = reason.trim(), "payout rejected");
        Ok(payout)
    }

    /// Confirm that an approved payout was transferred out-of-band.
    /// Bookkeeping only: no wallet or ledger amounts move.
    pub async fn complete(
        &self,
        payout_id: Uuid,
        admin_id: &str,
        note: Option<&str>,
    ) -> Result<PayoutRequest, LedgerError> {
        require_admin(self.authorizer.as_ref(), admin_id).await?;

        let mut payout = self.ctx.get_payout(payout_id).await?;
        if payout.status != PayoutStatus::Approved {
            return Err(LedgerError::payout_transition(
                payout_id,
                payout.status,
                PayoutStatus::Completed,
            ));
        }

        let change = StatusChange::new(PayoutStatus::Completed, admin_id, note);
        self.ctx
            .execute(&ExecutionPlan::single(Operation::TransitionPayout {
                payout_id,
                expected: PayoutStatus::Approved,
                change: change.clone(),
            }))
            .await?;

        payout.apply(&change);
        counter!("ledger.payouts.transitions", "status" => "completed").increment(1);
        tracing::info!(%payout_id, admin_id, "payout completed");
        Ok(payout)
    }

    /// Approve each payout independently. One failure never stops the rest.
    /// Only an unauthorized admin fails the whole call.
    pub async fn bulk_approve(
        &self,
        payout_ids: &[Uuid],
        admin_id: &str,
    ) -> Result<BulkApproval, LedgerError> {
        require_admin(self.authorizer.as_ref(), admin_id).await?;

        let mut outcome = BulkApproval::default();
        for &payout_id in payout_ids {
            match self.approve_authorized(payout_id, admin_id, None).await {
                Ok(_) => outcome.succeeded.push(payout_id),
                Err(error) => outcome.failed.push(BulkFailure { payout_id, error }),
            }
        }

        tracing::info!(
            admin_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "bulk approval finished"
        );
        Ok(outcome)
    }

    pub async fn get(&self, payout_id: Uuid) -> Result<PayoutRequest, LedgerError> {
        self.ctx.get_payout(payout_id).await
    }

    pub async fn for_store(&self, store_id: &str) -> Result<Vec<PayoutRequest>, LedgerError> {
        self.ctx.get_payouts_for_store(store_id).await
    }

    pub async fn by_status(&self, status: PayoutStatus) -> Result<Vec<PayoutRequest>, LedgerError> {
        self.ctx.get_payouts_by_status(status).await
    }

    pub async fn pending(&self) -> Result<Vec<PayoutRequest>, LedgerError> {
        self.by_status(PayoutStatus::Pending).await
    }
}

fn same_request(existing: PayoutRequest, draft: &PayoutDraft) -> Result<PayoutRequest, LedgerError> {
    if existing.store_id != draft.store_id || existing.amount != draft.amount {
        return Err(LedgerError::Conflict {
            entity: EntityRef::Payout(existing.id),
            detail: "idempotency key reused for a different payout".to_string(),
        });
    }
    tracing::debug!(payout_id = %existing.id, "payout creation replayed");
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountDetails {
        AccountDetails {
            account_name: "Tindahan ni Aling Nena".to_string(),
            account_number: "09171234567".to_string(),
            bank_name: None,
        }
    }

    #[test]
    fn test_payout_transitions() {
        use PayoutStatus::*;

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Completed.can_transition_to(Pending));
        assert!(Rejected.is_terminal() && Completed.is_terminal());
    }

    #[test]
    fn test_guard_error_kinds() {
        let id = Uuid::now_v7();
        assert!(matches!(
            PayoutStatus::guard_error(id, PayoutStatus::Pending, PayoutStatus::Approved, PayoutStatus::Approved),
            LedgerError::AlreadyProcessed { status: PayoutStatus::Approved, .. }
        ));
        assert!(matches!(
            PayoutStatus::guard_error(id, PayoutStatus::Approved, PayoutStatus::Pending, PayoutStatus::Completed),
            LedgerError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(PayoutMethod::parse("GCash"), Some(PayoutMethod::Gcash));
        assert_eq!(PayoutMethod::parse("bank_transfer"), Some(PayoutMethod::Bank));
        assert_eq!(PayoutMethod::parse("PayMaya"), Some(PayoutMethod::Paymaya));
        assert_eq!(PayoutMethod::parse("cash"), None);
    }

    #[test]
    fn test_history_starts_with_creation() {
        let draft = PayoutDraft::new("S1", 90_000, PayoutMethod::Gcash, account()).notes("weekly");
        let mut payout = PayoutRequest::from_draft(draft);
        assert_eq!(payout.history.len(), 1);
        assert_eq!(payout.history[0].actor, "S1");
        assert_eq!(payout.history[0].status, PayoutStatus::Pending);

        payout.apply(&StatusChange::new(PayoutStatus::Approved, "admin-1", Some("ok")));
        assert_eq!(payout.status, PayoutStatus::Approved);
        assert_eq!(payout.processed_by.as_deref(), Some("admin-1"));
        assert_eq!(payout.history.len(), 2);
        assert_eq!(payout.amount, 90_000);
    }
}

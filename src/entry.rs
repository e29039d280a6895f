use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commission::CommissionSplit;

/// Lifecycle of a ledger entry.
/// `Refunded` and `Voided` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Invoice issued, payment not yet confirmed
    Pending,
    /// Payment confirmed by the provider; the store amount is in the wallet
    Paid,
    /// Paid and closed out with the provider
    Settled,
    Refunded,
    /// Replaced by another invoice; excluded from every financial total
    Voided,
}

impl EntryStatus {
    pub fn can_transition_to(&self, target: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, target),
            (Pending, Paid)
                | (Pending, Voided)
                | (Paid, Settled)
                | (Paid, Refunded)
                | (Settled, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Refunded | EntryStatus::Voided)
    }

    /// Entries whose store amount has been earned by the store.
    pub fn is_earned(&self) -> bool {
        matches!(self, EntryStatus::Paid | EntryStatus::Settled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Paid => "PAID",
            EntryStatus::Settled => "SETTLED",
            EntryStatus::Refunded => "REFUNDED",
            EntryStatus::Voided => "VOIDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(EntryStatus::Pending),
            "PAID" => Some(EntryStatus::Paid),
            "SETTLED" => Some(EntryStatus::Settled),
            "REFUNDED" => Some(EntryStatus::Refunded),
            "VOIDED" => Some(EntryStatus::Voided),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One order payment recorded against a store.
///
/// Invariants:
/// - `store_amount + commission == amount`
/// - `amount`, `commission` and `store_amount` never change after creation;
///   corrections are separate [`Adjustment`]s
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Invoice / transaction id
    pub id: Uuid,
    pub store_id: String,

    /// Gross amount in minor units
    pub amount: u64,
    pub commission_rate: f64,
    pub commission: u64,
    pub store_amount: u64,

    pub status: EntryStatus,
    /// Payment method tag as reported by checkout (e.g. "gcash")
    pub payment_method: String,

    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    /// Refund reason or other note attached by the last transition
    pub status_note: Option<String>,
    /// The voided invoice this entry replaced
    pub replaces: Option<Uuid>,
    /// The invoice that replaced this one, once voided
    pub replaced_by: Option<Uuid>,
}

impl LedgerEntry {
    pub fn new_pending(
        store_id: &str,
        amount: u64,
        payment_method: &str,
        rate: f64,
        split: CommissionSplit,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            store_id: store_id.to_string(),
            amount,
            commission_rate: rate,
            commission: split.commission,
            store_amount: split.store_amount,
            status: EntryStatus::Pending,
            payment_method: payment_method.to_string(),
            created_at: now,
            paid_at: None,
            updated_at: now,
            status_note: None,
            replaces: None,
            replaced_by: None,
        }
    }

    /// Apply an already-validated status change.
    pub(crate) fn apply(&mut self, change: &EntryChange) {
        self.status = change.next;
        self.updated_at = change.at;
        if change.next == EntryStatus::Paid {
            self.paid_at = Some(change.at);
        }
        if change.note.is_some() {
            self.status_note = change.note.clone();
        }
        if change.replaced_by.is_some() {
            self.replaced_by = change.replaced_by;
        }
    }
}

/// The fields a status transition writes onto an entry.
#[derive(Debug, Clone)]
pub struct EntryChange {
    pub next: EntryStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
    pub replaced_by: Option<Uuid>,
}

impl EntryChange {
    pub fn to(next: EntryStatus, at: DateTime<Utc>) -> Self {
        Self {
            next,
            at,
            note: None,
            replaced_by: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn replaced_by(mut self, id: Uuid) -> Self {
        self.replaced_by = Some(id);
        self
    }
}

/// A signed correction to a store's earnings on a paid entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub store_id: String,
    /// Positive credits the store, negative debits it
    pub delta_store_amount: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Adjustment {
    pub fn new(entry: &LedgerEntry, delta_store_amount: i64, reason: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            entry_id: entry.id,
            store_id: entry.store_id.clone(),
            delta_store_amount,
            reason: reason.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// "Payment confirmed" event delivered by the payment provider webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub entry_id: Uuid,
    pub paid_at: DateTime<Utc>,
    /// Provider-side reference, kept for the log line only
    #[serde(default)]
    pub provider_reference: Option<String>,
}

/// Earnings totals for one store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EarningsSummary {
    pub gross: u64,
    pub commission: u64,
    pub store_amount: u64,
    pub adjustments: i64,
    pub pending_store_amount: u64,
    pub entry_count: usize,
}

impl EarningsSummary {
    /// Store amount after adjustments.
    pub fn net_store_amount(&self) -> i64 {
        self.store_amount as i64 + self.adjustments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_transitions() {
        use EntryStatus::*;

        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Voided));
        assert!(Paid.can_transition_to(Settled));
        assert!(Paid.can_transition_to(Refunded));
        assert!(Settled.can_transition_to(Refunded));

        assert!(!Pending.can_transition_to(Refunded));
        assert!(!Paid.can_transition_to(Voided));
        assert!(!Paid.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Voided.can_transition_to(Pending));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            EntryStatus::Pending,
            EntryStatus::Paid,
            EntryStatus::Settled,
            EntryStatus::Refunded,
            EntryStatus::Voided,
        ] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::parse("paid"), None);
    }

    #[test]
    fn test_apply_paid_sets_paid_at() {
        let split = CommissionSplit {
            commission: 10_000,
            store_amount: 90_000,
        };
        let mut entry = LedgerEntry::new_pending("S1", 100_000, "gcash", 0.10, split);
        let at = Utc::now();
        entry.apply(&EntryChange::to(EntryStatus::Paid, at));

        assert_eq!(entry.status, EntryStatus::Paid);
        assert_eq!(entry.paid_at, Some(at));
        assert_eq!(entry.store_amount + entry.commission, entry.amount);
    }
}

//! Translation for payout documents stored in the legacy `payout_requests`
//! shape: camelCase JSON, display-unit float amounts, millisecond
//! timestamps and free-form status strings.
//!
//! Nothing outside this module knows the legacy shape exists. Records are
//! converted to canonical [`PayoutRequest`]s on the way in and back on the
//! way out.

use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::Currency;
use crate::error::{EntityRef, LedgerError};
use crate::hash_idempotency_key;
use crate::payout::{AccountDetails, PayoutMethod, PayoutRequest, PayoutStatus, StatusChange};
use crate::plan::{ExecutionPlan, Operation};

/// Legacy account block. Every field was optional in practice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAccountDetails {
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
}

/// One document of the legacy `payout_requests` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPayoutRecord {
    pub id: String,
    pub store_id: String,
    #[serde(default)]
    pub store_name: Option<String>,
    /// Display units, e.g. `900.5` for ₱900.50
    pub amount: f64,
    #[serde(alias = "method")]
    pub payout_method: String,
    #[serde(default)]
    pub account_details: LegacyAccountDetails,
    #[serde(default)]
    pub notes: Option<String>,
    pub status: String,
    /// Milliseconds since the epoch
    pub requested_at: i64,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub processed_at: Option<i64>,
    #[serde(default)]
    pub processed_by: Option<String>,
    #[serde(default)]
    pub admin_notes: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

/// Canonical id for a legacy document id. UUID ids are kept; anything else
/// (push keys) maps to a stable id derived from its hash.
pub fn canonical_id(legacy_id: &str) -> Uuid {
    if let Ok(id) = Uuid::parse_str(legacy_id) {
        return id;
    }
    let digest = blake3::hash(legacy_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest.as_bytes()[..16]);
    Uuid::from_bytes(bytes)
}

/// Map a free-form legacy status onto the canonical state machine.
pub fn parse_legacy_status(value: &str) -> Option<PayoutStatus> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "pending" | "requested" | "new" => Some(PayoutStatus::Pending),
        "approved" | "processing" | "in_progress" => Some(PayoutStatus::Approved),
        "rejected" | "declined" | "denied" | "cancelled" => Some(PayoutStatus::Rejected),
        "completed" | "paid" | "done" | "success" => Some(PayoutStatus::Completed),
        _ => None,
    }
}

fn from_millis(payout_id: Uuid, field: &str, millis: i64) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        LedgerError::Storage(format!(
            "payout {}: {} out of range: {}",
            payout_id, field, millis
        ))
    })
}

impl LegacyPayoutRecord {
    /// Convert to the canonical payout. The audit trail is rebuilt from the
    /// timestamps the legacy document carries.
    pub fn to_payout(&self, currency: &Currency) -> Result<PayoutRequest, LedgerError> {
        let id = canonical_id(&self.id);

        let amount = currency.to_minor(self.amount);
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount {
                entity: EntityRef::Payout(id),
                amount,
            });
        }

        let method = PayoutMethod::parse(&self.payout_method).ok_or_else(|| {
            LedgerError::Storage(format!(
                "payout {}: unknown method {:?}",
                id, self.payout_method
            ))
        })?;
        let status = parse_legacy_status(&self.status).ok_or_else(|| {
            LedgerError::Storage(format!("payout {}: unknown status {:?}", id, self.status))
        })?;

        let requested_at = from_millis(id, "requestedAt", self.requested_at)?;
        let processed_at = self
            .processed_at
            .map(|ms| from_millis(id, "processedAt", ms))
            .transpose()?;
        let completed_at = self
            .completed_at
            .map(|ms| from_millis(id, "completedAt", ms))
            .transpose()?;

        let requested_by = self
            .requested_by
            .clone()
            .unwrap_or_else(|| self.store_id.clone());
        let admin = self
            .processed_by
            .clone()
            .unwrap_or_else(|| "legacy".to_string());

        let mut history = vec![StatusChange {
            status: PayoutStatus::Pending,
            at: requested_at,
            note: self.notes.clone(),
            actor: requested_by.clone(),
        }];
        match status {
            PayoutStatus::Pending => {}
            PayoutStatus::Rejected => history.push(StatusChange {
                status,
                at: processed_at.unwrap_or(requested_at),
                note: self.rejection_reason.clone(),
                actor: admin.clone(),
            }),
            PayoutStatus::Approved | PayoutStatus::Completed => {
                history.push(StatusChange {
                    status: PayoutStatus::Approved,
                    at: processed_at.unwrap_or(requested_at),
                    note: self.admin_notes.clone(),
                    actor: admin.clone(),
                });
                if status == PayoutStatus::Completed {
                    history.push(StatusChange {
                        status,
                        at: completed_at.or(processed_at).unwrap_or(requested_at),
                        note: None,
                        actor: admin.clone(),
                    });
                }
            }
        }

        Ok(PayoutRequest {
            id,
            store_id: self.store_id.clone(),
            amount: amount as u64,
            method,
            account: AccountDetails {
                account_name: self.account_details.account_name.clone().unwrap_or_default(),
                account_number: self
                    .account_details
                    .account_number
                    .clone()
                    .unwrap_or_default(),
                bank_name: self.account_details.bank_name.clone(),
            },
            notes: self.notes.clone(),
            requested_by,
            requested_at,
            status,
            processed_at,
            processed_by: self.processed_by.clone(),
            admin_notes: self.admin_notes.clone(),
            rejection_reason: self.rejection_reason.clone(),
            completed_at,
            completion_note: None,
            history,
        })
    }

    /// Write a canonical payout back in the legacy shape.
    pub fn from_payout(payout: &PayoutRequest, currency: &Currency) -> Self {
        Self {
            id: payout.id.to_string(),
            store_id: payout.store_id.clone(),
            store_name: None,
            amount: currency.to_display(payout.amount as i64),
            payout_method: payout.method.as_str().to_string(),
            account_details: LegacyAccountDetails {
                account_name: Some(payout.account.account_name.clone()),
                account_number: Some(payout.account.account_number.clone()),
                bank_name: payout.account.bank_name.clone(),
            },
            notes: payout.notes.clone(),
            status: payout.status.as_str().to_string(),
            requested_at: payout.requested_at.timestamp_millis(),
            requested_by: Some(payout.requested_by.clone()),
            processed_at: payout.processed_at.map(|t| t.timestamp_millis()),
            processed_by: payout.processed_by.clone(),
            admin_notes: payout.admin_notes.clone(),
            rejection_reason: payout.rejection_reason.clone(),
            completed_at: payout.completed_at.map(|t| t.timestamp_millis()),
        }
    }

    /// Idempotency key an import of this document is stored under, so a
    /// second import of the same document conflicts instead of duplicating.
    pub fn import_key(&self) -> String {
        hash_idempotency_key(&format!("legacy:payout_requests:{}", self.id))
    }
}

impl TryFrom<&LegacyPayoutRecord> for Vec<u8> {
    type Error = serde_json::Error;

    fn try_from(record: &LegacyPayoutRecord) -> Result<Self, Self::Error> {
        serde_json::to_vec(record)
    }
}

impl TryFrom<&[u8]> for LegacyPayoutRecord {
    type Error = serde_json::Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Build one plan inserting every legacy record as a canonical payout.
///
/// Imports are bookkeeping: legacy approvals already moved money in the old
/// system, so no wallet operation is emitted. Any invalid record fails the
/// whole import.
pub fn import_plan(
    records: &[LegacyPayoutRecord],
    currency: &Currency,
) -> Result<ExecutionPlan, LedgerError> {
    let mut plan = ExecutionPlan::new();
    for record in records {
        let payout = record.to_payout(currency)?;
        plan.add(Operation::InsertPayout {
            payout,
            idempotency_key: Some(record.import_key()),
        });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerAdapter;
    use crate::adapters::MemoryAdapter;

    const APPROVED_DOC: &str = r#"{
        "id": "-NxA9kP2payoutKey",
        "storeId": "S1",
        "storeName": "Sari-Sari ni Aling Nena",
        "amount": 900.5,
        "payoutMethod": "GCash",
        "accountDetails": { "accountName": "Nena Cruz", "accountNumber": "09171234567" },
        "status": "Approved",
        "requestedAt": 1760000000000,
        "processedAt": 1760003600000,
        "processedBy": "admin-1",
        "adminNotes": "ok"
    }"#;

    #[test]
    fn test_legacy_document_to_payout() {
        let record = LegacyPayoutRecord::try_from(APPROVED_DOC.as_bytes()).unwrap();
        let payout = record.to_payout(&Currency::php()).unwrap();

        assert_eq!(payout.id, canonical_id("-NxA9kP2payoutKey"));
        assert_eq!(payout.amount, 90_050);
        assert_eq!(payout.method, PayoutMethod::Gcash);
        assert_eq!(payout.status, PayoutStatus::Approved);
        assert_eq!(payout.requested_by, "S1");
        assert_eq!(payout.processed_by.as_deref(), Some("admin-1"));
        assert_eq!(payout.account.bank_name, None);
        assert_eq!(payout.history.len(), 2);
        assert_eq!(payout.history[1].status, PayoutStatus::Approved);
        assert_eq!(payout.requested_at.timestamp_millis(), 1_760_000_000_000);
    }

    #[test]
    fn test_canonical_id_is_stable() {
        let id = Uuid::now_v7();
        assert_eq!(canonical_id(&id.to_string()), id);
        assert_eq!(canonical_id("-NxA9kP2"), canonical_id("-NxA9kP2"));
        assert_ne!(canonical_id("-NxA9kP2"), canonical_id("-NxA9kP3"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(parse_legacy_status(" PAID "), Some(PayoutStatus::Completed));
        assert_eq!(parse_legacy_status("declined"), Some(PayoutStatus::Rejected));
        assert_eq!(parse_legacy_status("processing"), Some(PayoutStatus::Approved));
        assert_eq!(parse_legacy_status("on hold"), None);
    }

    #[test]
    fn test_rejects_bad_documents() {
        let mut record = LegacyPayoutRecord::try_from(APPROVED_DOC.as_bytes()).unwrap();
        record.amount = 0.0;
        assert!(matches!(
            record.to_payout(&Currency::php()),
            Err(LedgerError::InvalidAmount { .. })
        ));

        let mut record = LegacyPayoutRecord::try_from(APPROVED_DOC.as_bytes()).unwrap();
        record.status = "on hold".to_string();
        assert!(matches!(
            record.to_payout(&Currency::php()),
            Err(LedgerError::Storage(_))
        ));
    }

    #[test]
    fn test_written_back_in_legacy_shape() {
        let record = LegacyPayoutRecord::try_from(APPROVED_DOC.as_bytes()).unwrap();
        let payout = record.to_payout(&Currency::php()).unwrap();
        let back = LegacyPayoutRecord::from_payout(&payout, &Currency::php());

        let bytes = Vec::<u8>::try_from(&back).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["storeId"], "S1");
        assert_eq!(json["amount"], 900.5);
        assert_eq!(json["status"], "approved");
        assert_eq!(json["processedAt"], 1_760_003_600_000_i64);

        let reread = LegacyPayoutRecord::try_from(bytes.as_slice()).unwrap();
        assert_eq!(reread.to_payout(&Currency::php()).unwrap().amount, payout.amount);
    }

    #[tokio::test]
    async fn test_import_is_not_repeatable() {
        let adapter = MemoryAdapter::new();
        let record = LegacyPayoutRecord::try_from(APPROVED_DOC.as_bytes()).unwrap();
        let plan = import_plan(std::slice::from_ref(&record), &Currency::php()).unwrap();

        adapter.execute_plan(&plan).await.unwrap();
        let imported = adapter.get_payout(canonical_id(&record.id)).await.unwrap();
        assert_eq!(imported.status, PayoutStatus::Approved);
        assert!(adapter.get_wallet("S1").await.unwrap().is_none());

        let again = adapter.execute_plan(&plan).await;
        assert!(matches!(again, Err(LedgerError::Conflict { .. })));
    }
}

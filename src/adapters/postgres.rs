use crate::{
    AccountDetails, Adjustment, EntityRef, EntryStatus, ExecutionPlan, LedgerAdapter, LedgerEntry,
    LedgerError, Operation, PayoutMethod, PayoutRequest, PayoutStatus, StatusChange,
    TransactionType, WalletBalance, WalletSource, WalletTransaction,
};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

type PgTransaction<'c> = sqlx::Transaction<'c, Postgres>;

const GLOBAL_SCOPE: &str = "global";

fn store_scope(store_id: &str) -> String {
    format!("store:{}", store_id)
}

/// Postgres-backed ledger. Each plan runs in one database transaction; the
/// wallet rows it touches are locked up front with `SELECT ... FOR UPDATE`
/// and debits are conditional updates on `available`.
#[derive(Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist yet.
    pub async fn init_schema(&self) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id UUID PRIMARY KEY,
                store_id TEXT NOT NULL,
                amount BIGINT NOT NULL CHECK (amount > 0),
                commission_rate DOUBLE PRECISION NOT NULL
                    CHECK (commission_rate >= 0 AND commission_rate <= 1),
                commission BIGINT NOT NULL CHECK (commission >= 0),
                store_amount BIGINT NOT NULL CHECK (store_amount >= 0),
                status TEXT NOT NULL
                    CHECK (status IN ('PENDING', 'PAID', 'SETTLED', 'REFUNDED', 'VOIDED')),
                payment_method TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                paid_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL,
                status_note TEXT,
                replaces UUID,
                replaced_by UUID,
                CHECK (commission + store_amount = amount)
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ledger_entries_store
            ON ledger_entries(store_id, created_at)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_adjustments (
                id UUID PRIMARY KEY,
                entry_id UUID NOT NULL REFERENCES ledger_entries(id),
                store_id TEXT NOT NULL,
                delta_store_amount BIGINT NOT NULL CHECK (delta_store_amount <> 0),
                reason TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ledger_adjustments_store
            ON ledger_adjustments(store_id, created_at)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                store_id TEXT PRIMARY KEY,
                available BIGINT NOT NULL CHECK (available >= 0),
                pending BIGINT NOT NULL CHECK (pending >= 0),
                version BIGINT NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_transactions (
                id UUID PRIMARY KEY,
                store_id TEXT NOT NULL,
                type TEXT NOT NULL CHECK (type IN ('credit', 'debit')),
                amount BIGINT NOT NULL CHECK (amount > 0),
                source TEXT NOT NULL,
                related_order_id UUID,
                related_payout_id UUID,
                description TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_transactions_store
            ON wallet_transactions(store_id, created_at)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS payouts (
                id UUID PRIMARY KEY,
                store_id TEXT NOT NULL,
                amount BIGINT NOT NULL CHECK (amount > 0),
                method TEXT NOT NULL,
                account JSONB NOT NULL,
                notes TEXT,
                requested_by TEXT NOT NULL,
                requested_at TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('pending', 'approved', 'rejected', 'completed')),
                processed_at TIMESTAMPTZ,
                processed_by TEXT,
                admin_notes TEXT,
                rejection_reason TEXT,
                completed_at TIMESTAMPTZ,
                completion_note TEXT,
                history JSONB NOT NULL,
                idempotency_key TEXT UNIQUE
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_payouts_store
            ON payouts(store_id, requested_at)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_payouts_status
            ON payouts(status, requested_at)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commission_settings (
                scope TEXT PRIMARY KEY,
                rate DOUBLE PRECISION NOT NULL CHECK (rate >= 0 AND rate <= 1),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn apply_tx(&self, tx: &mut PgTransaction<'_>, op: &Operation) -> Result<(), LedgerError> {
        match op {
            Operation::InsertEntry { entry } => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO ledger_entries (
                        id, store_id, amount, commission_rate, commission, store_amount, status,
                        payment_method, created_at, paid_at, updated_at, status_note, replaces,
                        replaced_by
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(entry.id)
                .bind(&entry.store_id)
                .bind(entry.amount as i64)
                .bind(entry.commission_rate)
                .bind(entry.commission as i64)
                .bind(entry.store_amount as i64)
                .bind(entry.status.as_str())
                .bind(&entry.payment_method)
                .bind(entry.created_at)
                .bind(entry.paid_at)
                .bind(entry.updated_at)
                .bind(&entry.status_note)
                .bind(entry.replaces)
                .bind(entry.replaced_by)
                .execute(&mut **tx)
                .await?;

                if inserted.rows_affected() == 0 {
                    return Err(LedgerError::Conflict {
                        entity: EntityRef::Entry(entry.id),
                        detail: "entry already exists".to_string(),
                    });
                }
            }
            Operation::TransitionEntry {
                entry_id,
                expected,
                change,
            } => {
                let current = lock_entry_status(tx, *entry_id).await?;
                if !expected.contains(&current) || !current.can_transition_to(change.next) {
                    return Err(LedgerError::entry_transition(*entry_id, current, change.next));
                }

                sqlx::query(
                    r#"
                    UPDATE ledger_entries
                    SET status = $2,
                        updated_at = $3,
                        paid_at = CASE WHEN $2 = 'PAID' THEN $3 ELSE paid_at END,
                        status_note = COALESCE($4, status_note),
                        replaced_by = COALESCE($5, replaced_by)
                    WHERE id = $1
                    "#,
                )
                .bind(entry_id)
                .bind(change.next.as_str())
                .bind(change.at)
                .bind(&change.note)
                .bind(change.replaced_by)
                .execute(&mut **tx)
                .await?;
            }
            Operation::GuardEntry {
                entry_id,
                expected,
                action,
            } => {
                let current = lock_entry_status(tx, *entry_id).await?;
                if !expected.contains(&current) {
                    return Err(LedgerError::InvalidTransition {
                        entity: EntityRef::Entry(*entry_id),
                        from: current.to_string(),
                        to: action.to_string(),
                    });
                }
            }
            Operation::InsertAdjustment { adjustment } => {
                sqlx::query(
                    r#"
                    INSERT INTO ledger_adjustments (id, entry_id, store_id, delta_store_amount, reason, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(adjustment.id)
                .bind(adjustment.entry_id)
                .bind(&adjustment.store_id)
                .bind(adjustment.delta_store_amount)
                .bind(&adjustment.reason)
                .bind(adjustment.created_at)
                .execute(&mut **tx)
                .await?;
            }
            Operation::HoldPending { store_id, delta } => {
                sqlx::query(
                    r#"
                    UPDATE wallets
                    SET pending = GREATEST(pending + $2, 0),
                        version = version + 1,
                        last_updated = NOW()
                    WHERE store_id = $1
                    "#,
                )
                .bind(store_id)
                .bind(delta)
                .execute(&mut **tx)
                .await?;
            }
            Operation::Credit {
                transaction,
                release_pending,
            } => {
                sqlx::query(
                    r#"
                    UPDATE wallets
                    SET available = available + $2,
                        pending = GREATEST(pending - $3, 0),
                        version = version + 1,
                        last_updated = $4
                    WHERE store_id = $1
                    "#,
                )
                .bind(&transaction.store_id)
                .bind(transaction.amount as i64)
                .bind(*release_pending as i64)
                .bind(transaction.created_at)
                .execute(&mut **tx)
                .await?;

                insert_wallet_transaction(tx, transaction).await?;
            }
            Operation::Debit { transaction } => {
                // Checked INSIDE the row lock: this is the double-spend guard
                let debited = sqlx::query(
                    r#"
                    UPDATE wallets
                    SET available = available - $2,
                        version = version + 1,
                        last_updated = $3
                    WHERE store_id = $1 AND available >= $2
                    "#,
                )
                .bind(&transaction.store_id)
                .bind(transaction.amount as i64)
                .bind(transaction.created_at)
                .execute(&mut **tx)
                .await?;

                if debited.rows_affected() == 0 {
                    let available: i64 =
                        sqlx::query_scalar("SELECT available FROM wallets WHERE store_id = $1")
                            .bind(&transaction.store_id)
                            .fetch_optional(&mut **tx)
                            .await?
                            .unwrap_or(0);
                    return Err(LedgerError::InsufficientBalance {
                        store_id: transaction.store_id.clone(),
                        requested: transaction.amount,
                        available: available as u64,
                    });
                }

                insert_wallet_transaction(tx, transaction).await?;
            }
            Operation::OverwriteBalance {
                store_id,
                expected_version,
                available,
                pending,
                transaction,
            } => {
                let updated = sqlx::query(
                    r#"
                    UPDATE wallets
                    SET available = $2,
                        pending = $3,
                        version = version + 1,
                        last_updated = NOW()
                    WHERE store_id = $1 AND version = $4
                    "#,
                )
                .bind(store_id)
                .bind(*available as i64)
                .bind(*pending as i64)
                .bind(*expected_version as i64)
                .execute(&mut **tx)
                .await?;

                if updated.rows_affected() == 0 {
                    return Err(LedgerError::Conflict {
                        entity: EntityRef::Wallet(store_id.clone()),
                        detail: format!("wallet changed since version {}", expected_version),
                    });
                }

                if let Some(transaction) = transaction {
                    insert_wallet_transaction(tx, transaction).await?;
                }
            }
            Operation::InsertPayout {
                payout,
                idempotency_key,
            } => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO payouts (
                        id, store_id, amount, method, account, notes, requested_by, requested_at,
                        status, processed_at, processed_by, admin_notes, rejection_reason,
                        completed_at, completion_note, history, idempotency_key
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(payout.id)
                .bind(&payout.store_id)
                .bind(payout.amount as i64)
                .bind(payout.method.as_str())
                .bind(Json(&payout.account))
                .bind(&payout.notes)
                .bind(&payout.requested_by)
                .bind(payout.requested_at)
                .bind(payout.status.as_str())
                .bind(payout.processed_at)
                .bind(&payout.processed_by)
                .bind(&payout.admin_notes)
                .bind(&payout.rejection_reason)
                .bind(payout.completed_at)
                .bind(&payout.completion_note)
                .bind(Json(&payout.history))
                .bind(idempotency_key)
                .execute(&mut **tx)
                .await?;

                if inserted.rows_affected() == 0 {
                    return Err(LedgerError::Conflict {
                        entity: EntityRef::Payout(payout.id),
                        detail: "payout id or idempotency key already used".to_string(),
                    });
                }
            }
            Operation::TransitionPayout {
                payout_id,
                expected,
                change,
            } => {
                let row = sqlx::query(&format!("{} WHERE id = $1 FOR UPDATE", SELECT_PAYOUT))
                    .bind(payout_id)
                    .fetch_optional(&mut **tx)
                    .await?
                    .ok_or(LedgerError::NotFound {
                        entity: EntityRef::Payout(*payout_id),
                    })?;
                let mut payout = row_to_payout(&row)?;

                if payout.status != *expected || !payout.status.can_transition_to(change.status) {
                    return Err(PayoutStatus::guard_error(
                        *payout_id,
                        *expected,
                        payout.status,
                        change.status,
                    ));
                }
                payout.apply(change);

                sqlx::query(
                    r#"
                    UPDATE payouts
                    SET status = $2,
                        processed_at = $3,
                        processed_by = $4,
                        admin_notes = $5,
                        rejection_reason = $6,
                        completed_at = $7,
                        completion_note = $8,
                        history = $9
                    WHERE id = $1
                    "#,
                )
                .bind(payout_id)
                .bind(payout.status.as_str())
                .bind(payout.processed_at)
                .bind(&payout.processed_by)
                .bind(&payout.admin_notes)
                .bind(&payout.rejection_reason)
                .bind(payout.completed_at)
                .bind(&payout.completion_note)
                .bind(Json(&payout.history))
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }

    async fn fetch_payouts(
        &self,
        filter: &str,
        value: &str,
    ) -> Result<Vec<PayoutRequest>, LedgerError> {
        let rows = sqlx::query(&format!(
            "{} WHERE {} = $1 ORDER BY requested_at ASC, id ASC",
            SELECT_PAYOUT, filter
        ))
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payout).collect()
    }

    async fn get_rate(&self, scope: &str) -> Result<Option<f64>, LedgerError> {
        let rate = sqlx::query_scalar("SELECT rate FROM commission_settings WHERE scope = $1")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rate)
    }

    async fn put_rate(&self, scope: &str, rate: Option<f64>) -> Result<(), LedgerError> {
        match rate {
            Some(rate) => {
                sqlx::query(
                    r#"
                    INSERT INTO commission_settings (scope, rate, updated_at)
                    VALUES ($1, $2, NOW())
                    ON CONFLICT (scope) DO UPDATE SET rate = EXCLUDED.rate, updated_at = NOW()
                    "#,
                )
                .bind(scope)
                .bind(rate)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM commission_settings WHERE scope = $1")
                    .bind(scope)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerAdapter for PostgresAdapter {
    async fn execute_plan(&self, plan: &ExecutionPlan) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        // ── Phase 1: Lock wallets in a stable order ────────────────────────────
        for store_id in plan.wallet_locks() {
            sqlx::query(
                r#"
                INSERT INTO wallets (store_id, available, pending, version, last_updated)
                VALUES ($1, 0, 0, 0, NOW())
                ON CONFLICT (store_id) DO NOTHING
                "#,
            )
            .bind(&store_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("SELECT store_id FROM wallets WHERE store_id = $1 FOR UPDATE")
                .bind(&store_id)
                .execute(&mut *tx)
                .await?;
        }

        // ── Phase 2: Execute operations ────────────────────────────────────────
        for op in plan.operations() {
            if let Err(err) = self.apply_tx(&mut tx, op).await {
                tx.rollback().await.ok();
                return Err(err);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry, LedgerError> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_ENTRY))
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound {
                entity: EntityRef::Entry(entry_id),
            })?;
        row_to_entry(&row)
    }

    async fn get_entries_for_store(&self, store_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "{} WHERE store_id = $1 ORDER BY created_at ASC, id ASC",
            SELECT_ENTRY
        ))
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn get_adjustments_for_store(
        &self,
        store_id: &str,
    ) -> Result<Vec<Adjustment>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, entry_id, store_id, delta_store_amount, reason, created_at
            FROM ledger_adjustments
            WHERE store_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Adjustment, LedgerError> {
                Ok(Adjustment {
                    id: row.try_get("id")?,
                    entry_id: row.try_get("entry_id")?,
                    store_id: row.try_get("store_id")?,
                    delta_store_amount: row.try_get("delta_store_amount")?,
                    reason: row.try_get("reason")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn get_wallet(&self, store_id: &str) -> Result<Option<WalletBalance>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT store_id, available, pending, version, last_updated
            FROM wallets
            WHERE store_id = $1
            "#,
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<WalletBalance, LedgerError> {
            Ok(WalletBalance {
                store_id: row.try_get("store_id")?,
                available: row.try_get::<i64, _>("available")? as u64,
                pending: row.try_get::<i64, _>("pending")? as u64,
                version: row.try_get::<i64, _>("version")? as u64,
                last_updated: row.try_get("last_updated")?,
            })
        })
        .transpose()
    }

    async fn get_wallet_transactions(
        &self,
        store_id: &str,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, store_id, type, amount, source, related_order_id, related_payout_id,
                   description, created_at
            FROM wallet_transactions
            WHERE store_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_wallet_transaction).collect()
    }

    async fn get_payout(&self, payout_id: Uuid) -> Result<PayoutRequest, LedgerError> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_PAYOUT))
            .bind(payout_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::NotFound {
                entity: EntityRef::Payout(payout_id),
            })?;
        row_to_payout(&row)
    }

    async fn get_payouts_for_store(
        &self,
        store_id: &str,
    ) -> Result<Vec<PayoutRequest>, LedgerError> {
        self.fetch_payouts("store_id", store_id).await
    }

    async fn get_payouts_by_status(
        &self,
        status: PayoutStatus,
    ) -> Result<Vec<PayoutRequest>, LedgerError> {
        self.fetch_payouts("status", status.as_str()).await
    }

    async fn get_payout_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PayoutRequest>, LedgerError> {
        let row = sqlx::query(&format!("{} WHERE idempotency_key = $1", SELECT_PAYOUT))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_payout).transpose()
    }

    async fn get_global_rate(&self) -> Result<Option<f64>, LedgerError> {
        self.get_rate(GLOBAL_SCOPE).await
    }

    async fn set_global_rate(&self, rate: f64) -> Result<(), LedgerError> {
        self.put_rate(GLOBAL_SCOPE, Some(rate)).await
    }

    async fn get_store_rate(&self, store_id: &str) -> Result<Option<f64>, LedgerError> {
        self.get_rate(&store_scope(store_id)).await
    }

    async fn set_store_rate(&self, store_id: &str, rate: Option<f64>) -> Result<(), LedgerError> {
        self.put_rate(&store_scope(store_id), rate).await
    }
}

const SELECT_ENTRY: &str = r#"
    SELECT id, store_id, amount, commission_rate, commission, store_amount, status,
           payment_method, created_at, paid_at, updated_at, status_note, replaces, replaced_by
    FROM ledger_entries"#;

const SELECT_PAYOUT: &str = r#"
    SELECT id, store_id, amount, method, account, notes, requested_by, requested_at, status,
           processed_at, processed_by, admin_notes, rejection_reason, completed_at,
           completion_note, history
    FROM payouts"#;

async fn lock_entry_status(
    tx: &mut PgTransaction<'_>,
    entry_id: Uuid,
) -> Result<EntryStatus, LedgerError> {
    let status: String = sqlx::query_scalar("SELECT status FROM ledger_entries WHERE id = $1 FOR UPDATE")
        .bind(entry_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::NotFound {
            entity: EntityRef::Entry(entry_id),
        })?;
    parse_entry_status(&status)
}

async fn insert_wallet_transaction(
    tx: &mut PgTransaction<'_>,
    transaction: &WalletTransaction,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO wallet_transactions (
            id, store_id, type, amount, source, related_order_id, related_payout_id,
            description, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(transaction.id)
    .bind(&transaction.store_id)
    .bind(transaction.kind.as_str())
    .bind(transaction.amount as i64)
    .bind(transaction.source.as_str())
    .bind(transaction.related_order_id)
    .bind(transaction.related_payout_id)
    .bind(&transaction.description)
    .bind(transaction.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn parse_entry_status(value: &str) -> Result<EntryStatus, LedgerError> {
    EntryStatus::parse(value)
        .ok_or_else(|| LedgerError::Storage(format!("unknown entry status: {}", value)))
}

fn row_to_entry(row: &PgRow) -> Result<LedgerEntry, LedgerError> {
    let status: String = row.try_get("status")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        amount: row.try_get::<i64, _>("amount")? as u64,
        commission_rate: row.try_get("commission_rate")?,
        commission: row.try_get::<i64, _>("commission")? as u64,
        store_amount: row.try_get::<i64, _>("store_amount")? as u64,
        status: parse_entry_status(&status)?,
        payment_method: row.try_get("payment_method")?,
        created_at: row.try_get("created_at")?,
        paid_at: row.try_get("paid_at")?,
        updated_at: row.try_get("updated_at")?,
        status_note: row.try_get("status_note")?,
        replaces: row.try_get("replaces")?,
        replaced_by: row.try_get("replaced_by")?,
    })
}

fn row_to_payout(row: &PgRow) -> Result<PayoutRequest, LedgerError> {
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;
    let account: Json<AccountDetails> = row.try_get("account")?;
    let history: Json<Vec<StatusChange>> = row.try_get("history")?;

    Ok(PayoutRequest {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        amount: row.try_get::<i64, _>("amount")? as u64,
        method: PayoutMethod::parse(&method)
            .ok_or_else(|| LedgerError::Storage(format!("unknown payout method: {}", method)))?,
        account: account.0,
        notes: row.try_get("notes")?,
        requested_by: row.try_get("requested_by")?,
        requested_at: row.try_get("requested_at")?,
        status: PayoutStatus::parse(&status)
            .ok_or_else(|| LedgerError::Storage(format!("unknown payout status: {}", status)))?,
        processed_at: row.try_get("processed_at")?,
        processed_by: row.try_get("processed_by")?,
        admin_notes: row.try_get("admin_notes")?,
        rejection_reason: row.try_get("rejection_reason")?,
        completed_at: row.try_get("completed_at")?,
        completion_note: row.try_get("completion_note")?,
        history: history.0,
    })
}

fn row_to_wallet_transaction(row: &PgRow) -> Result<WalletTransaction, LedgerError> {
    let kind: String = row.try_get("type")?;
    let source: String = row.try_get("source")?;
    Ok(WalletTransaction {
        id: row.try_get("id")?,
        store_id: row.try_get("store_id")?,
        kind: TransactionType::parse(&kind)
            .ok_or_else(|| LedgerError::Storage(format!("unknown transaction type: {}", kind)))?,
        amount: row.try_get::<i64, _>("amount")? as u64,
        source: WalletSource::parse(&source)
            .ok_or_else(|| LedgerError::Storage(format!("unknown wallet source: {}", source)))?,
        related_order_id: row.try_get("related_order_id")?,
        related_payout_id: row.try_get("related_payout_id")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

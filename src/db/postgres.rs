//! Postgres store backend.
//!
//! Queries are runtime-bound (no compile-time macros) so the crate builds
//! without a live DATABASE_URL. The conditional updates push the atomicity
//! into SQL: status transitions only apply from `pending`/`active`, and
//! debits carry a balance floor in the WHERE clause, so two concurrent
//! spends can never both pass the same balance check.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::{CreditAccount, DailyUsageSummary, PaymentSession, TransactionRecord};
use crate::types::{PaymentError, PaymentResult, SessionStatus};

use super::store::PaymentStore;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = DateTime::<Utc>::from_naive_utc_and_offset(day.and_time(NaiveTime::MIN), Utc);
    (start, start + Duration::days(1))
}

fn tx_from_row(row: &PgRow) -> PaymentResult<TransactionRecord> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(TransactionRecord {
        signature: row.try_get("signature")?,
        payer_address: row.try_get("payer_address")?,
        kind: kind.parse().map_err(PaymentError::Internal)?,
        status: status.parse().map_err(PaymentError::Internal)?,
        native_amount: row.try_get("native_amount")?,
        reference_amount: row.try_get("reference_amount")?,
        rate: row.try_get("rate")?,
        rate_source: row.try_get("rate_source")?,
        recipient_address: row.try_get("recipient_address")?,
        service_id: row.try_get("service_id")?,
        resource_type: row.try_get("resource_type")?,
        resource_url: row.try_get("resource_url")?,
        method: row.try_get("method")?,
        response_time_ms: row.try_get("response_time_ms")?,
        created_at: row.try_get("created_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

fn session_from_row(row: &PgRow) -> PaymentResult<PaymentSession> {
    let status: String = row.try_get("status")?;
    Ok(PaymentSession {
        token: row.try_get("token")?,
        payer_address: row.try_get("payer_address")?,
        resource_pattern: row.try_get("resource_pattern")?,
        authorized_amount: row.try_get("authorized_amount")?,
        spent_amount: row.try_get("spent_amount")?,
        status: status.parse().map_err(PaymentError::Internal)?,
        expires_at: row.try_get("expires_at")?,
        auto_renew: row.try_get("auto_renew")?,
        opening_signature: row.try_get("opening_signature")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PaymentStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_transaction(&self, tx: &TransactionRecord) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions
                (signature, payer_address, kind, status, native_amount, reference_amount,
                 rate, rate_source, recipient_address, service_id, resource_type,
                 resource_url, method, response_time_ms, created_at, confirmed_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&tx.signature)
        .bind(&tx.payer_address)
        .bind(tx.kind.as_str())
        .bind(tx.status.as_str())
        .bind(tx.native_amount)
        .bind(tx.reference_amount)
        .bind(tx.rate)
        .bind(&tx.rate_source)
        .bind(&tx.recipient_address)
        .bind(&tx.service_id)
        .bind(&tx.resource_type)
        .bind(&tx.resource_url)
        .bind(&tx.method)
        .bind(tx.response_time_ms)
        .bind(tx.created_at)
        .bind(tx.confirmed_at)
        .bind(&tx.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transaction(&self, signature: &str) -> PaymentResult<Option<TransactionRecord>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE signature = $1")
            .bind(signature)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tx_from_row).transpose()
    }

    async fn mark_transaction_confirmed(
        &self,
        signature: &str,
        confirmed_at: DateTime<Utc>,
    ) -> PaymentResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'confirmed', confirmed_at = $2
            WHERE signature = $1 AND status = 'pending'
            "#,
        )
        .bind(signature)
        .bind(confirmed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_transaction_failed(&self, signature: &str, error: &str) -> PaymentResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'failed', error_message = $2
            WHERE signature = $1 AND status = 'pending'
            "#,
        )
        .bind(signature)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn pending_transactions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn transactions_on(&self, day: NaiveDate) -> PaymentResult<Vec<TransactionRecord>> {
        let (start, end) = day_bounds(day);
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE created_at >= $1 AND created_at < $2",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn insert_session(&self, session: &PaymentSession) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_sessions
                (token, payer_address, resource_pattern, authorized_amount, spent_amount,
                 status, expires_at, auto_renew, opening_signature, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&session.token)
        .bind(&session.payer_address)
        .bind(&session.resource_pattern)
        .bind(session.authorized_amount)
        .bind(session.spent_amount)
        .bind(session.status.as_str())
        .bind(session.expires_at)
        .bind(session.auto_renew)
        .bind(&session.opening_signature)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session(&self, token: &str) -> PaymentResult<Option<PaymentSession>> {
        let row = sqlx::query("SELECT * FROM payment_sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn apply_session_spend(
        &self,
        token: &str,
        amount: f64,
    ) -> PaymentResult<Option<PaymentSession>> {
        let row = sqlx::query(
            r#"
            UPDATE payment_sessions
            SET spent_amount = ROUND((spent_amount + $2)::numeric, 6)::double precision,
                status = CASE
                    WHEN ROUND((authorized_amount - spent_amount - $2)::numeric, 6) <= 0
                    THEN 'depleted' ELSE status
                END
            WHERE token = $1
              AND status = 'active'
              AND ROUND((authorized_amount - spent_amount)::numeric, 6) >= $2
            RETURNING *
            "#,
        )
        .bind(token)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn set_session_status(
        &self,
        token: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> PaymentResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_sessions SET status = $3 WHERE token = $1 AND status = $2",
        )
        .bind(token)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn credit_account(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
    ) -> PaymentResult<Option<CreditAccount>> {
        let account = sqlx::query_as::<_, CreditAccount>(
            r#"
            SELECT * FROM credit_accounts
            WHERE payer_address = $1 AND service_id = $2 AND service_type = $3
            "#,
        )
        .bind(payer)
        .bind(service_id)
        .bind(service_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn apply_credit(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        amount: f64,
    ) -> PaymentResult<CreditAccount> {
        let account = sqlx::query_as::<_, CreditAccount>(
            r#"
            INSERT INTO credit_accounts
                (payer_address, service_id, service_type, balance, total_purchased,
                 total_spent, auto_topup_enabled, auto_topup_threshold, auto_topup_amount,
                 updated_at)
            VALUES ($1, $2, $3, $4, $4, 0, FALSE, 0, 0, NOW())
            ON CONFLICT (payer_address, service_id, service_type) DO UPDATE
            SET balance = ROUND((credit_accounts.balance + $4)::numeric, 6)::double precision,
                total_purchased =
                    ROUND((credit_accounts.total_purchased + $4)::numeric, 6)::double precision,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(payer)
        .bind(service_id)
        .bind(service_type)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(account)
    }

    async fn apply_debit(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        amount: f64,
    ) -> PaymentResult<Option<CreditAccount>> {
        let account = sqlx::query_as::<_, CreditAccount>(
            r#"
            UPDATE credit_accounts
            SET balance = ROUND((balance - $4)::numeric, 6)::double precision,
                total_spent = ROUND((total_spent + $4)::numeric, 6)::double precision,
                updated_at = NOW()
            WHERE payer_address = $1 AND service_id = $2 AND service_type = $3
              AND balance >= $4
            RETURNING *
            "#,
        )
        .bind(payer)
        .bind(service_id)
        .bind(service_type)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn set_auto_topup(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        enabled: bool,
        threshold: f64,
        amount: f64,
    ) -> PaymentResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET auto_topup_enabled = $4, auto_topup_threshold = $5, auto_topup_amount = $6,
                updated_at = NOW()
            WHERE payer_address = $1 AND service_id = $2 AND service_type = $3
            "#,
        )
        .bind(payer)
        .bind(service_id)
        .bind(service_type)
        .bind(enabled)
        .bind(threshold)
        .bind(amount)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_daily_summary(&self, summary: &DailyUsageSummary) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_usage
                (day, service_id, resource_type, total_transactions, confirmed_transactions,
                 total_revenue_usd, unique_payers, success_rate, avg_response_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (day, service_id, resource_type) DO UPDATE
            SET total_transactions = EXCLUDED.total_transactions,
                confirmed_transactions = EXCLUDED.confirmed_transactions,
                total_revenue_usd = EXCLUDED.total_revenue_usd,
                unique_payers = EXCLUDED.unique_payers,
                success_rate = EXCLUDED.success_rate,
                avg_response_time_ms = EXCLUDED.avg_response_time_ms
            "#,
        )
        .bind(summary.day)
        .bind(&summary.service_id)
        .bind(&summary.resource_type)
        .bind(summary.total_transactions)
        .bind(summary.confirmed_transactions)
        .bind(summary.total_revenue_usd)
        .bind(summary.unique_payers)
        .bind(summary.success_rate)
        .bind(summary.avg_response_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn daily_summaries(&self, day: NaiveDate) -> PaymentResult<Vec<DailyUsageSummary>> {
        let rows = sqlx::query_as::<_, DailyUsageSummary>(
            "SELECT * FROM daily_usage WHERE day = $1 ORDER BY service_id, resource_type",
        )
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

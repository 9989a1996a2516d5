//! The persistence seam.
//!
//! Every core component is written against this trait, so the engine runs
//! identically on Postgres and on the in-memory backend. The conditional
//! operations (`apply_session_spend`, `apply_debit`, the status
//! transitions) carry the atomicity the ledger invariants depend on:
//! callers never read-then-write balances themselves.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{CreditAccount, DailyUsageSummary, PaymentSession, TransactionRecord};
use crate::types::{PaymentResult, SessionStatus};

#[async_trait]
pub trait PaymentStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    // Transaction log (append-only; status is the only mutable field).

    async fn insert_transaction(&self, tx: &TransactionRecord) -> PaymentResult<()>;

    async fn transaction(&self, signature: &str) -> PaymentResult<Option<TransactionRecord>>;

    /// `pending -> confirmed`, write-once. Returns false when the row was
    /// not pending (already terminal, or unknown).
    async fn mark_transaction_confirmed(
        &self,
        signature: &str,
        confirmed_at: DateTime<Utc>,
    ) -> PaymentResult<bool>;

    /// `pending -> failed`, write-once.
    async fn mark_transaction_failed(&self, signature: &str, error: &str) -> PaymentResult<bool>;

    /// Pending transactions created before `cutoff`, for restart-time
    /// reconciliation.
    async fn pending_transactions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<TransactionRecord>>;

    /// All transactions created on the given UTC day, for aggregation.
    async fn transactions_on(&self, day: NaiveDate) -> PaymentResult<Vec<TransactionRecord>>;

    // Payment sessions.

    async fn insert_session(&self, session: &PaymentSession) -> PaymentResult<()>;

    async fn session(&self, token: &str) -> PaymentResult<Option<PaymentSession>>;

    /// Atomic draw-down: applies only when the session is active and has at
    /// least `amount` remaining, flipping to `depleted` when the draw lands
    /// on zero. Returns the updated row, or `None` when the condition
    /// failed (caller re-reads to find out why).
    async fn apply_session_spend(
        &self,
        token: &str,
        amount: f64,
    ) -> PaymentResult<Option<PaymentSession>>;

    /// Compare-and-set on session status. Returns whether the transition
    /// applied.
    async fn set_session_status(
        &self,
        token: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> PaymentResult<bool>;

    // Credit accounts.

    async fn credit_account(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
    ) -> PaymentResult<Option<CreditAccount>>;

    /// Create-or-update: `balance += amount; total_purchased += amount`.
    async fn apply_credit(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        amount: f64,
    ) -> PaymentResult<CreditAccount>;

    /// Conditional debit with a balance floor: applies only when
    /// `balance >= amount`. Returns the updated row, or `None` when the
    /// account is missing or short.
    async fn apply_debit(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        amount: f64,
    ) -> PaymentResult<Option<CreditAccount>>;

    async fn set_auto_topup(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        enabled: bool,
        threshold: f64,
        amount: f64,
    ) -> PaymentResult<bool>;

    // Daily aggregates.

    /// Overwrites any existing row for (day, service, resource type).
    async fn upsert_daily_summary(&self, summary: &DailyUsageSummary) -> PaymentResult<()>;

    async fn daily_summaries(&self, day: NaiveDate) -> PaymentResult<Vec<DailyUsageSummary>>;
}

//! In-memory store backend.
//!
//! Backs unit tests and dev mode (`STORE_BACKEND=memory`). All conditional
//! operations run under a single write lock, which gives them the same
//! atomicity the Postgres backend gets from conditional UPDATEs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::models::{CreditAccount, DailyUsageSummary, PaymentSession, TransactionRecord};
use crate::types::{PaymentError, PaymentResult, SessionStatus, TransactionStatus};
use crate::utils::round_usd;

use super::store::PaymentStore;

type AccountKey = (String, String, String);
type SummaryKey = (NaiveDate, String, String);

#[derive(Default)]
struct Inner {
    transactions: HashMap<String, TransactionRecord>,
    sessions: HashMap<String, PaymentSession>,
    accounts: HashMap<AccountKey, CreditAccount>,
    summaries: HashMap<SummaryKey, DailyUsageSummary>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn account_key(payer: &str, service_id: &str, service_type: &str) -> AccountKey {
    (
        payer.to_string(),
        service_id.to_string(),
        service_type.to_string(),
    )
}

#[async_trait]
impl PaymentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert_transaction(&self, tx: &TransactionRecord) -> PaymentResult<()> {
        let mut inner = self.inner.write().await;
        if inner.transactions.contains_key(&tx.signature) {
            return Err(PaymentError::Internal(format!(
                "duplicate transaction signature: {}",
                tx.signature
            )));
        }
        inner.transactions.insert(tx.signature.clone(), tx.clone());
        Ok(())
    }

    async fn transaction(&self, signature: &str) -> PaymentResult<Option<TransactionRecord>> {
        Ok(self.inner.read().await.transactions.get(signature).cloned())
    }

    async fn mark_transaction_confirmed(
        &self,
        signature: &str,
        confirmed_at: DateTime<Utc>,
    ) -> PaymentResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.transactions.get_mut(signature) {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                tx.status = TransactionStatus::Confirmed;
                tx.confirmed_at = Some(confirmed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_transaction_failed(&self, signature: &str, error: &str) -> PaymentResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.transactions.get_mut(signature) {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                tx.status = TransactionStatus::Failed;
                tx.error_message = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_transactions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<TransactionRecord>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<_> = inner
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|tx| tx.created_at);
        Ok(pending)
    }

    async fn transactions_on(&self, day: NaiveDate) -> PaymentResult<Vec<TransactionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| tx.created_at.date_naive() == day)
            .cloned()
            .collect())
    }

    async fn insert_session(&self, session: &PaymentSession) -> PaymentResult<()> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&session.token) {
            return Err(PaymentError::Internal(format!(
                "duplicate session token: {}",
                session.token
            )));
        }
        inner.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn session(&self, token: &str) -> PaymentResult<Option<PaymentSession>> {
        Ok(self.inner.read().await.sessions.get(token).cloned())
    }

    async fn apply_session_spend(
        &self,
        token: &str,
        amount: f64,
    ) -> PaymentResult<Option<PaymentSession>> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(token) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Active || session.remaining_amount() < amount {
            return Ok(None);
        }
        session.spent_amount = round_usd(session.spent_amount + amount);
        if session.remaining_amount() <= 0.0 {
            session.status = SessionStatus::Depleted;
        }
        Ok(Some(session.clone()))
    }

    async fn set_session_status(
        &self,
        token: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> PaymentResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(token) {
            Some(session) if session.status == from => {
                session.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit_account(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
    ) -> PaymentResult<Option<CreditAccount>> {
        let key = account_key(payer, service_id, service_type);
        Ok(self.inner.read().await.accounts.get(&key).cloned())
    }

    async fn apply_credit(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        amount: f64,
    ) -> PaymentResult<CreditAccount> {
        let key = account_key(payer, service_id, service_type);
        let mut inner = self.inner.write().await;
        let account = inner.accounts.entry(key).or_insert_with(|| CreditAccount {
            payer_address: payer.to_string(),
            service_id: service_id.to_string(),
            service_type: service_type.to_string(),
            balance: 0.0,
            total_purchased: 0.0,
            total_spent: 0.0,
            auto_topup_enabled: false,
            auto_topup_threshold: 0.0,
            auto_topup_amount: 0.0,
            updated_at: Utc::now(),
        });
        account.balance = round_usd(account.balance + amount);
        account.total_purchased = round_usd(account.total_purchased + amount);
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn apply_debit(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        amount: f64,
    ) -> PaymentResult<Option<CreditAccount>> {
        let key = account_key(payer, service_id, service_type);
        let mut inner = self.inner.write().await;
        let Some(account) = inner.accounts.get_mut(&key) else {
            return Ok(None);
        };
        if account.balance < amount {
            return Ok(None);
        }
        account.balance = round_usd(account.balance - amount);
        account.total_spent = round_usd(account.total_spent + amount);
        account.updated_at = Utc::now();
        Ok(Some(account.clone()))
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
        let key = account_key(payer, service_id, service_type);
        let mut inner = self.inner.write().await;
        match inner.accounts.get_mut(&key) {
            Some(account) => {
                account.auto_topup_enabled = enabled;
                account.auto_topup_threshold = threshold;
                account.auto_topup_amount = amount;
                account.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_daily_summary(&self, summary: &DailyUsageSummary) -> PaymentResult<()> {
        let key = (
            summary.day,
            summary.service_id.clone(),
            summary.resource_type.clone(),
        );
        self.inner.write().await.summaries.insert(key, summary.clone());
        Ok(())
    }

    async fn daily_summaries(&self, day: NaiveDate) -> PaymentResult<Vec<DailyUsageSummary>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<_> = inner
            .summaries
            .values()
            .filter(|s| s.day == day)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.service_id, &a.resource_type).cmp(&(&b.service_id, &b.resource_type))
        });
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionKind;

    fn sample_tx(signature: &str) -> TransactionRecord {
        TransactionRecord {
            signature: signature.to_string(),
            payer_address: "payer1".to_string(),
            kind: TransactionKind::CreditTopup,
            status: TransactionStatus::Pending,
            native_amount: 0.01,
            reference_amount: 1.0,
            rate: 100.0,
            rate_source: Some("on-chain".to_string()),
            recipient_address: "recipient".to_string(),
            service_id: None,
            resource_type: None,
            resource_url: None,
            method: None,
            response_time_ms: None,
            created_at: Utc::now(),
            confirmed_at: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_terminal_status_is_write_once() {
        let store = MemoryStore::new();
        store.insert_transaction(&sample_tx("sig1")).await.unwrap();

        assert!(store
            .mark_transaction_confirmed("sig1", Utc::now())
            .await
            .unwrap());
        // A confirmed transaction can never flip to failed.
        assert!(!store.mark_transaction_failed("sig1", "late error").await.unwrap());

        let tx = store.transaction("sig1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert!(tx.error_message.is_none());
    }

    #[tokio::test]
    async fn test_debit_respects_balance_floor() {
        let store = MemoryStore::new();
        store.apply_credit("p", "svc", "agent", 0.50).await.unwrap();

        let updated = store.apply_debit("p", "svc", "agent", 0.50).await.unwrap().unwrap();
        assert_eq!(updated.balance, 0.0);

        // Overdraft attempt leaves the account untouched.
        assert!(store.apply_debit("p", "svc", "agent", 0.10).await.unwrap().is_none());
        let account = store.credit_account("p", "svc", "agent").await.unwrap().unwrap();
        assert_eq!(account.balance, 0.0);
        assert_eq!(account.total_spent, 0.50);
    }

    #[tokio::test]
    async fn test_debit_on_missing_account_is_none() {
        let store = MemoryStore::new();
        assert!(store.apply_debit("p", "svc", "agent", 0.10).await.unwrap().is_none());
        // Reads never create accounts.
        assert!(store.credit_account("p", "svc", "agent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_spend_depletes_exactly_at_zero() {
        let store = MemoryStore::new();
        let session = PaymentSession {
            token: "ps_t".to_string(),
            payer_address: "p".to_string(),
            resource_pattern: "/api/*".to_string(),
            authorized_amount: 1.0,
            spent_amount: 0.0,
            status: SessionStatus::Active,
            expires_at: Utc::now() + chrono::Duration::hours(1),
            auto_renew: false,
            opening_signature: None,
            created_at: Utc::now(),
        };
        store.insert_session(&session).await.unwrap();

        let updated = store.apply_session_spend("ps_t", 0.4).await.unwrap().unwrap();
        assert_eq!(updated.status, SessionStatus::Active);

        let updated = store.apply_session_spend("ps_t", 0.6).await.unwrap().unwrap();
        assert_eq!(updated.status, SessionStatus::Depleted);
        assert_eq!(updated.remaining_amount(), 0.0);

        // Terminal: no further spends apply.
        assert!(store.apply_session_spend("ps_t", 0.01).await.unwrap().is_none());
    }
}

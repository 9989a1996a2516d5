//! Payment sessions: preauthorized spending envelopes.
//!
//! `open` moves the money once, up front; every later `spend` is a local
//! draw-down with no on-chain leg. Spends within one session serialize on
//! a per-token lock, and the store's conditional update re-checks the
//! balance, so two concurrent spends can never both pass against the same
//! remaining amount.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::db::PaymentStore;
use crate::models::{PaymentSession, TransactionRecord};
use crate::types::{
    PaymentError, PaymentResult, SessionStatus, TransactionKind, TransactionStatus,
};
use crate::utils::{generate_token, round_usd};

use super::submitter::TransactionSubmitter;
use super::wallet::Wallet;
use super::LockRegistry;

/// Resource-pattern policy check. `*` matches everything; a trailing `*`
/// matches by prefix; anything else matches exactly. Callers run this
/// before spending; the ledger itself does not care what was bought.
pub fn pattern_matches(pattern: &str, resource: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => resource.starts_with(prefix),
        None => pattern == resource,
    }
}

pub struct SessionManager {
    store: Arc<dyn PaymentStore>,
    submitter: Arc<TransactionSubmitter>,
    locks: LockRegistry,
}

impl SessionManager {
    pub fn new(store: Arc<dyn PaymentStore>, submitter: Arc<TransactionSubmitter>) -> Self {
        Self {
            store,
            submitter,
            locks: LockRegistry::new(),
        }
    }

    /// Pay the full authorized amount up front and open the session. A
    /// failed payment opens nothing.
    pub async fn open(
        &self,
        wallet: &Wallet,
        authorized_usd: f64,
        resource_pattern: &str,
        duration_hours: i64,
        auto_renew: bool,
    ) -> PaymentResult<PaymentSession> {
        let authorized_usd = round_usd(authorized_usd);
        if authorized_usd <= 0.0 {
            return Err(PaymentError::InvalidRequest(
                "authorized amount must be positive".to_string(),
            ));
        }
        if duration_hours <= 0 {
            return Err(PaymentError::InvalidRequest(
                "session duration must be positive".to_string(),
            ));
        }

        let payment = self
            .submitter
            .pay(wallet, authorized_usd, TransactionKind::SessionOpen)
            .await?;

        let now = Utc::now();
        let session = PaymentSession {
            token: generate_token("ps"),
            payer_address: wallet.address.clone(),
            resource_pattern: resource_pattern.to_string(),
            authorized_amount: authorized_usd,
            spent_amount: 0.0,
            status: SessionStatus::Active,
            expires_at: now + Duration::hours(duration_hours),
            auto_renew,
            opening_signature: Some(payment.signature.clone()),
            created_at: now,
        };
        self.store.insert_session(&session).await?;

        info!(
            "opened session {} for {} ({} USD, pattern {}, expires {})",
            session.token, wallet.address, authorized_usd, resource_pattern, session.expires_at
        );
        Ok(session)
    }

    pub async fn get(&self, token: &str) -> PaymentResult<PaymentSession> {
        self.store
            .session(token)
            .await?
            .ok_or(PaymentError::SessionNotFound)
    }

    /// Check that the session exists, is active, unexpired, and can cover
    /// `amount`. Expiry is applied lazily here: the first validation past
    /// `expires_at` flips the session to `expired`.
    pub async fn validate(&self, token: &str, amount: f64) -> PaymentResult<PaymentSession> {
        let session = self.get(token).await?;

        match session.status {
            SessionStatus::Active => {}
            SessionStatus::Expired => return Err(PaymentError::SessionExpired),
            SessionStatus::Revoked => return Err(PaymentError::SessionRevoked),
            SessionStatus::Depleted => return Err(PaymentError::SessionDepleted),
        }

        if session.is_expired(Utc::now()) {
            self.store
                .set_session_status(token, SessionStatus::Active, SessionStatus::Expired)
                .await?;
            return Err(PaymentError::SessionExpired);
        }

        if session.remaining_amount() < amount {
            return Err(PaymentError::InsufficientSessionBalance {
                remaining: session.remaining_amount(),
                requested: amount,
            });
        }

        Ok(session)
    }

    /// Atomically draw `amount` down from the session. Returns the new
    /// remaining amount. Over-spends are rejected whole; nothing is ever
    /// partially applied.
    pub async fn spend(
        &self,
        token: &str,
        amount: f64,
        resource_url: &str,
        resource_type: &str,
        method: &str,
    ) -> PaymentResult<f64> {
        let amount = round_usd(amount);
        if amount <= 0.0 {
            return Err(PaymentError::InvalidRequest(
                "spend amount must be positive".to_string(),
            ));
        }

        let lock = self.locks.lock_for(token);
        let _guard = lock.lock().await;

        self.validate(token, amount).await?;

        let updated = match self.store.apply_session_spend(token, amount).await? {
            Some(session) => session,
            // The conditional update lost to a concurrent transition
            // (revoke from another path). Re-read for the precise error.
            None => return Err(self.spend_failure(token, amount).await),
        };

        if updated.status == SessionStatus::Depleted {
            info!("session {token} depleted");
        }

        // The money moved at open time: this is a local usage record only.
        let usage = TransactionRecord {
            signature: format!("use_{}", uuid::Uuid::new_v4().simple()),
            payer_address: updated.payer_address.clone(),
            kind: TransactionKind::SessionUse,
            status: TransactionStatus::Confirmed,
            native_amount: 0.0,
            reference_amount: amount,
            rate: 0.0,
            rate_source: None,
            recipient_address: String::new(),
            service_id: None,
            resource_type: Some(resource_type.to_string()),
            resource_url: Some(resource_url.to_string()),
            method: Some(method.to_string()),
            response_time_ms: None,
            created_at: Utc::now(),
            confirmed_at: Some(Utc::now()),
            error_message: None,
        };
        if let Err(e) = self.store.insert_transaction(&usage).await {
            // The draw-down already applied; losing the audit row is logged,
            // not fatal to the request.
            warn!("could not record usage transaction for session {token}: {e}");
        }

        Ok(updated.remaining_amount())
    }

    /// Revoke an active session. Terminal states stay as they are.
    pub async fn revoke(&self, token: &str) -> PaymentResult<()> {
        if self
            .store
            .set_session_status(token, SessionStatus::Active, SessionStatus::Revoked)
            .await?
        {
            info!("session {token} revoked");
            return Ok(());
        }
        Err(self.spend_failure(token, 0.0).await)
    }

    async fn spend_failure(&self, token: &str, amount: f64) -> PaymentError {
        match self.store.session(token).await {
            Ok(Some(session)) => match session.status {
                SessionStatus::Expired => PaymentError::SessionExpired,
                SessionStatus::Revoked => PaymentError::SessionRevoked,
                SessionStatus::Depleted => PaymentError::SessionDepleted,
                SessionStatus::Active => PaymentError::InsufficientSessionBalance {
                    remaining: session.remaining_amount(),
                    requested: amount,
                },
            },
            Ok(None) => PaymentError::SessionNotFound,
            Err(e) => e,
        }
    }
}

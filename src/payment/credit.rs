//! Credit ledger: standing balances per (payer, service) pair.
//!
//! Top-ups pay through the submitter first and credit the account only
//! after submission succeeded. Spends debit through a balance-floor
//! conditional update under a per-account lock, so concurrent spends
//! serialize and the balance never goes negative. Auto-top-up is only a
//! signal; this ledger never executes a payment on the payer's behalf.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::db::PaymentStore;
use crate::models::{CreditAccount, TransactionRecord};
use crate::types::{PaymentError, PaymentResult, TransactionKind, TransactionStatus};
use crate::utils::round_usd;

use super::submitter::TransactionSubmitter;
use super::wallet::Wallet;
use super::LockRegistry;

pub struct CreditLedger {
    store: Arc<dyn PaymentStore>,
    submitter: Arc<TransactionSubmitter>,
    locks: LockRegistry,
}

fn lock_key(payer: &str, service_id: &str, service_type: &str) -> String {
    format!("{payer}:{service_id}:{service_type}")
}

impl CreditLedger {
    pub fn new(store: Arc<dyn PaymentStore>, submitter: Arc<TransactionSubmitter>) -> Self {
        Self {
            store,
            submitter,
            locks: LockRegistry::new(),
        }
    }

    /// Current balance; zero when no account exists. Reads never create
    /// accounts.
    pub async fn balance(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
    ) -> PaymentResult<f64> {
        Ok(self
            .store
            .credit_account(payer, service_id, service_type)
            .await?
            .map(|account| account.balance)
            .unwrap_or(0.0))
    }

    /// Pay `amount_usd` on-chain, then credit the account. A failed payment
    /// mutates nothing.
    pub async fn top_up(
        &self,
        wallet: &Wallet,
        service_id: &str,
        service_type: &str,
        amount_usd: f64,
    ) -> PaymentResult<CreditAccount> {
        let amount_usd = round_usd(amount_usd);
        if amount_usd <= 0.0 {
            return Err(PaymentError::InvalidRequest(
                "top-up amount must be positive".to_string(),
            ));
        }

        let lock = self
            .locks
            .lock_for(&lock_key(&wallet.address, service_id, service_type));
        let _guard = lock.lock().await;

        self.submitter
            .pay(wallet, amount_usd, TransactionKind::CreditTopup)
            .await?;

        let account = self
            .store
            .apply_credit(&wallet.address, service_id, service_type, amount_usd)
            .await?;

        info!(
            "credited {} USD to {}/{}/{} (balance {})",
            amount_usd, wallet.address, service_id, service_type, account.balance
        );
        Ok(account)
    }

    /// Debit `amount_usd` from the account. Fails whole on shortfall; when
    /// auto-top-up is configured and the balance sits under its threshold,
    /// the distinct `AutoTopupRequired` condition tells the caller to
    /// prompt the payer and retry.
    pub async fn spend(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        amount_usd: f64,
    ) -> PaymentResult<f64> {
        let amount_usd = round_usd(amount_usd);
        if amount_usd <= 0.0 {
            return Err(PaymentError::InvalidRequest(
                "spend amount must be positive".to_string(),
            ));
        }

        let lock = self.locks.lock_for(&lock_key(payer, service_id, service_type));
        let _guard = lock.lock().await;

        let account = self
            .store
            .credit_account(payer, service_id, service_type)
            .await?;

        let balance = account.as_ref().map(|a| a.balance).unwrap_or(0.0);
        if balance < amount_usd {
            if let Some(account) = &account {
                if account.auto_topup_enabled && account.balance < account.auto_topup_threshold {
                    return Err(PaymentError::AutoTopupRequired {
                        balance: account.balance,
                        threshold: account.auto_topup_threshold,
                        suggested_amount: account.auto_topup_amount,
                    });
                }
            }
            return Err(PaymentError::InsufficientCredits {
                balance,
                requested: amount_usd,
            });
        }

        let updated = match self
            .store
            .apply_debit(payer, service_id, service_type, amount_usd)
            .await?
        {
            Some(account) => account,
            // Lost a race with another writer outside our lock (e.g. a
            // different process): report the fresh balance.
            None => {
                let balance = self.balance(payer, service_id, service_type).await?;
                return Err(PaymentError::InsufficientCredits {
                    balance,
                    requested: amount_usd,
                });
            }
        };

        let usage = TransactionRecord {
            signature: format!("use_{}", uuid::Uuid::new_v4().simple()),
            payer_address: payer.to_string(),
            kind: TransactionKind::CreditSpend,
            status: TransactionStatus::Confirmed,
            native_amount: 0.0,
            reference_amount: amount_usd,
            rate: 0.0,
            rate_source: None,
            recipient_address: String::new(),
            service_id: Some(service_id.to_string()),
            resource_type: Some(service_type.to_string()),
            resource_url: None,
            method: None,
            response_time_ms: None,
            created_at: Utc::now(),
            confirmed_at: Some(Utc::now()),
            error_message: None,
        };
        if let Err(e) = self.store.insert_transaction(&usage).await {
            warn!("could not record credit spend for {payer}/{service_id}: {e}");
        }

        Ok(updated.balance)
    }

    /// Configure auto-top-up preferences on an existing account.
    pub async fn set_auto_topup(
        &self,
        payer: &str,
        service_id: &str,
        service_type: &str,
        enabled: bool,
        threshold_usd: f64,
        amount_usd: f64,
    ) -> PaymentResult<()> {
        if self
            .store
            .set_auto_topup(
                payer,
                service_id,
                service_type,
                enabled,
                round_usd(threshold_usd),
                round_usd(amount_usd),
            )
            .await?
        {
            Ok(())
        } else {
            Err(PaymentError::NotFound(format!(
                "credit account {payer}/{service_id}/{service_type}"
            )))
        }
    }
}

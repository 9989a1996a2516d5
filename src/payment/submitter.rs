//! Transaction submitter: reference-priced payments onto the ledger.
//!
//! Quote, sign, submit, record, register. The pending record is created
//! only after the ledger accepted the submission; any earlier failure
//! (signing declined, insufficient funds, exhausted pool) surfaces as an
//! error with no record. Confirmation is someone else's job; the
//! submitter never declares a payment confirmed.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::db::PaymentStore;
use crate::models::TransactionRecord;
use crate::oracle::PriceOracle;
use crate::rpc::{EndpointPool, RpcError};
use crate::types::{PaymentError, PaymentResult, TransactionKind, TransactionStatus};
use crate::utils::round_usd;

use super::monitor::ConfirmationMonitor;
use super::wallet::Wallet;

pub struct TransactionSubmitter {
    rpc: Arc<EndpointPool>,
    oracle: Arc<PriceOracle>,
    store: Arc<dyn PaymentStore>,
    monitor: Arc<ConfirmationMonitor>,
    recipient: String,
}

impl TransactionSubmitter {
    pub fn new(
        rpc: Arc<EndpointPool>,
        oracle: Arc<PriceOracle>,
        store: Arc<dyn PaymentStore>,
        monitor: Arc<ConfirmationMonitor>,
        recipient: String,
    ) -> Self {
        Self {
            rpc,
            oracle,
            store,
            monitor,
            recipient,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Pay `reference_amount` (stable units) in native currency. Returns
    /// the pending transaction record on submission success.
    pub async fn pay(
        &self,
        wallet: &Wallet,
        reference_amount: f64,
        kind: TransactionKind,
    ) -> PaymentResult<TransactionRecord> {
        let reference_amount = round_usd(reference_amount);
        if reference_amount <= 0.0 {
            return Err(PaymentError::InvalidRequest(
                "payment amount must be positive".to_string(),
            ));
        }

        let quote = self.oracle.quote(reference_amount).await;
        let transfer = wallet.sign_transfer(&self.recipient, quote.native_amount)?;

        let signature = match self.rpc.submit_transfer(&transfer).await {
            Ok(signature) => signature,
            Err(RpcError::Rejected(msg)) => {
                return if msg.to_lowercase().contains("insufficient") {
                    Err(PaymentError::InsufficientFunds(msg))
                } else {
                    Err(PaymentError::PaymentRejected(msg))
                };
            }
            Err(e) => return Err(e.into()),
        };

        let record = TransactionRecord {
            signature: signature.clone(),
            payer_address: wallet.address.clone(),
            kind,
            status: TransactionStatus::Pending,
            native_amount: quote.native_amount,
            reference_amount,
            rate: quote.rate,
            rate_source: Some(quote.source.to_string()),
            recipient_address: self.recipient.clone(),
            service_id: None,
            resource_type: None,
            resource_url: None,
            method: None,
            response_time_ms: None,
            created_at: Utc::now(),
            confirmed_at: None,
            error_message: None,
        };
        self.store.insert_transaction(&record).await?;
        self.monitor.register(&signature);

        info!(
            "submitted {} payment {} ({} USD = {} native @ {} via {})",
            kind, signature, reference_amount, quote.native_amount, quote.rate, quote.source
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, OracleConfig};
    use crate::db::MemoryStore;
    use crate::rpc::testing::ScriptedRpc;
    use crate::rpc::SettlementRpc;

    fn oracle_config() -> OracleConfig {
        OracleConfig {
            oracle_account: "oracle1".to_string(),
            cache_ttl_secs: 30,
            fallback_rate: 100.0,
            min_plausible_rate: 0.01,
            max_plausible_rate: 100_000.0,
            http_sources: vec![],
        }
    }

    fn monitor_config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 10,
            timeout_ms: 1_000,
            workers: 1,
            restart_grace_secs: 0,
        }
    }

    fn submitter_with(rpc: Arc<ScriptedRpc>) -> (TransactionSubmitter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(EndpointPool::new(vec![rpc as Arc<dyn SettlementRpc>]));
        let oracle = Arc::new(PriceOracle::new(Arc::clone(&pool), oracle_config()));
        let monitor = ConfirmationMonitor::start(
            store.clone() as Arc<dyn PaymentStore>,
            Arc::clone(&pool),
            monitor_config(),
        );
        let submitter = TransactionSubmitter::new(
            pool,
            oracle,
            store.clone(),
            monitor,
            "recipient1".to_string(),
        );
        (submitter, store)
    }

    #[tokio::test]
    async fn test_successful_payment_creates_pending_record() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_price(Ok(Some(200.0)));
        let (submitter, store) = submitter_with(rpc);

        let wallet = Wallet::new("payer1", Some("secret".to_string()));
        let record = submitter
            .pay(&wallet, 2.0, TransactionKind::CreditTopup)
            .await
            .unwrap();

        assert_eq!(record.reference_amount, 2.0);
        assert_eq!(record.rate, 200.0);
        assert_eq!(record.native_amount, 0.01);
        assert_eq!(record.recipient_address, "recipient1");
        assert_eq!(record.rate_source.as_deref(), Some("on-chain"));

        let stored = store.transaction(&record.signature).await.unwrap().unwrap();
        assert_eq!(stored.kind, TransactionKind::CreditTopup);
    }

    #[tokio::test]
    async fn test_signing_rejection_creates_no_record() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        let (submitter, store) = submitter_with(rpc);

        let wallet = Wallet::new("payer1", None);
        let err = submitter
            .pay(&wallet, 2.0, TransactionKind::SessionOpen)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::PaymentRejected(_)));

        let pending = store
            .pending_transactions_before(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_on_chain_insufficient_funds_is_distinct() {
        let rpc = Arc::new(ScriptedRpc::rejecting("a", "insufficient native balance"));
        let (submitter, store) = submitter_with(rpc);

        let wallet = Wallet::new("payer1", Some("secret".to_string()));
        let err = submitter
            .pay(&wallet, 2.0, TransactionKind::SessionOpen)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientFunds(_)));

        let pending = store
            .pending_transactions_before(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_creates_no_record() {
        let rpc = Arc::new(ScriptedRpc::unreachable("a"));
        let (submitter, store) = submitter_with(rpc);

        let wallet = Wallet::new("payer1", Some("secret".to_string()));
        let err = submitter
            .pay(&wallet, 2.0, TransactionKind::SessionOpen)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Rpc(RpcError::Exhausted { .. })));

        let pending = store
            .pending_transactions_before(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_non_positive_amount_is_invalid() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        let (submitter, _store) = submitter_with(rpc);

        let wallet = Wallet::new("payer1", Some("secret".to_string()));
        let err = submitter
            .pay(&wallet, 0.0, TransactionKind::SessionOpen)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)));
    }
}

//! Standalone payment-proof verification.
//!
//! A caller can pay for a single request with a transaction it settled
//! itself, presenting the signature as `proof=` in the payment header.
//! Verification is fail-closed: the transfer must be confirmed on the
//! ledger, addressed to our recipient, worth at least the required
//! reference amount at the current rate, and never seen before. A proof
//! that passes is consumed: recorded in the transaction log so a second
//! presentation is rejected.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::db::PaymentStore;
use crate::models::TransactionRecord;
use crate::oracle::PriceOracle;
use crate::rpc::{EndpointPool, LedgerTxStatus};
use crate::types::{PaymentError, PaymentResult, TransactionKind, TransactionStatus};

use super::header::PaymentHeader;

const AMOUNT_TOLERANCE: f64 = 1e-9;

pub struct ProofVerifier {
    rpc: Arc<EndpointPool>,
    oracle: Arc<PriceOracle>,
    store: Arc<dyn PaymentStore>,
    recipient: String,
}

impl ProofVerifier {
    pub fn new(
        rpc: Arc<EndpointPool>,
        oracle: Arc<PriceOracle>,
        store: Arc<dyn PaymentStore>,
        recipient: String,
    ) -> Self {
        Self {
            rpc,
            oracle,
            store,
            recipient,
        }
    }

    /// Verify and consume the proof in `header` against `required_usd`.
    pub async fn verify(&self, header: &PaymentHeader, required_usd: f64) -> PaymentResult<()> {
        let proof = header.proof.as_ref().ok_or(PaymentError::PaymentRequired {
            amount_usd: required_usd,
        })?;

        if self.store.transaction(proof).await?.is_some() {
            return Err(PaymentError::VerificationFailed(
                "payment proof already used".to_string(),
            ));
        }

        let details = self
            .rpc
            .transfer_details(proof)
            .await
            .map_err(|e| {
                PaymentError::VerificationFailed(format!("could not load transaction: {e}"))
            })?
            .ok_or_else(|| {
                PaymentError::VerificationFailed("transaction not found on ledger".to_string())
            })?;

        match &details.status {
            LedgerTxStatus::Confirmed => {}
            LedgerTxStatus::Pending | LedgerTxStatus::NotFound => {
                return Err(PaymentError::VerificationFailed(
                    "transaction is not confirmed".to_string(),
                ));
            }
            LedgerTxStatus::Failed(err) => {
                return Err(PaymentError::VerificationFailed(format!(
                    "transaction failed on-chain: {err}"
                )));
            }
        }

        // A confirmed transfer to the wrong place or for too little fails
        // verification; confirmation alone proves nothing about what was
        // bought.
        if details.recipient != self.recipient {
            return Err(PaymentError::VerificationFailed(format!(
                "transfer recipient {} is not the payment address",
                details.recipient
            )));
        }

        let quote = self.oracle.quote_native(details.native_amount).await;
        if quote.reference_amount + AMOUNT_TOLERANCE < required_usd {
            return Err(PaymentError::VerificationFailed(format!(
                "transfer is worth {:.6} USD, {required_usd:.6} required",
                quote.reference_amount
            )));
        }

        let now = Utc::now();
        let record = TransactionRecord {
            signature: proof.clone(),
            payer_address: header.wallet.clone().unwrap_or_default(),
            kind: TransactionKind::Other,
            status: TransactionStatus::Confirmed,
            native_amount: details.native_amount,
            reference_amount: quote.reference_amount,
            rate: quote.rate,
            rate_source: Some(quote.source.to_string()),
            recipient_address: self.recipient.clone(),
            service_id: None,
            resource_type: None,
            resource_url: None,
            method: None,
            response_time_ms: None,
            created_at: now,
            confirmed_at: Some(now),
            error_message: None,
        };
        // Consuming the proof is what makes replays fail; a duplicate insert
        // means someone else consumed it first.
        self.store.insert_transaction(&record).await.map_err(|_| {
            PaymentError::VerificationFailed("payment proof already used".to_string())
        })?;

        info!(
            "accepted payment proof {proof} ({:.6} USD for {:.6} required)",
            quote.reference_amount, required_usd
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleConfig;
    use crate::db::MemoryStore;
    use crate::rpc::testing::ScriptedRpc;
    use crate::rpc::{SettlementRpc, TransferDetails};

    fn verifier_with(rpc: Arc<ScriptedRpc>) -> (ProofVerifier, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(EndpointPool::new(vec![rpc as Arc<dyn SettlementRpc>]));
        let oracle = Arc::new(PriceOracle::new(
            Arc::clone(&pool),
            OracleConfig {
                oracle_account: "oracle1".to_string(),
                cache_ttl_secs: 30,
                fallback_rate: 100.0,
                min_plausible_rate: 0.01,
                max_plausible_rate: 100_000.0,
                http_sources: vec![],
            },
        ));
        (
            ProofVerifier::new(pool, oracle, store.clone(), "recipient1".to_string()),
            store,
        )
    }

    fn proof_header(proof: &str) -> PaymentHeader {
        PaymentHeader {
            wallet: Some("payer1".to_string()),
            proof: Some(proof.to_string()),
            ..Default::default()
        }
    }

    fn confirmed_transfer(signature: &str, recipient: &str, native: f64) -> TransferDetails {
        TransferDetails {
            signature: signature.to_string(),
            recipient: recipient.to_string(),
            native_amount: native,
            status: LedgerTxStatus::Confirmed,
        }
    }

    #[tokio::test]
    async fn test_valid_proof_is_accepted_and_consumed() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_price(Ok(Some(100.0)));
        // 0.02 native @ 100 = 2.00 USD.
        rpc.insert_details(confirmed_transfer("proof1", "recipient1", 0.02));
        let (verifier, store) = verifier_with(rpc);

        verifier.verify(&proof_header("proof1"), 1.50).await.unwrap();

        let record = store.transaction("proof1").await.unwrap().unwrap();
        assert_eq!(record.kind, TransactionKind::Other);
        assert_eq!(record.status, TransactionStatus::Confirmed);

        // Replay is rejected.
        let err = verifier.verify(&proof_header("proof1"), 1.50).await.unwrap_err();
        assert!(matches!(err, PaymentError::VerificationFailed(msg) if msg.contains("already used")));
    }

    #[tokio::test]
    async fn test_wrong_recipient_fails_verification() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.insert_details(confirmed_transfer("proof1", "someone-else", 1.0));
        let (verifier, _store) = verifier_with(rpc);

        let err = verifier.verify(&proof_header("proof1"), 0.50).await.unwrap_err();
        assert!(matches!(err, PaymentError::VerificationFailed(msg) if msg.contains("recipient")));
    }

    #[tokio::test]
    async fn test_underpaying_proof_fails_verification() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_price(Ok(Some(100.0)));
        // 0.001 native @ 100 = 0.10 USD, below the 0.25 required.
        rpc.insert_details(confirmed_transfer("proof1", "recipient1", 0.001));
        let (verifier, _store) = verifier_with(rpc);

        let err = verifier.verify(&proof_header("proof1"), 0.25).await.unwrap_err();
        assert!(matches!(err, PaymentError::VerificationFailed(msg) if msg.contains("worth")));
    }

    #[tokio::test]
    async fn test_unconfirmed_proof_fails_verification() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.insert_details(TransferDetails {
            signature: "proof1".to_string(),
            recipient: "recipient1".to_string(),
            native_amount: 1.0,
            status: LedgerTxStatus::Pending,
        });
        let (verifier, _store) = verifier_with(rpc);

        let err = verifier.verify(&proof_header("proof1"), 0.50).await.unwrap_err();
        assert!(matches!(err, PaymentError::VerificationFailed(msg) if msg.contains("not confirmed")));
    }

    #[tokio::test]
    async fn test_unknown_signature_fails_verification() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        let (verifier, _store) = verifier_with(rpc);

        let err = verifier.verify(&proof_header("ghost"), 0.50).await.unwrap_err();
        assert!(matches!(err, PaymentError::VerificationFailed(msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn test_missing_proof_demands_payment() {
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        let (verifier, _store) = verifier_with(rpc);

        let header = PaymentHeader::default();
        let err = verifier.verify(&header, 0.50).await.unwrap_err();
        assert!(matches!(err, PaymentError::PaymentRequired { amount_usd } if amount_usd == 0.50));
    }
}

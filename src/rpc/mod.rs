//! Settlement-ledger boundary.
//!
//! The settlement network is an opaque collaborator: submit a transfer,
//! query a transaction, read a balance, read the on-chain reference price.
//! Everything here may be slow, inconsistent, or unavailable; the
//! [`EndpointPool`] wraps a ranked list of equivalent endpoints and is the
//! only way the rest of the crate talks to the ledger.

use async_trait::async_trait;

pub mod failover;
pub mod http;

pub use failover::EndpointPool;
pub use http::HttpRpcClient;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The endpoint could not be reached or dropped the connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered, but with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The ledger understood the request and refused it (e.g. insufficient
    /// native balance). Not retried against other endpoints: every endpoint
    /// fronts the same ledger.
    #[error("rejected by ledger: {0}")]
    Rejected(String),

    /// Every endpoint in the pool failed.
    #[error("all {attempts} endpoints failed: {errors}")]
    Exhausted { attempts: usize, errors: String },
}

/// A signed native-asset transfer ready for submission.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignedTransfer {
    pub from: String,
    pub to: String,
    pub native_amount: f64,
    pub nonce: String,
    pub signature: String,
}

/// Ledger-side view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerTxStatus {
    /// The ledger has not seen the transaction yet.
    NotFound,
    Pending,
    Confirmed,
    Failed(String),
}

/// Details of a settled transfer, for proof verification.
#[derive(Debug, Clone)]
pub struct TransferDetails {
    pub signature: String,
    pub recipient: String,
    pub native_amount: f64,
    pub status: LedgerTxStatus,
}

#[async_trait]
pub trait SettlementRpc: Send + Sync {
    /// Endpoint label used in logs and aggregate errors.
    fn endpoint(&self) -> &str;

    async fn submit_transfer(&self, transfer: &SignedTransfer) -> Result<String, RpcError>;

    async fn transaction_status(&self, signature: &str) -> Result<LedgerTxStatus, RpcError>;

    async fn transfer_details(&self, signature: &str) -> Result<Option<TransferDetails>, RpcError>;

    async fn balance(&self, address: &str) -> Result<f64, RpcError>;

    /// Reference price from the on-chain oracle account, in reference units
    /// per one native unit. `None` when the oracle has no current value.
    async fn latest_reference_price(&self, oracle_account: &str)
        -> Result<Option<f64>, RpcError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory ledger used across the crate's tests.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct ScriptedRpc {
        name: String,
        submit_response: Mutex<Option<Result<String, RpcError>>>,
        status_script: Mutex<VecDeque<Result<LedgerTxStatus, RpcError>>>,
        status_fallback: Mutex<Result<LedgerTxStatus, RpcError>>,
        price_response: Mutex<Result<Option<f64>, RpcError>>,
        balance_response: Mutex<Result<f64, RpcError>>,
        details: Mutex<HashMap<String, TransferDetails>>,
        pub submit_calls: AtomicUsize,
        pub status_calls: AtomicUsize,
        pub price_calls: AtomicUsize,
        sig_counter: AtomicUsize,
    }

    impl ScriptedRpc {
        pub fn healthy(name: &str) -> Self {
            Self {
                name: name.to_string(),
                submit_response: Mutex::new(None),
                status_script: Mutex::new(VecDeque::new()),
                status_fallback: Mutex::new(Ok(LedgerTxStatus::Confirmed)),
                price_response: Mutex::new(Ok(Some(100.0))),
                balance_response: Mutex::new(Ok(10.0)),
                details: Mutex::new(HashMap::new()),
                submit_calls: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
                price_calls: AtomicUsize::new(0),
                sig_counter: AtomicUsize::new(0),
            }
        }

        pub fn unreachable(name: &str) -> Self {
            let rpc = Self::healthy(name);
            let err = RpcError::Transport(format!("{name}: connection refused"));
            *rpc.submit_response.lock().unwrap() = Some(Err(err.clone()));
            *rpc.status_fallback.lock().unwrap() = Err(err.clone());
            *rpc.price_response.lock().unwrap() = Err(err.clone());
            *rpc.balance_response.lock().unwrap() = Err(err);
            rpc
        }

        pub fn rejecting(name: &str, msg: &str) -> Self {
            let rpc = Self::healthy(name);
            *rpc.submit_response.lock().unwrap() = Some(Err(RpcError::Rejected(msg.to_string())));
            rpc
        }

        pub fn script_statuses(&self, seq: Vec<Result<LedgerTxStatus, RpcError>>) {
            *self.status_script.lock().unwrap() = seq.into();
        }

        pub fn set_status_fallback(&self, status: Result<LedgerTxStatus, RpcError>) {
            *self.status_fallback.lock().unwrap() = status;
        }

        pub fn set_price(&self, price: Result<Option<f64>, RpcError>) {
            *self.price_response.lock().unwrap() = price;
        }

        pub fn insert_details(&self, details: TransferDetails) {
            self.details
                .lock()
                .unwrap()
                .insert(details.signature.clone(), details);
        }
    }

    #[async_trait]
    impl SettlementRpc for ScriptedRpc {
        fn endpoint(&self) -> &str {
            &self.name
        }

        async fn submit_transfer(&self, transfer: &SignedTransfer) -> Result<String, RpcError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            match &*self.submit_response.lock().unwrap() {
                Some(resp) => resp.clone(),
                None => {
                    let n = self.sig_counter.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("sig_{}_{}_{}", self.name, transfer.nonce, n))
                }
            }
        }

        async fn transaction_status(&self, _signature: &str) -> Result<LedgerTxStatus, RpcError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.status_script.lock().unwrap().pop_front() {
                return next;
            }
            self.status_fallback.lock().unwrap().clone()
        }

        async fn transfer_details(
            &self,
            signature: &str,
        ) -> Result<Option<TransferDetails>, RpcError> {
            Ok(self.details.lock().unwrap().get(signature).cloned())
        }

        async fn balance(&self, _address: &str) -> Result<f64, RpcError> {
            self.balance_response.lock().unwrap().clone()
        }

        async fn latest_reference_price(
            &self,
            _oracle_account: &str,
        ) -> Result<Option<f64>, RpcError> {
            self.price_calls.fetch_add(1, Ordering::SeqCst);
            self.price_response.lock().unwrap().clone()
        }
    }
}

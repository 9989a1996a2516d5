//! Ordered endpoint pool with sticky failover.
//!
//! `execute` runs an operation against the currently-preferred endpoint and
//! walks the list (wrapping) on transport/protocol errors, up to pool-size
//! attempts. The endpoint that answers becomes the new preferred one. The
//! preference pointer is plain last-writer-wins shared state: any endpoint
//! in the list is a valid substitute, so races here are harmless.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{LedgerTxStatus, RpcError, SettlementRpc, SignedTransfer, TransferDetails};

pub struct EndpointPool {
    endpoints: Vec<Arc<dyn SettlementRpc>>,
    current: AtomicUsize,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Arc<dyn SettlementRpc>>) -> Self {
        Self {
            endpoints,
            current: AtomicUsize::new(0),
        }
    }

    /// Build a pool of JSON-RPC clients from endpoint URLs, sharing one
    /// reqwest client.
    pub fn from_urls(urls: &[String], http: reqwest::Client) -> Self {
        let endpoints = urls
            .iter()
            .map(|url| {
                Arc::new(super::HttpRpcClient::new(url.clone(), http.clone()))
                    as Arc<dyn SettlementRpc>
            })
            .collect();
        Self::new(endpoints)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Run `op` with failover. Callers see either the operation's success or
    /// a single aggregate error; no partial state leaks out.
    pub async fn execute<T, F>(&self, op: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<dyn SettlementRpc>) -> BoxFuture<'static, Result<T, RpcError>>,
    {
        let n = self.endpoints.len();
        if n == 0 {
            return Err(RpcError::Exhausted {
                attempts: 0,
                errors: "no endpoints configured".to_string(),
            });
        }

        let start = self.current.load(Ordering::Relaxed) % n;
        let mut errors = Vec::new();

        for attempt in 0..n {
            let idx = (start + attempt) % n;
            let endpoint = Arc::clone(&self.endpoints[idx]);
            let label = endpoint.endpoint().to_string();

            match op(endpoint).await {
                Ok(value) => {
                    if idx != start {
                        debug!("failover: switched preferred endpoint to {label}");
                    }
                    self.current.store(idx, Ordering::Relaxed);
                    return Ok(value);
                }
                // The ledger itself refused; the endpoint is fine. Keep it
                // preferred and surface the rejection as-is.
                Err(RpcError::Rejected(msg)) => {
                    self.current.store(idx, Ordering::Relaxed);
                    return Err(RpcError::Rejected(msg));
                }
                Err(e) => {
                    warn!("endpoint {label} failed (attempt {}/{n}): {e}", attempt + 1);
                    errors.push(format!("{label}: {e}"));
                }
            }
        }

        Err(RpcError::Exhausted {
            attempts: n,
            errors: errors.join("; "),
        })
    }

    pub async fn submit_transfer(&self, transfer: &SignedTransfer) -> Result<String, RpcError> {
        let transfer = transfer.clone();
        self.execute(move |rpc| {
            let transfer = transfer.clone();
            Box::pin(async move { rpc.submit_transfer(&transfer).await })
        })
        .await
    }

    pub async fn transaction_status(&self, signature: &str) -> Result<LedgerTxStatus, RpcError> {
        let signature = signature.to_string();
        self.execute(move |rpc| {
            let signature = signature.clone();
            Box::pin(async move { rpc.transaction_status(&signature).await })
        })
        .await
    }

    pub async fn transfer_details(
        &self,
        signature: &str,
    ) -> Result<Option<TransferDetails>, RpcError> {
        let signature = signature.to_string();
        self.execute(move |rpc| {
            let signature = signature.clone();
            Box::pin(async move { rpc.transfer_details(&signature).await })
        })
        .await
    }

    pub async fn balance(&self, address: &str) -> Result<f64, RpcError> {
        let address = address.to_string();
        self.execute(move |rpc| {
            let address = address.clone();
            Box::pin(async move { rpc.balance(&address).await })
        })
        .await
    }

    pub async fn latest_reference_price(
        &self,
        oracle_account: &str,
    ) -> Result<Option<f64>, RpcError> {
        let oracle_account = oracle_account.to_string();
        self.execute(move |rpc| {
            let oracle_account = oracle_account.clone();
            Box::pin(async move { rpc.latest_reference_price(&oracle_account).await })
        })
        .await
    }
}

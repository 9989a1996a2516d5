//! Transaction confirmation monitor.
//!
//! One work queue of outstanding signatures, drained by a fixed pool of
//! worker tasks; no per-transaction timers. Each worker polls the ledger at
//! a fixed interval until the transaction resolves or the timeout lapses.
//! Terminal states are written exactly once through the store's
//! conditional transitions; ledger query errors are transient and simply
//! wait for the next tick. A transaction that outlives the timeout stays
//! `pending` and is picked up again by `resume_pending` after a restart.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::db::PaymentStore;
use crate::rpc::{EndpointPool, LedgerTxStatus};
use crate::types::PaymentResult;

pub struct ConfirmationMonitor {
    store: Arc<dyn PaymentStore>,
    rpc: Arc<EndpointPool>,
    config: MonitorConfig,
    queue: mpsc::UnboundedSender<String>,
}

impl ConfirmationMonitor {
    /// Create the monitor and spawn its worker pool.
    pub fn start(
        store: Arc<dyn PaymentStore>,
        rpc: Arc<EndpointPool>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(Self {
            store,
            rpc,
            config,
            queue: tx,
        });

        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..monitor.config.workers.max(1) {
            let monitor = Arc::clone(&monitor);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                monitor.worker_loop(worker_id, rx).await;
            });
        }

        monitor
    }

    /// Queue a signature for polling. Fire-and-forget: the caller's request
    /// path never waits on confirmation.
    pub fn register(&self, signature: &str) {
        if self.queue.send(signature.to_string()).is_err() {
            warn!("confirmation queue closed, {signature} will wait for restart reconciliation");
        }
    }

    /// Re-register transactions still pending from before this process
    /// started (minus a grace window for in-flight submissions). This is
    /// what survives a crash between submission and confirmation.
    pub async fn resume_pending(&self) -> PaymentResult<usize> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.restart_grace_secs as i64);
        let pending = self.store.pending_transactions_before(cutoff).await?;
        for tx in &pending {
            self.register(&tx.signature);
        }
        if !pending.is_empty() {
            info!("re-registered {} pending transactions for confirmation", pending.len());
        }
        Ok(pending.len())
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    ) {
        loop {
            let next = { rx.lock().await.recv().await };
            match next {
                Some(signature) => self.poll_to_resolution(&signature).await,
                None => {
                    debug!("confirmation worker {worker_id} shutting down");
                    return;
                }
            }
        }
    }

    async fn poll_to_resolution(&self, signature: &str) {
        // Idempotence: a transaction already terminal is never re-polled.
        match self.store.transaction(signature).await {
            Ok(Some(tx)) if tx.status.is_terminal() => return,
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("unknown transaction {signature} registered for confirmation");
                return;
            }
            Err(e) => {
                warn!("could not load transaction {signature}: {e}");
                return;
            }
        }

        let deadline = Instant::now() + self.config.timeout();
        loop {
            match self.rpc.transaction_status(signature).await {
                Ok(LedgerTxStatus::Confirmed) => {
                    match self
                        .store
                        .mark_transaction_confirmed(signature, Utc::now())
                        .await
                    {
                        Ok(true) => info!("transaction {signature} confirmed"),
                        Ok(false) => debug!("transaction {signature} already terminal"),
                        Err(e) => warn!("could not record confirmation of {signature}: {e}"),
                    }
                    return;
                }
                Ok(LedgerTxStatus::Failed(err)) => {
                    match self.store.mark_transaction_failed(signature, &err).await {
                        Ok(true) => info!("transaction {signature} failed on-chain: {err}"),
                        Ok(false) => debug!("transaction {signature} already terminal"),
                        Err(e) => warn!("could not record failure of {signature}: {e}"),
                    }
                    return;
                }
                // Not seen yet or still in flight: keep waiting.
                Ok(LedgerTxStatus::NotFound) | Ok(LedgerTxStatus::Pending) => {}
                // Transient: never fail a transaction because we could not
                // ask about it.
                Err(e) => debug!("status poll for {signature} failed, will retry: {e}"),
            }

            if Instant::now() >= deadline {
                warn!(
                    "confirmation of {signature} timed out after {:?}, left pending",
                    self.config.timeout()
                );
                return;
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::TransactionRecord;
    use crate::rpc::testing::ScriptedRpc;
    use crate::rpc::{RpcError, SettlementRpc};
    use crate::types::{TransactionKind, TransactionStatus};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 10,
            timeout_ms: 1_000,
            workers: 2,
            restart_grace_secs: 0,
        }
    }

    fn pending_tx(signature: &str) -> TransactionRecord {
        TransactionRecord {
            signature: signature.to_string(),
            payer_address: "payer1".to_string(),
            kind: TransactionKind::SessionOpen,
            status: TransactionStatus::Pending,
            native_amount: 0.1,
            reference_amount: 10.0,
            rate: 100.0,
            rate_source: Some("on-chain".to_string()),
            recipient_address: "recipient".to_string(),
            service_id: None,
            resource_type: None,
            resource_url: None,
            method: None,
            response_time_ms: None,
            created_at: Utc::now() - ChronoDuration::seconds(5),
            confirmed_at: None,
            error_message: None,
        }
    }

    async fn wait_for_status(
        store: &MemoryStore,
        signature: &str,
        want: TransactionStatus,
    ) -> bool {
        for _ in 0..100 {
            let tx = store.transaction(signature).await.unwrap().unwrap();
            if tx.status == want {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_confirms_after_ledger_catches_up() {
        let store = Arc::new(MemoryStore::new());
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.script_statuses(vec![
            Ok(LedgerTxStatus::NotFound),
            Ok(LedgerTxStatus::Pending),
            Ok(LedgerTxStatus::Confirmed),
        ]);
        let pool = Arc::new(EndpointPool::new(vec![
            Arc::clone(&rpc) as Arc<dyn SettlementRpc>
        ]));

        store.insert_transaction(&pending_tx("sig1")).await.unwrap();
        let monitor = ConfirmationMonitor::start(store.clone(), pool, test_config());
        monitor.register("sig1");

        assert!(wait_for_status(&store, "sig1", TransactionStatus::Confirmed).await);
        let tx = store.transaction("sig1").await.unwrap().unwrap();
        assert!(tx.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn test_on_chain_failure_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_status_fallback(Ok(LedgerTxStatus::Failed("insufficient lamports".into())));
        let pool = Arc::new(EndpointPool::new(vec![rpc as Arc<dyn SettlementRpc>]));

        store.insert_transaction(&pending_tx("sig1")).await.unwrap();
        let monitor = ConfirmationMonitor::start(store.clone(), pool, test_config());
        monitor.register("sig1");

        assert!(wait_for_status(&store, "sig1", TransactionStatus::Failed).await);
        let tx = store.transaction("sig1").await.unwrap().unwrap();
        assert_eq!(tx.error_message.as_deref(), Some("insufficient lamports"));
    }

    #[tokio::test]
    async fn test_rpc_errors_are_transient() {
        let store = Arc::new(MemoryStore::new());
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.script_statuses(vec![
            Err(RpcError::Transport("blip".into())),
            Err(RpcError::Transport("blip".into())),
            Ok(LedgerTxStatus::Confirmed),
        ]);
        let pool = Arc::new(EndpointPool::new(vec![rpc as Arc<dyn SettlementRpc>]));

        store.insert_transaction(&pending_tx("sig1")).await.unwrap();
        let monitor = ConfirmationMonitor::start(store.clone(), pool, test_config());
        monitor.register("sig1");

        // Query errors never mark the transaction failed.
        assert!(wait_for_status(&store, "sig1", TransactionStatus::Confirmed).await);
    }

    #[tokio::test]
    async fn test_timeout_leaves_transaction_pending() {
        let store = Arc::new(MemoryStore::new());
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        rpc.set_status_fallback(Ok(LedgerTxStatus::Pending));
        let pool = Arc::new(EndpointPool::new(vec![rpc as Arc<dyn SettlementRpc>]));

        let mut config = test_config();
        config.timeout_ms = 50;
        store.insert_transaction(&pending_tx("sig1")).await.unwrap();
        let monitor = ConfirmationMonitor::start(store.clone(), pool, config);
        monitor.register("sig1");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let tx = store.transaction("sig1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_terminal_transactions_are_not_re_polled() {
        let store = Arc::new(MemoryStore::new());
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        let pool = Arc::new(EndpointPool::new(vec![
            Arc::clone(&rpc) as Arc<dyn SettlementRpc>
        ]));

        let mut tx = pending_tx("sig1");
        tx.status = TransactionStatus::Confirmed;
        tx.confirmed_at = Some(Utc::now());
        store.insert_transaction(&tx).await.unwrap();

        let monitor = ConfirmationMonitor::start(store.clone(), pool, test_config());
        monitor.register("sig1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(rpc.status_calls.load(Ordering::SeqCst), 0);
        let tx = store.transaction("sig1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_resume_pending_reconciles_after_restart() {
        let store = Arc::new(MemoryStore::new());
        let rpc = Arc::new(ScriptedRpc::healthy("a"));
        let pool = Arc::new(EndpointPool::new(vec![rpc as Arc<dyn SettlementRpc>]));

        // Simulates a crash after submission: the record exists, nothing is
        // polling it.
        store.insert_transaction(&pending_tx("sig1")).await.unwrap();

        let monitor = ConfirmationMonitor::start(store.clone(), pool, test_config());
        let resumed = monitor.resume_pending().await.unwrap();
        assert_eq!(resumed, 1);

        assert!(wait_for_status(&store, "sig1", TransactionStatus::Confirmed).await);
    }
}

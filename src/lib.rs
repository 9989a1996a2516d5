// Tollgate - x402-style micropayment engine for metered resources

pub mod analytics;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod oracle;
pub mod payment;
pub mod routes;
pub mod rpc;
pub mod types;
pub mod utils;

use std::sync::Arc;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;
pub use types::{PaymentError, PaymentResult};

use analytics::UsageAggregator;
use db::PaymentStore;
use oracle::PriceOracle;
use payment::credit::CreditLedger;
use payment::monitor::ConfirmationMonitor;
use payment::session::SessionManager;
use payment::submitter::TransactionSubmitter;
use rpc::EndpointPool;

/// Wire the engine over a store: endpoint pool, oracle, confirmation
/// monitor (workers start here), submitter, session manager, credit
/// ledger, aggregator. This is the only place components are connected;
/// everything downstream receives its collaborators explicitly.
pub fn build_state(config: Config, store: Arc<dyn PaymentStore>) -> AppState {
    let rpc = Arc::new(EndpointPool::from_urls(
        &config.rpc.endpoints,
        reqwest::Client::new(),
    ));
    let oracle = Arc::new(PriceOracle::new(Arc::clone(&rpc), config.oracle.clone()));
    let monitor = ConfirmationMonitor::start(
        Arc::clone(&store),
        Arc::clone(&rpc),
        config.monitor.clone(),
    );
    let submitter = Arc::new(TransactionSubmitter::new(
        Arc::clone(&rpc),
        Arc::clone(&oracle),
        Arc::clone(&store),
        Arc::clone(&monitor),
        config.payment.recipient_address.clone(),
    ));
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&submitter),
    ));
    let credits = Arc::new(CreditLedger::new(
        Arc::clone(&store),
        Arc::clone(&submitter),
    ));
    let aggregator = Arc::new(UsageAggregator::new(Arc::clone(&store)));

    AppState {
        store,
        rpc,
        oracle,
        submitter,
        monitor,
        sessions,
        credits,
        aggregator,
        config,
    }
}

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::analytics::UsageAggregator;
use crate::config::Config;
use crate::db::PaymentStore;
use crate::oracle::PriceOracle;
use crate::payment::credit::CreditLedger;
use crate::payment::monitor::ConfirmationMonitor;
use crate::payment::session::SessionManager;
use crate::payment::submitter::TransactionSubmitter;
use crate::rpc::EndpointPool;
use crate::types::{SessionStatus, TransactionKind, TransactionStatus};
use crate::utils::round_usd;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub rpc: Arc<EndpointPool>,
    pub oracle: Arc<PriceOracle>,
    pub submitter: Arc<TransactionSubmitter>,
    pub monitor: Arc<ConfirmationMonitor>,
    pub sessions: Arc<SessionManager>,
    pub credits: Arc<CreditLedger>,
    pub aggregator: Arc<UsageAggregator>,
    pub config: Config,
}

// Persistent models. Enum-typed fields are mapped by hand in the Postgres
// backend, so no FromRow on those.

/// One row in the append-only transaction log. Created the instant a
/// submission succeeds; only the confirmation monitor mutates status;
/// never deleted.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TransactionRecord {
    pub signature: String,
    pub payer_address: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub native_amount: f64,
    pub reference_amount: f64,
    /// Reference units per native unit at payment time. Immutable once set.
    pub rate: f64,
    /// Provenance of the rate, for audit.
    pub rate_source: Option<String>,
    pub recipient_address: String,
    pub service_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_url: Option<String>,
    pub method: Option<String>,
    pub response_time_ms: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// A preauthorized spending envelope: one upfront payment, many metered
/// draws.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PaymentSession {
    pub token: String,
    pub payer_address: String,
    pub resource_pattern: String,
    pub authorized_amount: f64,
    pub spent_amount: f64,
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
    pub auto_renew: bool,
    pub opening_signature: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentSession {
    /// `remaining = authorized - spent`, normalized so the invariant holds
    /// exactly.
    pub fn remaining_amount(&self) -> f64 {
        round_usd(self.authorized_amount - self.spent_amount)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Standing balance per (payer, service) pair, independent of any session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct CreditAccount {
    pub payer_address: String,
    pub service_id: String,
    pub service_type: String,
    pub balance: f64,
    pub total_purchased: f64,
    pub total_spent: f64,
    pub auto_topup_enabled: bool,
    pub auto_topup_threshold: f64,
    pub auto_topup_amount: f64,
    pub updated_at: DateTime<Utc>,
}

/// Daily per-service rollup produced by the aggregator.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct DailyUsageSummary {
    pub day: NaiveDate,
    pub service_id: String,
    pub resource_type: String,
    pub total_transactions: i64,
    pub confirmed_transactions: i64,
    pub total_revenue_usd: f64,
    pub unique_payers: i64,
    pub success_rate: f64,
    pub avg_response_time_ms: Option<f64>,
}

/// Price and policy of a payable resource. Owned by the service catalog;
/// read-only here.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServiceConfig {
    pub service_id: String,
    pub service_type: String,
    pub pricing_model: String,
    pub base_price_usd: f64,
    pub min_payment_usd: f64,
    pub max_payment_usd: Option<f64>,
    pub requires_preauth: bool,
    pub max_session_amount_usd: Option<f64>,
}

impl ServiceConfig {
    pub fn flat(service_id: &str, service_type: &str, price_usd: f64) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_type: service_type.to_string(),
            pricing_model: "per-request".to_string(),
            base_price_usd: price_usd,
            min_payment_usd: price_usd,
            max_payment_usd: None,
            requires_preauth: false,
            max_session_amount_usd: None,
        }
    }
}

// API request/response types.

#[derive(Debug, serde::Deserialize)]
pub struct OpenSessionRequest {
    pub wallet_address: String,
    pub wallet_secret: Option<String>,
    pub amount_usd: f64,
    pub resource_pattern: String,
    pub duration_hours: i64,
    #[serde(default)]
    pub auto_renew: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub status: SessionStatus,
    pub authorized_usd: f64,
    pub spent_usd: f64,
    pub remaining_usd: f64,
    pub resource_pattern: String,
    pub expires_at: DateTime<Utc>,
    pub auto_renew: bool,
    pub opening_signature: Option<String>,
}

impl From<PaymentSession> for SessionResponse {
    fn from(s: PaymentSession) -> Self {
        Self {
            remaining_usd: s.remaining_amount(),
            token: s.token,
            status: s.status,
            authorized_usd: s.authorized_amount,
            spent_usd: s.spent_amount,
            resource_pattern: s.resource_pattern,
            expires_at: s.expires_at,
            auto_renew: s.auto_renew,
            opening_signature: s.opening_signature,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct SessionSpendRequest {
    pub amount_usd: f64,
    pub resource_url: String,
    pub resource_type: String,
    pub method: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SessionSpendResponse {
    pub remaining_usd: f64,
}

#[derive(Debug, serde::Deserialize)]
pub struct TopupRequest {
    pub wallet_address: String,
    pub wallet_secret: Option<String>,
    pub service_id: String,
    pub service_type: String,
    pub amount_usd: f64,
}

#[derive(Debug, serde::Deserialize)]
pub struct CreditSpendRequest {
    pub wallet_address: String,
    pub service_id: String,
    pub service_type: String,
    pub amount_usd: f64,
}

#[derive(Debug, serde::Deserialize)]
pub struct CreditQuery {
    pub wallet_address: String,
    pub service_id: String,
    pub service_type: String,
}

#[derive(Debug, serde::Serialize)]
pub struct CreditBalanceResponse {
    pub balance_usd: f64,
}

#[derive(Debug, serde::Deserialize)]
pub struct AutoTopupRequest {
    pub wallet_address: String,
    pub service_id: String,
    pub service_type: String,
    pub enabled: bool,
    pub threshold_usd: f64,
    pub amount_usd: f64,
}

#[derive(Debug, serde::Deserialize)]
pub struct DailyQuery {
    pub date: NaiveDate,
    pub service_id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub store: String,
    pub rpc_endpoints: usize,
}

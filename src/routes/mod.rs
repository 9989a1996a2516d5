//! API Routes
//!
//! HTTP surface over the payment engine:
//! - `/api/sessions` - open, inspect, spend, revoke payment sessions
//! - `/api/credits` - credit balances, top-ups, spends, auto-top-up prefs
//! - `/api/analytics` - daily usage/revenue summaries
//! - `/api/metered` - demo route behind the payment gate
//! - `/api/wallet` - on-chain balance reads
//! - `/api/health` - health checks

pub mod analytics;
pub mod credits;
pub mod health;
pub mod metered;
pub mod sessions;
pub mod wallet;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    Router::new()
        .merge(sessions::router(state.clone()))
        .merge(credits::router(state.clone()))
        .merge(analytics::router(state.clone()))
        .merge(metered::router(state.clone()))
        .merge(wallet::router(state.clone()))
        .merge(health::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

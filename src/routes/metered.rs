//! Demo metered route: anything mounted behind the payment gate answers
//! only to requests carrying valid payment evidence.

use axum::routing::get;
use axum::{middleware, Json, Router};

use crate::middleware::{require_payment, PaymentGate};
use crate::models::{AppState, ServiceConfig};

pub fn router(state: AppState) -> Router {
    let service = ServiceConfig::flat("echo", "api", state.config.payment.default_price_usd);
    let gate = PaymentGate::new(&state, service);

    Router::new()
        .route("/api/metered/echo", get(echo))
        .layer(middleware::from_fn_with_state(gate, require_payment))
}

async fn echo() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "metered content",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

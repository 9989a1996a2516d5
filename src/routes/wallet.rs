use axum::extract::{Path, State};
use axum::response::Json as ResponseJson;
use axum::routing::get;
use axum::{Json, Router};

use crate::models::AppState;
use crate::types::PaymentResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/wallet/{address}/balance", get(native_balance))
        .with_state(state)
}

/// On-chain native balance for an address, read through the failover pool.
async fn native_balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> PaymentResult<ResponseJson<serde_json::Value>> {
    let balance = state.rpc.balance(&address).await?;
    Ok(Json(serde_json::json!({
        "address": address,
        "native_balance": balance,
    })))
}

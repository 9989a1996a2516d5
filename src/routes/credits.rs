use axum::extract::{Query, State};
use axum::response::Json as ResponseJson;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::models::{
    AppState, AutoTopupRequest, CreditAccount, CreditBalanceResponse, CreditQuery,
    CreditSpendRequest, TopupRequest,
};
use crate::payment::Wallet;
use crate::types::PaymentResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/credits/balance", get(balance))
        .route("/api/credits/topup", post(top_up))
        .route("/api/credits/spend", post(spend))
        .route("/api/credits/auto-topup", post(set_auto_topup))
        .with_state(state)
}

async fn balance(
    State(state): State<AppState>,
    Query(query): Query<CreditQuery>,
) -> PaymentResult<ResponseJson<CreditBalanceResponse>> {
    let balance = state
        .credits
        .balance(&query.wallet_address, &query.service_id, &query.service_type)
        .await?;
    Ok(Json(CreditBalanceResponse { balance_usd: balance }))
}

async fn top_up(
    State(state): State<AppState>,
    Json(request): Json<TopupRequest>,
) -> PaymentResult<ResponseJson<CreditAccount>> {
    let secret = request
        .wallet_secret
        .or_else(|| state.config.payment.payer_secret.clone());
    let wallet = Wallet::new(request.wallet_address, secret);

    let account = state
        .credits
        .top_up(
            &wallet,
            &request.service_id,
            &request.service_type,
            request.amount_usd,
        )
        .await?;
    Ok(Json(account))
}

async fn spend(
    State(state): State<AppState>,
    Json(request): Json<CreditSpendRequest>,
) -> PaymentResult<ResponseJson<CreditBalanceResponse>> {
    let balance = state
        .credits
        .spend(
            &request.wallet_address,
            &request.service_id,
            &request.service_type,
            request.amount_usd,
        )
        .await?;
    Ok(Json(CreditBalanceResponse { balance_usd: balance }))
}

async fn set_auto_topup(
    State(state): State<AppState>,
    Json(request): Json<AutoTopupRequest>,
) -> PaymentResult<ResponseJson<serde_json::Value>> {
    state
        .credits
        .set_auto_topup(
            &request.wallet_address,
            &request.service_id,
            &request.service_type,
            request.enabled,
            request.threshold_usd,
            request.amount_usd,
        )
        .await?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

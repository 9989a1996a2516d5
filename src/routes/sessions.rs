use axum::extract::{Path, State};
use axum::response::Json as ResponseJson;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use crate::models::{
    AppState, OpenSessionRequest, SessionResponse, SessionSpendRequest, SessionSpendResponse,
};
use crate::payment::Wallet;
use crate::types::PaymentResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(open_session))
        .route("/api/sessions/{token}", get(get_session))
        .route("/api/sessions/{token}/spend", post(spend_session))
        .route("/api/sessions/{token}/revoke", post(revoke_session))
        .with_state(state)
}

async fn open_session(
    State(state): State<AppState>,
    Json(request): Json<OpenSessionRequest>,
) -> PaymentResult<ResponseJson<SessionResponse>> {
    info!(
        "session open requested by {} for {} USD",
        request.wallet_address, request.amount_usd
    );

    let secret = request
        .wallet_secret
        .or_else(|| state.config.payment.payer_secret.clone());
    let wallet = Wallet::new(request.wallet_address, secret);

    let session = state
        .sessions
        .open(
            &wallet,
            request.amount_usd,
            &request.resource_pattern,
            request.duration_hours,
            request.auto_renew,
        )
        .await?;

    Ok(Json(session.into()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> PaymentResult<ResponseJson<SessionResponse>> {
    let session = state.sessions.get(&token).await?;
    Ok(Json(session.into()))
}

async fn spend_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<SessionSpendRequest>,
) -> PaymentResult<ResponseJson<SessionSpendResponse>> {
    let remaining = state
        .sessions
        .spend(
            &token,
            request.amount_usd,
            &request.resource_url,
            &request.resource_type,
            &request.method,
        )
        .await?;

    Ok(Json(SessionSpendResponse {
        remaining_usd: remaining,
    }))
}

async fn revoke_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> PaymentResult<ResponseJson<SessionResponse>> {
    state.sessions.revoke(&token).await?;
    let session = state.sessions.get(&token).await?;
    Ok(Json(session.into()))
}

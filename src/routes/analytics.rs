use axum::extract::{Query, State};
use axum::response::Json as ResponseJson;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::models::{AppState, DailyQuery, DailyUsageSummary};
use crate::types::PaymentResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/analytics/daily", get(daily))
        .route("/api/analytics/aggregate", post(aggregate))
        .with_state(state)
}

async fn daily(
    State(state): State<AppState>,
    Query(query): Query<DailyQuery>,
) -> PaymentResult<ResponseJson<Vec<DailyUsageSummary>>> {
    let mut summaries = state.store.daily_summaries(query.date).await?;
    if let Some(service_id) = &query.service_id {
        summaries.retain(|s| &s.service_id == service_id);
    }
    Ok(Json(summaries))
}

/// Re-run the rollup for a day (idempotent) and return the fresh rows.
async fn aggregate(
    State(state): State<AppState>,
    Json(query): Json<DailyQuery>,
) -> PaymentResult<ResponseJson<Vec<DailyUsageSummary>>> {
    let mut summaries = state.aggregator.aggregate_day(query.date).await?;
    if let Some(service_id) = &query.service_id {
        summaries.retain(|s| &s.service_id == service_id);
    }
    Ok(Json(summaries))
}

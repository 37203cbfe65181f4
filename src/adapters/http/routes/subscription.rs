use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    adapters::http::{app_state::AppState, middleware::Principal},
    app_error::AppResult,
};

#[derive(Deserialize)]
struct PromotionPayload {
    code: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/cancel", post(cancel))
        .route("/promotion", post(apply_promotion))
}

async fn status(
    State(app_state): State<AppState>,
    principal: Principal,
) -> AppResult<impl IntoResponse> {
    let view = app_state
        .reconciliation_use_cases
        .status_for(principal.user_id, Utc::now())
        .await?;
    Ok(Json(view))
}

async fn cancel(
    State(app_state): State<AppState>,
    principal: Principal,
) -> AppResult<impl IntoResponse> {
    let summary = app_state
        .billing_use_cases
        .cancel_subscription(principal.user_id, Utc::now())
        .await?;
    Ok(Json(summary))
}

async fn apply_promotion(
    State(app_state): State<AppState>,
    principal: Principal,
    Json(payload): Json<PromotionPayload>,
) -> AppResult<impl IntoResponse> {
    let applied = app_state
        .billing_use_cases
        .apply_promotion_code(principal.user_id, &payload.code, Utc::now())
        .await?;
    Ok(Json(applied))
}

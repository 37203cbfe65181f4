use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
use chrono::Utc;
use tracing::info;

use crate::{
    adapters::http::{app_state::AppState, middleware::Principal},
    app_error::AppResult,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/sync/stripe", post(sync_stripe))
}

async fn sync_stripe(
    State(app_state): State<AppState>,
    principal: Principal,
) -> AppResult<impl IntoResponse> {
    principal.require_admin()?;
    info!(admin = %principal.user_id, "Administrative sweep requested");

    let report = app_state.reconciliation_use_cases.sweep(Utc::now()).await?;
    Ok(Json(report))
}

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    use_cases::webhook_ingest::IngestOutcome,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/stripe", post(stripe_webhook))
}

/// Verify, record and hand off. Effects run on the worker pool, so a failing
/// handler never turns into a non-2xx response for the provider.
async fn stripe_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature("missing signature header".into()))?;

    let envelope = app_state
        .webhook_verifier
        .verify(&body, signature, Utc::now())?;

    let event_id = envelope.event_id.clone();
    let outcome = app_state.webhook_ingest.ingest(envelope).await?;
    if outcome == IngestOutcome::AlreadyProcessed {
        info!(%event_id, "Duplicate webhook delivery acknowledged");
    }

    Ok(Json(json!({ "received": true })))
}

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    adapters::http::{app_state::AppState, middleware::Principal},
    app_error::AppResult,
};

#[derive(Deserialize)]
struct ConfirmSetupPayload {
    payment_method_id: String,
}

#[derive(Deserialize)]
struct CreateSubscriptionPayload {
    price_id: String,
}

#[derive(Serialize)]
struct ItemsResponse<T> {
    items: Vec<T>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/customer", post(create_customer))
        .route("/setup-intent", post(create_setup_intent))
        .route("/confirm-setup", post(confirm_setup))
        .route("/subscription", post(create_subscription))
        .route("/history", get(payment_history))
        .route("/methods", get(list_payment_methods))
        .route("/methods/{id}", delete(delete_payment_method))
}

async fn create_customer(
    State(app_state): State<AppState>,
    principal: Principal,
) -> AppResult<impl IntoResponse> {
    let customer_id = app_state
        .billing_use_cases
        .create_customer(principal.user_id, &principal.email)
        .await?;
    Ok(Json(json!({ "customer_id": customer_id.as_str() })))
}

async fn create_setup_intent(
    State(app_state): State<AppState>,
    principal: Principal,
) -> AppResult<impl IntoResponse> {
    let intent = app_state
        .billing_use_cases
        .create_setup_intent(principal.user_id)
        .await?;
    Ok(Json(json!({ "client_secret": intent.client_secret })))
}

async fn confirm_setup(
    State(app_state): State<AppState>,
    principal: Principal,
    Json(payload): Json<ConfirmSetupPayload>,
) -> AppResult<impl IntoResponse> {
    app_state
        .billing_use_cases
        .confirm_setup(principal.user_id, &payload.payment_method_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_subscription(
    State(app_state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateSubscriptionPayload>,
) -> AppResult<impl IntoResponse> {
    let change = app_state
        .billing_use_cases
        .create_subscription(principal.user_id, payload.price_id.trim(), Utc::now())
        .await?;
    Ok(Json(change))
}

async fn payment_history(
    State(app_state): State<AppState>,
    principal: Principal,
) -> AppResult<impl IntoResponse> {
    let items = app_state
        .billing_use_cases
        .payment_history(principal.user_id, Utc::now())
        .await?;
    Ok(Json(ItemsResponse { items }))
}

async fn list_payment_methods(
    State(app_state): State<AppState>,
    principal: Principal,
) -> AppResult<impl IntoResponse> {
    let items = app_state
        .billing_use_cases
        .list_payment_methods(principal.user_id)
        .await?;
    Ok(Json(ItemsResponse { items }))
}

async fn delete_payment_method(
    State(app_state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    app_state
        .billing_use_cases
        .delete_payment_method(principal.user_id, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

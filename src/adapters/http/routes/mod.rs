pub mod admin;
pub mod payment;
pub mod subscription;
pub mod webhook;

use axum::Router;

use crate::adapters::http::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/webhook", webhook::router())
        .nest("/subscription", subscription::router())
        .nest("/payment", payment::router())
        .nest("/admin", admin::router())
}

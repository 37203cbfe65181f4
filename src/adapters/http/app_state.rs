use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    infra::{config::AppConfig, webhook_verifier::WebhookVerifier},
    use_cases::{
        billing::BillingUseCases, reconciliation::ReconciliationUseCases,
        webhook_ingest::WebhookIngest,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub billing_use_cases: Arc<BillingUseCases>,
    pub reconciliation_use_cases: Arc<ReconciliationUseCases>,
    pub webhook_ingest: Arc<WebhookIngest>,
    pub webhook_verifier: Arc<WebhookVerifier>,
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for Arc<BillingUseCases> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.billing_use_cases.clone()
    }
}

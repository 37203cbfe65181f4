use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::http::app_state::AppState,
    infra::{
        config::AppConfig,
        http_client::try_build_client,
        postgres_persistence,
        stripe_billing_adapter::StripeBillingAdapter,
        stripe_client::StripeClient,
        webhook_verifier::WebhookVerifier,
        worker_pool::{WorkerPool, WorkerPoolConfig},
    },
    application::ports::billing_provider::BillingProvider,
    use_cases::{
        billing::BillingUseCases,
        ledger::{IdempotencyLedger, ProcessedEventRepo},
        reconciliation::ReconciliationUseCases,
        subscription_store::{PaymentProfileRepo, SubscriptionRepo},
        transitions::TransitionHandlers,
        webhook_ingest::WebhookIngest,
    },
};

/// Everything `main` needs to serve and later shut down cleanly.
pub struct AppRuntime {
    pub app_state: AppState,
    pub worker_pool: WorkerPool,
    pub ledger: IdempotencyLedger,
}

pub async fn init_app_state(config: AppConfig) -> anyhow::Result<AppRuntime> {
    let postgres_arc = Arc::new(postgres_persistence(&config.database_url).await?);
    let subscription_repo = postgres_arc.clone() as Arc<dyn SubscriptionRepo>;
    let payment_repo = postgres_arc.clone() as Arc<dyn PaymentProfileRepo>;
    let event_repo = postgres_arc as Arc<dyn ProcessedEventRepo>;

    let stripe_client = StripeClient::new(
        try_build_client()?,
        config.stripe_secret_key.clone(),
        &config.stripe_api_base,
    );
    let provider = Arc::new(StripeBillingAdapter::new(stripe_client)) as Arc<dyn BillingProvider>;

    let handlers = Arc::new(TransitionHandlers::new(
        subscription_repo.clone(),
        provider.clone(),
    ));
    let worker_pool = WorkerPool::start(
        WorkerPoolConfig {
            workers: config.webhook_workers,
            queue_capacity: config.webhook_queue_capacity,
            shutdown_timeout: Duration::from_secs(config.webhook_shutdown_timeout_secs),
        },
        handlers.clone(),
    );

    let ledger = IdempotencyLedger::new(
        event_repo,
        chrono::Duration::days(config.ledger_retention_days),
    );
    let webhook_ingest = WebhookIngest::new(
        ledger.clone(),
        Arc::new(worker_pool.handle()),
        handlers,
    );
    let webhook_verifier = WebhookVerifier::new(
        config.stripe_webhook_secret.clone(),
        config.webhook_tolerance_secs,
    );

    let billing_use_cases = BillingUseCases::new(
        subscription_repo.clone(),
        payment_repo,
        provider.clone(),
        config.allowed_price_ids.clone(),
    );
    let reconciliation_use_cases = ReconciliationUseCases::new(subscription_repo, provider);

    let app_state = AppState {
        config: Arc::new(config),
        billing_use_cases: Arc::new(billing_use_cases),
        reconciliation_use_cases: Arc::new(reconciliation_use_cases),
        webhook_ingest: Arc::new(webhook_ingest),
        webhook_verifier: Arc::new(webhook_verifier),
    };

    Ok(AppRuntime {
        app_state,
        worker_pool,
        ledger,
    })
}

pub fn init_tracing(log_file: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "billing_sync=debug,tower_http=info".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .pretty();

    // File (structured JSON logs); console only if the file can't be created
    let (json_layer, file_error) = match File::create(log_file) {
        Ok(file) => (
            Some(
                fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .with_current_span(true)
                    .with_span_list(true),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();

    if let Some(e) = file_error {
        tracing::warn!(error = %e, log_file, "Cannot create log file, logging to console only");
    }
}

//! Test app state builder for HTTP-level integration testing.
//!
//! `TestAppStateBuilder` creates an `AppState` backed by in-memory repositories
//! and a [`FakeBillingProvider`], with a fixed JWT secret and webhook secret so
//! tests can mint tokens and signatures.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::http::HeaderValue;
use chrono::Utc;
use secrecy::SecretString;
use url::Url;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    application::jwt,
    domain::entities::{
        billing_event::WebhookEnvelope, payment_profile::PaymentProfile,
        subscription::SubscriptionRecord,
    },
    infra::{
        config::AppConfig,
        webhook_verifier::{WebhookVerifier, compute_signature},
    },
    test_utils::{
        FakeBillingProvider, InMemoryPaymentProfileRepo, InMemoryProcessedEventRepo,
        InMemorySubscriptionRepo,
    },
    use_cases::{
        billing::BillingUseCases,
        ledger::IdempotencyLedger,
        reconciliation::ReconciliationUseCases,
        transitions::TransitionHandlers,
        webhook_ingest::{EventQueue, WebhookIngest},
    },
};

pub const TEST_JWT_SECRET: &str = "test_jwt_secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// `Authorization` header value for a freshly minted principal token.
pub fn bearer_token(user_id: Uuid, is_admin: bool) -> String {
    let token = jwt::issue(
        user_id,
        "user@example.com",
        is_admin,
        &SecretString::new(TEST_JWT_SECRET.into()),
        time::Duration::hours(1),
    )
    .unwrap();
    format!("Bearer {token}")
}

/// `Stripe-Signature` header value for `payload`, signed now with the test secret.
pub fn signed_webhook_header(payload: &[u8]) -> String {
    let timestamp = Utc::now().timestamp();
    let signature = compute_signature(
        &SecretString::new(TEST_WEBHOOK_SECRET.into()),
        timestamp,
        payload,
    )
    .unwrap();
    format!("t={timestamp},v1={signature}")
}

// ============================================================================
// Recording Queue
// ============================================================================

/// Records every offered envelope.
///
/// Rejects by default, which makes ingest process events inline so route
/// tests can assert on their effects without waiting on a pool.
#[derive(Default)]
pub struct RecordingEventQueue {
    accept: bool,
    offered: Mutex<Vec<WebhookEnvelope>>,
}

impl RecordingEventQueue {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            offered: Mutex::new(Vec::new()),
        }
    }

    pub fn offered_ids(&self) -> Vec<String> {
        self.offered
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_id.clone())
            .collect()
    }
}

impl EventQueue for RecordingEventQueue {
    fn enqueue(&self, envelope: WebhookEnvelope) -> bool {
        self.offered.lock().unwrap().push(envelope);
        self.accept
    }
}

// ============================================================================
// TestAppStateBuilder
// ============================================================================

/// Handles to the mocks behind a built state, for assertions.
pub struct TestMocks {
    pub subscriptions: Arc<InMemorySubscriptionRepo>,
    pub payments: Arc<InMemoryPaymentProfileRepo>,
    pub events: Arc<InMemoryProcessedEventRepo>,
    pub provider: Arc<FakeBillingProvider>,
    pub queue: Arc<RecordingEventQueue>,
}

/// Builder for creating `AppState` with in-memory mocks for testing.
///
/// # Example
///
/// ```ignore
/// let record = create_test_subscription(|s| s.status = SubscriptionStatus::Active);
///
/// let (app_state, mocks) = TestAppStateBuilder::new()
///     .with_subscription(record)
///     .build_with_mocks();
/// ```
pub struct TestAppStateBuilder {
    subscriptions: Vec<SubscriptionRecord>,
    profiles: Vec<PaymentProfile>,
    provider: Option<Arc<FakeBillingProvider>>,
    queue: Option<Arc<RecordingEventQueue>>,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            subscriptions: vec![],
            profiles: vec![],
            provider: None,
            queue: None,
        }
    }

    /// Add a local subscription record.
    pub fn with_subscription(mut self, record: SubscriptionRecord) -> Self {
        self.subscriptions.push(record);
        self
    }

    /// Add a payment profile.
    pub fn with_profile(mut self, profile: PaymentProfile) -> Self {
        self.profiles.push(profile);
        self
    }

    /// Use a pre-scripted provider instead of an empty one.
    pub fn with_provider(mut self, provider: Arc<FakeBillingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use a custom queue (e.g. [`RecordingEventQueue::accepting`]).
    pub fn with_queue(mut self, queue: Arc<RecordingEventQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> AppState {
        self.build_with_mocks().0
    }

    /// Build the state and hand back the mocks behind it.
    pub fn build_with_mocks(self) -> (AppState, TestMocks) {
        let subscriptions = Arc::new(InMemorySubscriptionRepo::with_records(self.subscriptions));
        let payments = Arc::new(InMemoryPaymentProfileRepo::with_profiles(self.profiles));
        let events = Arc::new(InMemoryProcessedEventRepo::new());
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(FakeBillingProvider::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(RecordingEventQueue::default()));

        let config = Arc::new(test_config());

        let billing_use_cases = Arc::new(BillingUseCases::new(
            subscriptions.clone(),
            payments.clone(),
            provider.clone(),
            config.allowed_price_ids.clone(),
        ));
        let reconciliation_use_cases = Arc::new(ReconciliationUseCases::new(
            subscriptions.clone(),
            provider.clone(),
        ));
        let ledger = IdempotencyLedger::new(events.clone(), chrono::Duration::days(30));
        let handlers = Arc::new(TransitionHandlers::new(
            subscriptions.clone(),
            provider.clone(),
        ));
        let webhook_ingest = Arc::new(WebhookIngest::new(ledger, queue.clone(), handlers));
        let webhook_verifier = Arc::new(WebhookVerifier::new(
            config.stripe_webhook_secret.clone(),
            config.webhook_tolerance_secs,
        ));

        let app_state = AppState {
            config,
            billing_use_cases,
            reconciliation_use_cases,
            webhook_ingest,
            webhook_verifier,
        };

        (
            app_state,
            TestMocks {
                subscriptions,
                payments,
                events,
                provider,
                queue,
            },
        )
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: String::new(),
        bind_addr: "127.0.0.1:3001".parse::<SocketAddr>().unwrap(),
        cors_origin: HeaderValue::from_static("http://localhost:3000"),
        jwt_secret: SecretString::new(TEST_JWT_SECRET.into()),
        stripe_secret_key: SecretString::new("sk_test".into()),
        stripe_webhook_secret: SecretString::new(TEST_WEBHOOK_SECRET.into()),
        stripe_api_base: Url::parse("http://localhost:12111/v1").unwrap(),
        allowed_price_ids: vec!["price_monthly".to_string(), "price_yearly".to_string()],
        webhook_tolerance_secs: 300,
        webhook_workers: 1,
        webhook_queue_capacity: 10,
        webhook_shutdown_timeout_secs: 1,
        ledger_retention_days: 30,
        ledger_prune_interval_secs: 3600,
        log_file: String::new(),
    }
}

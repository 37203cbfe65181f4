use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{app_error::AppResult, domain::entities::subscription::SubscriptionStatus};

// ============================================================================
// Port Types - Provider-agnostic domain types
// ============================================================================

/// Unique identifier for a customer in the payment provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CustomerId(pub String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a subscription in the payment provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic key sent with every mutating provider call.
///
/// Built only from stable inputs, so a retried call after a timeout or crash
/// replays the original result instead of creating a second resource.
///
/// Keys for requests a user may repeat on purpose (cancel, resume, create
/// after a failure) also carry the version of the local state the request was
/// made against. A retry sees the same version and reuses the key. Once any
/// write lands, the next request gets a fresh key and is not answered with a
/// stale replay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

fn state_version(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.9fZ").to_string()
}

impl IdempotencyKey {
    pub fn customer_create(user_id: Uuid) -> Self {
        Self(format!("customer-create:{user_id}"))
    }

    /// `replaces` is the dead subscription this attempt supersedes, and
    /// `profile_version` the payment profile's `updated_at`, which moves when
    /// the payment method changes.
    pub fn subscription_create(
        user_id: Uuid,
        customer: &CustomerId,
        price_id: &str,
        replaces: Option<&SubscriptionId>,
        profile_version: DateTime<Utc>,
    ) -> Self {
        let replaces = replaces.map_or("none", SubscriptionId::as_str);
        Self(format!(
            "sub-create:{user_id}:{customer}:{price_id}:{replaces}:{}",
            state_version(profile_version)
        ))
    }

    pub fn subscription_resume(
        subscription: &SubscriptionId,
        price_id: &str,
        record_version: DateTime<Utc>,
    ) -> Self {
        Self(format!(
            "sub-resume:{subscription}:{price_id}:{}",
            state_version(record_version)
        ))
    }

    pub fn subscription_cancel(subscription: &SubscriptionId, record_version: DateTime<Utc>) -> Self {
        Self(format!(
            "sub-cancel:{subscription}:{}",
            state_version(record_version)
        ))
    }

    pub fn subscription_cancel_now(subscription: &SubscriptionId) -> Self {
        Self(format!("sub-cancel-now:{subscription}"))
    }

    pub fn payment_method_attach(customer: &CustomerId, payment_method_id: &str) -> Self {
        Self(format!("pm-attach:{customer}:{payment_method_id}"))
    }

    pub fn default_payment_method(customer: &CustomerId, payment_method_id: &str) -> Self {
        Self(format!("customer-default-pm:{customer}:{payment_method_id}"))
    }

    pub fn payment_method_detach(payment_method_id: &str) -> Self {
        Self(format!("pm-detach:{payment_method_id}"))
    }

    pub fn promotion_apply(subscription: &SubscriptionId, promotion_code_id: &str) -> Self {
        Self(format!("promo-apply:{subscription}:{promotion_code_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subscription state as the provider reports it right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// External price ID of the first item
    pub price_id: Option<String>,
    /// Subscription item ID (needed to swap prices)
    pub subscription_item_id: Option<String>,
    /// Unit amount of the first item's price, in minor units
    pub unit_amount: Option<i64>,
    /// Client secret of the latest invoice's payment intent, when expanded
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupIntentInfo {
    pub id: String,
    pub client_secret: String,
}

/// Outcome of attaching a payment method to a customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The provider already had it attached; treated as success.
    AlreadyAttached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentMethodInfo {
    pub id: String,
    #[serde(skip)]
    pub customer_id: Option<String>,
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

/// Invoice information
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceInfo {
    pub invoice_id: String,
    /// Provider invoice status (`paid`, `open`, `draft`, `uncollectible`, `void`)
    pub status: Option<String>,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub invoice_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponInfo {
    pub id: String,
    pub name: Option<String>,
    pub percent_off: Option<f64>,
    pub amount_off: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromotionCodeInfo {
    pub id: String,
    pub code: String,
    /// Set when the code is restricted to a single customer
    pub customer_id: Option<String>,
    pub coupon: CouponInfo,
}

// ============================================================================
// Billing Provider Port
// ============================================================================

/// Call surface over the external billing provider.
///
/// Every mutating method takes an [`IdempotencyKey`]. Lookups distinguish a
/// missing resource (`Ok(None)`) from an unreachable provider
/// (`Err(AppError::ProviderUnavailable)`).
#[async_trait]
pub trait BillingProvider: Send + Sync {
    // ========================================================================
    // Customers
    // ========================================================================

    /// Find a customer with this email whose metadata names this user.
    async fn find_customer(&self, email: &str, user_id: Uuid) -> AppResult<Option<CustomerId>>;

    async fn create_customer(
        &self,
        email: &str,
        user_id: Uuid,
        key: &IdempotencyKey,
    ) -> AppResult<CustomerId>;

    // ========================================================================
    // Payment methods
    // ========================================================================

    /// Off-session setup intent for collecting a card.
    async fn create_setup_intent(&self, customer: &CustomerId) -> AppResult<SetupIntentInfo>;

    async fn attach_payment_method(
        &self,
        customer: &CustomerId,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<AttachOutcome>;

    async fn set_default_payment_method(
        &self,
        customer: &CustomerId,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<()>;

    async fn list_payment_methods(&self, customer: &CustomerId) -> AppResult<Vec<PaymentMethodInfo>>;

    async fn detach_payment_method(
        &self,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<()>;

    // ========================================================================
    // Subscriptions
    // ========================================================================

    async fn create_subscription(
        &self,
        customer: &CustomerId,
        price_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo>;

    /// Returns `None` when the provider no longer knows the subscription.
    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionInfo>>;

    /// Clear a pending cancellation, optionally swapping the item's price.
    async fn resume_subscription(
        &self,
        subscription_id: &SubscriptionId,
        price_change: Option<(&str, &str)>,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo>;

    async fn cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo>;

    /// Cancel immediately. Used to clear out dead subscriptions.
    async fn cancel_now(&self, subscription_id: &SubscriptionId, key: &IdempotencyKey)
    -> AppResult<()>;

    // ========================================================================
    // Invoices & promotions
    // ========================================================================

    async fn list_invoices(&self, customer: &CustomerId, limit: u32) -> AppResult<Vec<InvoiceInfo>>;

    /// Active promotion codes matching `code`.
    async fn find_promotion_codes(&self, code: &str) -> AppResult<Vec<PromotionCodeInfo>>;

    async fn apply_promotion_code(
        &self,
        subscription_id: &SubscriptionId,
        promotion_code_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo>;
}

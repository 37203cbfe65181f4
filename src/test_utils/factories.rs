//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    application::ports::billing_provider::{CustomerId, SubscriptionId, SubscriptionInfo},
    domain::entities::{
        payment_profile::PaymentProfile,
        subscription::{SubscriptionRecord, SubscriptionStatus},
    },
};

/// Create a local subscription record with sensible defaults.
///
/// The provider subscription id is unique per call and `provider_synced_at`
/// is unset, so any event-driven write applies.
pub fn create_test_subscription(
    overrides: impl FnOnce(&mut SubscriptionRecord),
) -> SubscriptionRecord {
    let now = Utc::now();
    let mut record = SubscriptionRecord {
        user_id: Uuid::new_v4(),
        provider_customer_id: "cus_1".to_string(),
        provider_subscription_id: format!("sub_{}", Uuid::new_v4().simple()),
        status: SubscriptionStatus::Active,
        price_id: "price_monthly".to_string(),
        current_period_end: Some(now + Duration::days(30)),
        cancel_at_period_end: false,
        provider_synced_at: None,
        created_at: now,
        updated_at: now,
    };
    overrides(&mut record);
    record
}

/// Create a provider-side subscription snapshot with sensible defaults.
pub fn create_test_subscription_info(
    overrides: impl FnOnce(&mut SubscriptionInfo),
) -> SubscriptionInfo {
    let mut info = SubscriptionInfo {
        subscription_id: SubscriptionId::new("sub_1"),
        customer_id: CustomerId::new("cus_1"),
        status: SubscriptionStatus::Active,
        current_period_end: Some(Utc::now() + Duration::days(30)),
        cancel_at_period_end: false,
        price_id: Some("price_monthly".to_string()),
        subscription_item_id: Some("si_1".to_string()),
        unit_amount: Some(1000),
        client_secret: None,
    };
    overrides(&mut info);
    info
}

/// Create a payment profile without a customer or payment method.
pub fn create_test_payment_profile(
    overrides: impl FnOnce(&mut PaymentProfile),
) -> PaymentProfile {
    let now = Utc::now();
    let mut profile = PaymentProfile {
        user_id: Uuid::new_v4(),
        provider_customer_id: None,
        has_payment_method: false,
        created_at: now,
        updated_at: now,
    };
    overrides(&mut profile);
    profile
}

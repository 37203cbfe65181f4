//! Typed access to subscription records and payment profiles.
//!
//! Every write is a field-set scoped by an immutable key (`user_id` or the
//! provider subscription id). Writes that carry provider state are
//! additionally guarded by `provider_synced_at`, so a state older than the one
//! already stored is skipped instead of overwriting it.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    domain::entities::{
        payment_profile::{PaymentProfile, ProfileInsertOutcome},
        subscription::{SubscriptionRecord, SubscriptionStatus},
    },
};

/// Provider-reported fields written into an existing record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStateUpdate {
    pub status: SubscriptionStatus,
    /// Left untouched when `None`.
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Left untouched when `None`.
    pub price_id: Option<String>,
    /// Left untouched when `None`.
    pub customer_id: Option<String>,
}

/// Insert-or-update of a user's record.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpsert {
    pub user_id: Uuid,
    pub customer_id: String,
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Provider-side instant this state describes.
    pub as_of: DateTime<Utc>,
}

/// `as_of` for writes taken from a direct provider response.
///
/// Provider event times have whole-second precision. Truncating keeps an event
/// created in the same second as the write from being rejected as stale, so
/// equal instants fall back to arrival order.
pub fn direct_write_as_of(now: DateTime<Utc>) -> DateTime<Utc> {
    now.trunc_subsecs(0)
}

/// Result of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The stored state is newer than the one offered.
    Stale,
    NotFound,
}

// ============================================================================
// Repository Traits
// ============================================================================

#[async_trait]
pub trait SubscriptionRepo: Send + Sync {
    async fn get_by_user(&self, user_id: Uuid) -> AppResult<Option<SubscriptionRecord>>;

    async fn get_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<SubscriptionRecord>>;

    async fn list_all(&self) -> AppResult<Vec<SubscriptionRecord>>;

    /// Insert the user's record, or update it when the stored state is not newer.
    async fn upsert_for_user(&self, input: &SubscriptionUpsert) -> AppResult<WriteOutcome>;

    /// Set provider fields on the record holding `subscription_id`.
    async fn apply_provider_state(
        &self,
        subscription_id: &str,
        update: &ProviderStateUpdate,
        as_of: DateTime<Utc>,
    ) -> AppResult<WriteOutcome>;

    /// Set only the status on the record holding `subscription_id`.
    async fn set_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        as_of: DateTime<Utc>,
    ) -> AppResult<WriteOutcome>;

    async fn delete_by_user(&self, user_id: Uuid) -> AppResult<bool>;
}

#[async_trait]
pub trait PaymentProfileRepo: Send + Sync {
    async fn get_by_user(&self, user_id: Uuid) -> AppResult<Option<PaymentProfile>>;

    /// Create the profile with `customer_id`, or fill it into a profile that has none.
    /// Never overwrites an existing customer id.
    async fn insert(&self, user_id: Uuid, customer_id: &str) -> AppResult<ProfileInsertOutcome>;

    async fn set_has_payment_method(&self, user_id: Uuid, has_payment_method: bool)
    -> AppResult<()>;
}

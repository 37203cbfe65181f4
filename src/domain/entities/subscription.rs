use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Convert from a Stripe subscription status string.
    ///
    /// `unpaid` collapses into `past_due` (both mean collection is failing).
    /// Returns `None` for statuses this service does not track, such as `paused`.
    pub fn from_stripe(s: &str) -> Option<Self> {
        match s {
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" | "unpaid" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }

    /// Returns true if the status alone grants access.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    /// Statuses whose local record gets replaced when the user subscribes again.
    pub fn is_replaceable(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Incomplete
                | SubscriptionStatus::IncompleteExpired
                | SubscriptionStatus::Canceled
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local mirror of one user's provider subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRecord {
    pub user_id: Uuid,
    pub provider_customer_id: String,
    /// Empty string means the record is orphaned and will be purged by the sweep.
    pub provider_subscription_id: String,
    pub status: SubscriptionStatus,
    pub price_id: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Provider-side instant of the newest state written into this record.
    pub provider_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Whether the subscription grants access at `now`.
    ///
    /// A cancellation whose period has already ended is inactive even while the
    /// stored status still reads `active`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.status.is_active() {
            return false;
        }
        let period_over = self.current_period_end.is_some_and(|end| now > end);
        !(self.cancel_at_period_end && period_over)
    }

    pub fn is_orphaned(&self) -> bool {
        self.provider_subscription_id.trim().is_empty()
    }
}

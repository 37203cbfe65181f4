use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One user's billing identity at the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentProfile {
    pub user_id: Uuid,
    pub provider_customer_id: Option<String>,
    pub has_payment_method: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentProfile {
    pub fn customer_id(&self) -> Option<&str> {
        self.provider_customer_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// Result of an insert that must not overwrite an existing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileInsertOutcome {
    Inserted,
    Duplicate,
}

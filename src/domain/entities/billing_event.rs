//! Typed model of provider webhook events.
//!
//! The envelope is decoded on the request path; the kind-specific payload is
//! decoded once per job into [`EventPayload`] so handlers never touch raw JSON.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Verified, minimally decoded webhook event.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub event_id: String,
    pub event_type: String,
    /// Provider-reported creation instant, used for stale-event detection.
    pub created_at: DateTime<Utc>,
    /// The `data.object` member, left undecoded until a worker picks it up.
    pub object: serde_json::Value,
}

#[derive(Debug, Error)]
#[error("failed to decode {event_type} payload: {source}")]
pub struct DecodeError {
    pub event_type: String,
    #[source]
    pub source: serde_json::Error,
}

/// A provider field that is either a bare id or an expanded object with an id.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionPayload {
    pub id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub subscription: Option<Expandable>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPayload {
    pub id: String,
    #[serde(default)]
    pub customer: Option<Expandable>,
    pub status: String,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub items: Option<SubscriptionItems>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub price: Option<PriceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

impl SubscriptionPayload {
    /// Period end from the top level, or from the first item on newer API versions.
    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .or_else(|| {
                self.items
                    .as_ref()
                    .and_then(|items| items.data.first())
                    .and_then(|item| item.current_period_end)
            })
            .and_then(unix_to_utc)
    }

    pub fn price_id(&self) -> Option<&str> {
        self.items
            .as_ref()
            .and_then(|items| items.data.first())
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub subscription: Option<Expandable>,
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceParent {
    #[serde(default)]
    pub subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceSubscriptionDetails {
    #[serde(default)]
    pub subscription: Option<Expandable>,
}

impl InvoicePayload {
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_ref()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.subscription_details.as_ref())
                    .and_then(|d| d.subscription.as_ref())
            })
            .map(Expandable::id)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentPayload {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentErrorRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentErrorRef {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisputePayload {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub charge: Option<Expandable>,
}

/// Closed set of event kinds this engine reacts to.
#[derive(Debug, Clone)]
pub enum EventPayload {
    CheckoutCompleted(CheckoutSessionPayload),
    SubscriptionUpdated(SubscriptionPayload),
    SubscriptionDeleted(SubscriptionPayload),
    TrialWillEnd(SubscriptionPayload),
    InvoicePaid(InvoicePayload),
    InvoicePaymentFailed(InvoicePayload),
    InvoiceUpcoming(InvoicePayload),
    PaymentIntentSucceeded(PaymentIntentPayload),
    PaymentIntentFailed(PaymentIntentPayload),
    DisputeCreated(DisputePayload),
    Unhandled,
}

impl EventPayload {
    pub fn decode(envelope: &WebhookEnvelope) -> Result<Self, DecodeError> {
        let object = &envelope.object;
        let payload = match envelope.event_type.as_str() {
            "checkout.session.completed" => EventPayload::CheckoutCompleted(parse(envelope, object)?),
            "customer.subscription.updated" => {
                EventPayload::SubscriptionUpdated(parse(envelope, object)?)
            }
            "customer.subscription.deleted" => {
                EventPayload::SubscriptionDeleted(parse(envelope, object)?)
            }
            "customer.subscription.trial_will_end" => {
                EventPayload::TrialWillEnd(parse(envelope, object)?)
            }
            "invoice.paid" => EventPayload::InvoicePaid(parse(envelope, object)?),
            "invoice.payment_failed" => {
                EventPayload::InvoicePaymentFailed(parse(envelope, object)?)
            }
            "invoice.upcoming" => EventPayload::InvoiceUpcoming(parse(envelope, object)?),
            "payment_intent.succeeded" => {
                EventPayload::PaymentIntentSucceeded(parse(envelope, object)?)
            }
            "payment_intent.payment_failed" => {
                EventPayload::PaymentIntentFailed(parse(envelope, object)?)
            }
            "charge.dispute.created" => EventPayload::DisputeCreated(parse(envelope, object)?),
            _ => EventPayload::Unhandled,
        };
        Ok(payload)
    }
}

fn parse<T: serde::de::DeserializeOwned>(
    envelope: &WebhookEnvelope,
    object: &serde_json::Value,
) -> Result<T, DecodeError> {
    T::deserialize(object).map_err(|source| DecodeError {
        event_type: envelope.event_type.clone(),
        source,
    })
}

pub fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

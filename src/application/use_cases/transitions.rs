//! Per-event-kind state transitions applied by the webhook workers.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        masking::mask_id,
        ports::billing_provider::{BillingProvider, SubscriptionId},
        use_cases::subscription_store::{
            ProviderStateUpdate, SubscriptionRepo, SubscriptionUpsert, WriteOutcome,
        },
    },
    domain::entities::{
        billing_event::{
            CheckoutSessionPayload, DisputePayload, EventPayload, InvoicePayload,
            PaymentIntentPayload, SubscriptionPayload, WebhookEnvelope, unix_to_utc,
        },
        subscription::SubscriptionStatus,
    },
};

/// Consistency problems detected while handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    PaidInvoiceOnCancelingSubscription,
    UpcomingInvoiceOnCancelingSubscription,
}

impl Anomaly {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anomaly::PaidInvoiceOnCancelingSubscription => "paid_invoice_on_canceling_subscription",
            Anomaly::UpcomingInvoiceOnCancelingSubscription => {
                "upcoming_invoice_on_canceling_subscription"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// A newer provider state was already stored.
    Stale,
    NoMatchingRecord,
    /// Logged only; no state change by design.
    Ignored,
    Anomaly(Anomaly),
}

impl From<WriteOutcome> for TransitionOutcome {
    fn from(outcome: WriteOutcome) -> Self {
        match outcome {
            WriteOutcome::Applied => TransitionOutcome::Applied,
            WriteOutcome::Stale => TransitionOutcome::Stale,
            WriteOutcome::NotFound => TransitionOutcome::NoMatchingRecord,
        }
    }
}

#[derive(Clone)]
pub struct TransitionHandlers {
    subscriptions: Arc<dyn SubscriptionRepo>,
    provider: Arc<dyn BillingProvider>,
}

impl TransitionHandlers {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepo>, provider: Arc<dyn BillingProvider>) -> Self {
        Self {
            subscriptions,
            provider,
        }
    }

    /// Decode the event's payload and apply its transition.
    ///
    /// A decode failure only aborts this event; the ledger entry stays.
    pub async fn handle(&self, envelope: &WebhookEnvelope) -> AppResult<TransitionOutcome> {
        let payload = EventPayload::decode(envelope).map_err(|e| {
            error!(
                event_id = %envelope.event_id,
                event_type = %envelope.event_type,
                error = %e,
                "Failed to decode webhook payload"
            );
            AppError::DecodeFailure(e.to_string())
        })?;

        let outcome = match payload {
            EventPayload::CheckoutCompleted(session) => {
                self.checkout_completed(envelope, session).await?
            }
            EventPayload::SubscriptionUpdated(sub) => self.subscription_updated(envelope, sub).await?,
            EventPayload::SubscriptionDeleted(sub) => self.subscription_deleted(envelope, sub).await?,
            EventPayload::TrialWillEnd(sub) => trial_will_end(&sub),
            EventPayload::InvoicePaid(invoice) => self.invoice_paid(invoice).await?,
            EventPayload::InvoicePaymentFailed(invoice) => {
                self.invoice_payment_failed(envelope, invoice).await?
            }
            EventPayload::InvoiceUpcoming(invoice) => self.invoice_upcoming(invoice).await?,
            EventPayload::PaymentIntentSucceeded(intent) => payment_intent_succeeded(&intent),
            EventPayload::PaymentIntentFailed(intent) => payment_intent_failed(&intent),
            EventPayload::DisputeCreated(dispute) => dispute_created(&dispute),
            EventPayload::Unhandled => {
                info!(event_type = %envelope.event_type, "Unhandled event type");
                TransitionOutcome::Ignored
            }
        };

        if outcome == TransitionOutcome::Stale {
            info!(
                event_id = %envelope.event_id,
                event_type = %envelope.event_type,
                outcome = "stale",
                "Skipped event older than stored subscription state"
            );
        }
        Ok(outcome)
    }

    async fn checkout_completed(
        &self,
        envelope: &WebhookEnvelope,
        session: CheckoutSessionPayload,
    ) -> AppResult<TransitionOutcome> {
        if session.mode.as_deref() != Some("subscription") {
            return Ok(TransitionOutcome::Ignored);
        }
        let Some(subscription) = session.subscription.as_ref() else {
            return Ok(TransitionOutcome::Ignored);
        };

        let user_id = session
            .client_reference_id
            .as_deref()
            .and_then(|r| Uuid::parse_str(r).ok())
            .ok_or_else(|| {
                AppError::DecodeFailure(format!(
                    "checkout session {} has no valid client_reference_id",
                    session.id
                ))
            })?;
        let customer_id = session
            .customer
            .as_ref()
            .map(|c| c.id().to_string())
            .ok_or_else(|| {
                AppError::DecodeFailure(format!("checkout session {} has no customer", session.id))
            })?;

        let subscription_id = SubscriptionId::new(subscription.id());
        let (current_period_end, price_id) = match self.provider.get_subscription(&subscription_id).await {
            Ok(Some(info)) => (info.current_period_end, info.price_id),
            Ok(None) => {
                warn!(
                    subscription = %mask_id(subscription_id.as_str()),
                    "Checkout subscription not found at provider"
                );
                (None, None)
            }
            Err(e) => {
                warn!(
                    subscription = %mask_id(subscription_id.as_str()),
                    error = %e,
                    "Could not fetch period end for checkout subscription"
                );
                (None, None)
            }
        };

        let outcome = self
            .subscriptions
            .upsert_for_user(&SubscriptionUpsert {
                user_id,
                customer_id,
                subscription_id: subscription_id.0.clone(),
                status: SubscriptionStatus::Active,
                price_id,
                current_period_end,
                cancel_at_period_end: false,
                as_of: envelope.created_at,
            })
            .await?;

        info!(
            %user_id,
            subscription = %mask_id(subscription_id.as_str()),
            ?outcome,
            "Checkout completed"
        );
        Ok(outcome.into())
    }

    async fn subscription_updated(
        &self,
        envelope: &WebhookEnvelope,
        sub: SubscriptionPayload,
    ) -> AppResult<TransitionOutcome> {
        let status = SubscriptionStatus::from_stripe(&sub.status).ok_or_else(|| {
            AppError::DecodeFailure(format!("unsupported subscription status {}", sub.status))
        })?;

        let update = ProviderStateUpdate {
            status,
            current_period_end: sub.period_end(),
            cancel_at_period_end: sub.cancel_at_period_end,
            price_id: sub.price_id().map(str::to_string),
            customer_id: None,
        };
        let outcome = self
            .subscriptions
            .apply_provider_state(&sub.id, &update, envelope.created_at)
            .await?;

        info!(
            subscription = %mask_id(&sub.id),
            status = %status,
            cancel_at_period_end = sub.cancel_at_period_end,
            ?outcome,
            "Subscription updated"
        );
        Ok(outcome.into())
    }

    async fn subscription_deleted(
        &self,
        envelope: &WebhookEnvelope,
        sub: SubscriptionPayload,
    ) -> AppResult<TransitionOutcome> {
        let update = ProviderStateUpdate {
            status: SubscriptionStatus::Canceled,
            current_period_end: sub.period_end(),
            cancel_at_period_end: true,
            price_id: None,
            customer_id: None,
        };
        let outcome = self
            .subscriptions
            .apply_provider_state(&sub.id, &update, envelope.created_at)
            .await?;

        info!(subscription = %mask_id(&sub.id), ?outcome, "Subscription deleted");
        Ok(outcome.into())
    }

    async fn invoice_paid(&self, invoice: InvoicePayload) -> AppResult<TransitionOutcome> {
        let Some(subscription_id) = invoice.subscription_id() else {
            return Ok(TransitionOutcome::Ignored);
        };
        let Some(record) = self.subscriptions.get_by_subscription_id(subscription_id).await? else {
            return Ok(TransitionOutcome::NoMatchingRecord);
        };

        if record.cancel_at_period_end {
            let anomaly = Anomaly::PaidInvoiceOnCancelingSubscription;
            error!(
                anomaly = anomaly.as_str(),
                severity = "high",
                invoice = ?invoice.id,
                subscription = %mask_id(subscription_id),
                user_id = %record.user_id,
                amount_paid = invoice.amount_paid,
                "Invoice paid for a subscription marked to cancel at period end"
            );
            return Ok(TransitionOutcome::Anomaly(anomaly));
        }

        info!(
            invoice = ?invoice.id,
            subscription = %mask_id(subscription_id),
            amount_paid = invoice.amount_paid,
            "Invoice paid"
        );
        Ok(TransitionOutcome::Ignored)
    }

    async fn invoice_payment_failed(
        &self,
        envelope: &WebhookEnvelope,
        invoice: InvoicePayload,
    ) -> AppResult<TransitionOutcome> {
        let Some(subscription_id) = invoice.subscription_id() else {
            return Ok(TransitionOutcome::Ignored);
        };
        let outcome = self
            .subscriptions
            .set_status(subscription_id, SubscriptionStatus::PastDue, envelope.created_at)
            .await?;

        warn!(
            invoice = ?invoice.id,
            subscription = %mask_id(subscription_id),
            amount_due = invoice.amount_due,
            ?outcome,
            "Invoice payment failed"
        );
        Ok(outcome.into())
    }

    async fn invoice_upcoming(&self, invoice: InvoicePayload) -> AppResult<TransitionOutcome> {
        let Some(subscription_id) = invoice.subscription_id() else {
            return Ok(TransitionOutcome::Ignored);
        };
        let Some(record) = self.subscriptions.get_by_subscription_id(subscription_id).await? else {
            return Ok(TransitionOutcome::NoMatchingRecord);
        };

        if record.cancel_at_period_end {
            let anomaly = Anomaly::UpcomingInvoiceOnCancelingSubscription;
            error!(
                anomaly = anomaly.as_str(),
                severity = "critical",
                subscription = %mask_id(subscription_id),
                user_id = %record.user_id,
                amount_due = invoice.amount_due,
                "Upcoming invoice for a subscription marked to cancel at period end"
            );
            return Ok(TransitionOutcome::Anomaly(anomaly));
        }

        info!(
            subscription = %mask_id(subscription_id),
            amount_due = invoice.amount_due,
            "Upcoming invoice"
        );
        Ok(TransitionOutcome::Ignored)
    }
}

fn trial_will_end(sub: &SubscriptionPayload) -> TransitionOutcome {
    info!(
        subscription = %mask_id(&sub.id),
        trial_end = ?sub.trial_end.and_then(unix_to_utc),
        "Trial ending soon"
    );
    TransitionOutcome::Ignored
}

fn payment_intent_succeeded(intent: &PaymentIntentPayload) -> TransitionOutcome {
    info!(
        payment_intent = %mask_id(&intent.id),
        amount = intent.amount,
        currency = ?intent.currency,
        "Payment succeeded"
    );
    TransitionOutcome::Ignored
}

fn payment_intent_failed(intent: &PaymentIntentPayload) -> TransitionOutcome {
    let (code, message) = intent
        .last_payment_error
        .as_ref()
        .map(|e| (e.code.clone(), e.message.clone()))
        .unwrap_or_default();
    warn!(
        payment_intent = %mask_id(&intent.id),
        customer = ?intent.customer.as_ref().map(|c| mask_id(c.id())),
        amount = intent.amount,
        error_code = ?code,
        error_message = ?message,
        "Payment failed"
    );
    TransitionOutcome::Ignored
}

fn dispute_created(dispute: &DisputePayload) -> TransitionOutcome {
    error!(
        alert = "dispute_created",
        dispute = %mask_id(&dispute.id),
        charge = ?dispute.charge.as_ref().map(|c| mask_id(c.id())),
        amount = dispute.amount,
        reason = ?dispute.reason,
        "Charge dispute created"
    );
    TransitionOutcome::Ignored
}

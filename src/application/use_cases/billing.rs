//! User-initiated billing operations.
//!
//! Every provider mutation goes out with a deterministic idempotency key, so
//! a retry after a timeout replays the original result instead of creating a
//! second resource.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        masking::mask_id,
        ports::billing_provider::{
            AttachOutcome, BillingProvider, CouponInfo, CustomerId, IdempotencyKey, InvoiceInfo,
            PaymentMethodInfo, SetupIntentInfo, SubscriptionId, SubscriptionInfo,
        },
        use_cases::{
            reconciliation::SubscriptionSummary,
            subscription_store::{
                PaymentProfileRepo, ProviderStateUpdate, SubscriptionRepo, SubscriptionUpsert,
                direct_write_as_of,
            },
        },
    },
    domain::entities::{
        payment_profile::{PaymentProfile, ProfileInsertOutcome},
        subscription::{SubscriptionRecord, SubscriptionStatus},
    },
};

const INVOICE_HISTORY_LIMIT: u32 = 100;

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionChange {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    /// Present when the first invoice still needs client-side confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// True when an existing subscription was resumed instead of created.
    pub resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentHistoryEntry {
    pub id: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub invoice_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionSubscriptionState {
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionApplied {
    pub coupon: CouponInfo,
    pub subscription: PromotionSubscriptionState,
}

// ============================================================================
// Use cases
// ============================================================================

#[derive(Clone)]
pub struct BillingUseCases {
    subscriptions: Arc<dyn SubscriptionRepo>,
    payments: Arc<dyn PaymentProfileRepo>,
    provider: Arc<dyn BillingProvider>,
    allowed_price_ids: Vec<String>,
}

impl BillingUseCases {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepo>,
        payments: Arc<dyn PaymentProfileRepo>,
        provider: Arc<dyn BillingProvider>,
        allowed_price_ids: Vec<String>,
    ) -> Self {
        Self {
            subscriptions,
            payments,
            provider,
            allowed_price_ids,
        }
    }

    /// Resolve the caller's provider customer, creating it at most once.
    #[instrument(skip(self, email))]
    pub async fn create_customer(&self, user_id: Uuid, email: &str) -> AppResult<CustomerId> {
        if !email.validate_email() {
            return Err(AppError::InvalidInput("A valid email address is required".into()));
        }

        if let Some(existing) = self
            .payments
            .get_by_user(user_id)
            .await?
            .as_ref()
            .and_then(PaymentProfile::customer_id)
        {
            return Ok(CustomerId::new(existing));
        }

        let customer = match self.provider.find_customer(email, user_id).await? {
            Some(found) => {
                info!(customer = %mask_id(found.as_str()), "Reusing existing provider customer");
                found
            }
            None => {
                let key = IdempotencyKey::customer_create(user_id);
                self.provider.create_customer(email, user_id, &key).await?
            }
        };

        match self.payments.insert(user_id, customer.as_str()).await? {
            ProfileInsertOutcome::Inserted => {
                info!(customer = %mask_id(customer.as_str()), "Payment profile created");
                Ok(customer)
            }
            ProfileInsertOutcome::Duplicate => {
                let stored = self
                    .payments
                    .get_by_user(user_id)
                    .await?
                    .and_then(|p| p.provider_customer_id);
                match stored {
                    Some(stored) if stored == customer.as_str() => Ok(customer),
                    stored => {
                        error!(
                            %user_id,
                            resolved = %mask_id(customer.as_str()),
                            stored = ?stored.as_deref().map(mask_id),
                            review = "manual",
                            "Concurrent customer creation resolved to a different customer id"
                        );
                        Err(AppError::DataInconsistency(
                            "payment profile already holds a different customer".into(),
                        ))
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn create_setup_intent(&self, user_id: Uuid) -> AppResult<SetupIntentInfo> {
        let customer = self.require_customer(user_id).await?;
        self.provider.create_setup_intent(&customer).await
    }

    /// Attach a collected payment method and make it the invoice default.
    #[instrument(skip(self))]
    pub async fn confirm_setup(&self, user_id: Uuid, payment_method_id: &str) -> AppResult<()> {
        let payment_method_id = payment_method_id.trim();
        if payment_method_id.is_empty() {
            return Err(AppError::InvalidInput("payment_method_id is required".into()));
        }
        let customer = self.require_customer(user_id).await?;

        let attach_key = IdempotencyKey::payment_method_attach(&customer, payment_method_id);
        if self
            .provider
            .attach_payment_method(&customer, payment_method_id, &attach_key)
            .await?
            == AttachOutcome::AlreadyAttached
        {
            warn!(
                payment_method = %mask_id(payment_method_id),
                "Payment method was already attached, continuing"
            );
        }

        let default_key = IdempotencyKey::default_payment_method(&customer, payment_method_id);
        self.provider
            .set_default_payment_method(&customer, payment_method_id, &default_key)
            .await?;
        self.payments.set_has_payment_method(user_id, true).await?;

        info!(payment_method = %mask_id(payment_method_id), "Payment method confirmed");
        Ok(())
    }

    /// Create, resume or upgrade the caller's subscription.
    #[instrument(skip(self))]
    pub async fn create_subscription(
        &self,
        user_id: Uuid,
        price_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionChange> {
        if !self.allowed_price_ids.iter().any(|allowed| allowed == price_id) {
            return Err(AppError::InvalidInput("This plan is not available".into()));
        }
        let profile = self.payments.get_by_user(user_id).await?.ok_or(AppError::NotFound)?;
        let customer = profile
            .customer_id()
            .map(CustomerId::new)
            .ok_or(AppError::NotFound)?;

        // A dead record stays until its replacement exists, so a retry after a
        // failed create still builds the same key.
        let mut replaces = None;
        if let Some(existing) = self.subscriptions.get_by_user(user_id).await? {
            if existing.is_orphaned() {
                self.subscriptions.delete_by_user(user_id).await?;
                info!(%user_id, "Removed subscription record without provider id");
            } else if existing.status.is_active() {
                if existing.cancel_at_period_end {
                    return self.resume(existing, price_id, now).await;
                }
                return Err(AppError::SubscriptionAlreadyActive);
            } else if existing.status.is_replaceable() {
                self.cancel_dead_subscription(&existing).await;
                replaces = Some(existing);
            } else {
                return Err(AppError::InvalidInput(
                    "The current subscription is past due; update the payment method instead".into(),
                ));
            }
        }

        if !profile.has_payment_method {
            return Err(AppError::PaymentMethodRequired);
        }

        let replaced_id = replaces
            .as_ref()
            .map(|dead| SubscriptionId::new(dead.provider_subscription_id.clone()));
        let key = IdempotencyKey::subscription_create(
            user_id,
            &customer,
            price_id,
            replaced_id.as_ref(),
            profile.updated_at,
        );
        let info = self
            .provider
            .create_subscription(&customer, price_id, &key)
            .await?;

        if let Some(dead) = &replaces {
            self.subscriptions.delete_by_user(user_id).await?;
            info!(
                subscription = %mask_id(&dead.provider_subscription_id),
                status = %dead.status,
                "Replaced dead subscription record"
            );
        }

        let outcome = self
            .subscriptions
            .upsert_for_user(&SubscriptionUpsert {
                user_id,
                customer_id: customer.0.clone(),
                subscription_id: info.subscription_id.0.clone(),
                status: info.status,
                price_id: Some(price_id.to_string()),
                current_period_end: info.current_period_end,
                cancel_at_period_end: info.cancel_at_period_end,
                as_of: direct_write_as_of(now),
            })
            .await?;

        info!(
            subscription = %mask_id(info.subscription_id.as_str()),
            status = %info.status,
            ?outcome,
            "Subscription created"
        );
        Ok(SubscriptionChange {
            subscription_id: info.subscription_id.0,
            status: info.status,
            client_secret: info.client_secret,
            current_period_end: info.current_period_end,
            cancel_at_period_end: info.cancel_at_period_end,
            resumed: false,
        })
    }

    async fn resume(
        &self,
        existing: SubscriptionRecord,
        price_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionChange> {
        let subscription_id = SubscriptionId::new(existing.provider_subscription_id.clone());

        let item_id = if existing.price_id != price_id {
            let current = self
                .provider
                .get_subscription(&subscription_id)
                .await?
                .ok_or(AppError::NotFound)?;
            let item_id = current.subscription_item_id.ok_or_else(|| {
                AppError::Internal("subscription has no item to change the price on".into())
            })?;
            Some(item_id)
        } else {
            None
        };
        let price_change = item_id.as_deref().map(|item| (item, price_id));

        let key =
            IdempotencyKey::subscription_resume(&subscription_id, price_id, existing.updated_at);
        let info = self
            .provider
            .resume_subscription(&subscription_id, price_change, &key)
            .await?;

        self.persist_provider_state(&info, Some(price_id), now).await;

        info!(
            subscription = %mask_id(subscription_id.as_str()),
            price_changed = price_change.is_some(),
            "Subscription resumed"
        );
        Ok(SubscriptionChange {
            subscription_id: info.subscription_id.0,
            status: info.status,
            client_secret: None,
            current_period_end: info.current_period_end,
            cancel_at_period_end: info.cancel_at_period_end,
            resumed: true,
        })
    }

    /// Best effort: the record is replaced whether or not the provider agrees.
    async fn cancel_dead_subscription(&self, existing: &SubscriptionRecord) {
        let subscription_id = SubscriptionId::new(existing.provider_subscription_id.clone());
        let key = IdempotencyKey::subscription_cancel_now(&subscription_id);
        if let Err(e) = self.provider.cancel_now(&subscription_id, &key).await {
            warn!(
                subscription = %mask_id(subscription_id.as_str()),
                error = %e,
                "Failed to cancel dead subscription at provider"
            );
        }
    }

    /// Cancel at period end, confirmed against the provider.
    #[instrument(skip(self))]
    pub async fn cancel_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionSummary> {
        let record = self
            .subscriptions
            .get_by_user(user_id)
            .await?
            .filter(|r| !r.is_orphaned())
            .ok_or(AppError::NotFound)?;
        let subscription_id = SubscriptionId::new(record.provider_subscription_id.clone());

        let key = IdempotencyKey::subscription_cancel(&subscription_id, record.updated_at);
        let mut info = self
            .provider
            .cancel_at_period_end(&subscription_id, &key)
            .await?;

        if !info.cancel_at_period_end {
            warn!(
                subscription = %mask_id(subscription_id.as_str()),
                "Cancellation not reflected in provider response, re-fetching"
            );
            info = match self.provider.get_subscription(&subscription_id).await? {
                Some(fresh) if fresh.cancel_at_period_end => fresh,
                _ => {
                    error!(
                        subscription = %mask_id(subscription_id.as_str()),
                        "Provider did not confirm cancellation"
                    );
                    return Err(AppError::CancellationNotConfirmed);
                }
            };
        }

        self.persist_provider_state(&info, None, now).await;

        info!(
            subscription = %mask_id(subscription_id.as_str()),
            period_end = ?info.current_period_end,
            "Subscription set to cancel at period end"
        );
        Ok(SubscriptionSummary {
            id: info.subscription_id.0,
            status: info.status,
            price_id: info.price_id.unwrap_or(record.price_id),
            current_period_end: info.current_period_end,
            cancel_at_period_end: info.cancel_at_period_end,
        })
    }

    /// Invoice-derived history, newest first, with the next scheduled charge.
    #[instrument(skip(self))]
    pub async fn payment_history(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<PaymentHistoryEntry>> {
        let Some(customer) = self
            .payments
            .get_by_user(user_id)
            .await?
            .as_ref()
            .and_then(PaymentProfile::customer_id)
            .map(CustomerId::new)
        else {
            return Ok(Vec::new());
        };

        let invoices = self
            .provider
            .list_invoices(&customer, INVOICE_HISTORY_LIMIT)
            .await?;
        let mut entries: Vec<PaymentHistoryEntry> = invoices
            .into_iter()
            .map(|invoice| history_entry(invoice, now))
            .collect();

        if let Some(upcoming) = self.upcoming_charge(user_id, now).await? {
            entries.push(upcoming);
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn upcoming_charge(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PaymentHistoryEntry>> {
        let Some(record) = self.subscriptions.get_by_user(user_id).await? else {
            return Ok(None);
        };
        if !record.status.is_active() || record.cancel_at_period_end || record.is_orphaned() {
            return Ok(None);
        }

        let subscription_id = SubscriptionId::new(record.provider_subscription_id.clone());
        let info = match self.provider.get_subscription(&subscription_id).await {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(
                    subscription = %mask_id(subscription_id.as_str()),
                    error = %e,
                    "Could not confirm upcoming charge"
                );
                return Ok(None);
            }
        };
        if !info.status.is_active() || info.cancel_at_period_end {
            return Ok(None);
        }

        Ok(Some(PaymentHistoryEntry {
            id: format!("upcoming_{}", info.subscription_id),
            amount: info.unit_amount.unwrap_or(0),
            currency: None,
            status: "upcoming".into(),
            created_at: info.current_period_end.unwrap_or(now),
            description: Some("Next scheduled charge".into()),
            invoice_number: None,
        }))
    }

    #[instrument(skip(self))]
    pub async fn list_payment_methods(&self, user_id: Uuid) -> AppResult<Vec<PaymentMethodInfo>> {
        let Some(customer) = self
            .payments
            .get_by_user(user_id)
            .await?
            .as_ref()
            .and_then(PaymentProfile::customer_id)
            .map(CustomerId::new)
        else {
            return Ok(Vec::new());
        };
        self.provider.list_payment_methods(&customer).await
    }

    /// Detach one of the caller's own payment methods.
    #[instrument(skip(self))]
    pub async fn delete_payment_method(
        &self,
        user_id: Uuid,
        payment_method_id: &str,
    ) -> AppResult<()> {
        let customer = self.require_customer(user_id).await?;

        let owned = self.provider.list_payment_methods(&customer).await?;
        if !owned.iter().any(|pm| pm.id == payment_method_id) {
            return Err(AppError::NotFound);
        }

        let key = IdempotencyKey::payment_method_detach(payment_method_id);
        self.provider
            .detach_payment_method(payment_method_id, &key)
            .await?;

        let remaining = self.provider.list_payment_methods(&customer).await?;
        if remaining.is_empty() {
            self.payments.set_has_payment_method(user_id, false).await?;
        }

        info!(
            payment_method = %mask_id(payment_method_id),
            remaining = remaining.len(),
            "Payment method detached"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn apply_promotion_code(
        &self,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<PromotionApplied> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::InvalidInput("A promotion code is required".into()));
        }

        let record = self
            .subscriptions
            .get_by_user(user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !record.status.is_active() || record.is_orphaned() {
            return Err(AppError::InvalidInput("No active subscription".into()));
        }

        let promotion = self
            .provider
            .find_promotion_codes(code)
            .await?
            .into_iter()
            .find(|promo| {
                promo
                    .customer_id
                    .as_deref()
                    .is_none_or(|restricted| restricted == record.provider_customer_id)
            })
            .ok_or_else(|| AppError::InvalidInput("Invalid promotion code".into()))?;

        let subscription_id = SubscriptionId::new(record.provider_subscription_id.clone());
        let key = IdempotencyKey::promotion_apply(&subscription_id, &promotion.id);
        let info = self
            .provider
            .apply_promotion_code(&subscription_id, &promotion.id, &key)
            .await
            .map_err(promotion_error)?;

        self.persist_provider_state(&info, None, now).await;

        info!(
            subscription = %mask_id(subscription_id.as_str()),
            coupon = %promotion.coupon.id,
            "Promotion code applied"
        );
        Ok(PromotionApplied {
            coupon: promotion.coupon,
            subscription: PromotionSubscriptionState {
                status: info.status,
                current_period_end: info.current_period_end,
            },
        })
    }

    async fn require_customer(&self, user_id: Uuid) -> AppResult<CustomerId> {
        self.payments
            .get_by_user(user_id)
            .await?
            .as_ref()
            .and_then(PaymentProfile::customer_id)
            .map(CustomerId::new)
            .ok_or(AppError::NotFound)
    }

    /// Write a provider response into the record. The provider already holds
    /// the truth, so a store failure is logged and left to reconciliation.
    async fn persist_provider_state(
        &self,
        info: &SubscriptionInfo,
        price_id: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let update = ProviderStateUpdate {
            status: info.status,
            current_period_end: info.current_period_end,
            cancel_at_period_end: info.cancel_at_period_end,
            price_id: price_id.map(str::to_string).or_else(|| info.price_id.clone()),
            customer_id: None,
        };
        if let Err(e) = self
            .subscriptions
            .apply_provider_state(
                info.subscription_id.as_str(),
                &update,
                direct_write_as_of(now),
            )
            .await
        {
            error!(
                subscription = %mask_id(info.subscription_id.as_str()),
                error = %e,
                "Failed to persist provider state; reconciliation will repair it"
            );
        }
    }
}

fn history_entry(invoice: InvoiceInfo, now: DateTime<Utc>) -> PaymentHistoryEntry {
    let status = match invoice.status.as_deref() {
        Some("paid") => "success".to_string(),
        Some("open") => "pending".to_string(),
        Some("draft") => "draft".to_string(),
        Some("uncollectible") => "failed".to_string(),
        Some("void") => "voided".to_string(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    };
    let amount = if invoice.amount_paid == 0 {
        invoice.amount_due
    } else {
        invoice.amount_paid
    };
    PaymentHistoryEntry {
        id: invoice.invoice_id,
        amount,
        currency: invoice.currency,
        status,
        created_at: invoice.created_at.unwrap_or(now),
        description: invoice.description,
        invoice_number: invoice.invoice_number,
    }
}

fn promotion_error(err: AppError) -> AppError {
    let AppError::ProviderRejected { code, message } = &err else {
        return err;
    };
    if code == "coupon_expired" {
        AppError::InvalidInput("This coupon has expired".into())
    } else if code == "resource_already_exists" {
        AppError::InvalidInput("This coupon has already been used".into())
    } else if message.contains("prior transactions") {
        AppError::InvalidInput("This coupon is limited to first-time customers".into())
    } else {
        err
    }
}

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        masking::mask_id,
        ports::billing_provider::{
            AttachOutcome, BillingProvider, CouponInfo, CustomerId, IdempotencyKey, InvoiceInfo,
            PaymentMethodInfo, PromotionCodeInfo, SetupIntentInfo, SubscriptionId,
            SubscriptionInfo,
        },
    },
    domain::entities::subscription::SubscriptionStatus,
    infra::stripe_client::{
        StripeClient, StripeExpandable, StripeInvoice, StripePaymentMethod, StripePromotionCode,
        StripeSubscription,
    },
};

/// Adapter that wraps StripeClient to implement BillingProvider.
#[derive(Clone)]
pub struct StripeBillingAdapter {
    client: StripeClient,
}

impl StripeBillingAdapter {
    pub fn new(client: StripeClient) -> Self {
        Self { client }
    }

    fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(ts, 0).single()
    }

    fn to_subscription_info(sub: StripeSubscription) -> AppResult<SubscriptionInfo> {
        let status = SubscriptionStatus::from_stripe(&sub.status).ok_or_else(|| {
            AppError::DecodeFailure(format!("unsupported subscription status {}", sub.status))
        })?;
        let first_item = sub.items.data.first();
        let period_end = sub
            .current_period_end
            .or_else(|| first_item.and_then(|item| item.current_period_end))
            .and_then(Self::timestamp_to_datetime);
        let client_secret = sub
            .latest_invoice
            .as_ref()
            .and_then(StripeExpandable::object)
            .and_then(|invoice| invoice.payment_intent.as_ref())
            .and_then(StripeExpandable::object)
            .and_then(|intent| intent.client_secret.clone());

        Ok(SubscriptionInfo {
            subscription_id: SubscriptionId::new(sub.id),
            customer_id: CustomerId::new(sub.customer),
            status,
            current_period_end: period_end,
            cancel_at_period_end: sub.cancel_at_period_end,
            price_id: first_item.map(|item| item.price.id.clone()),
            subscription_item_id: first_item.map(|item| item.id.clone()),
            unit_amount: first_item.and_then(|item| item.price.unit_amount),
            client_secret,
        })
    }

    fn to_payment_method(pm: StripePaymentMethod) -> Option<PaymentMethodInfo> {
        let card = pm.card?;
        Some(PaymentMethodInfo {
            id: pm.id,
            customer_id: pm.customer,
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        })
    }

    fn to_invoice(invoice: StripeInvoice) -> InvoiceInfo {
        InvoiceInfo {
            invoice_id: invoice.id,
            status: invoice.status,
            amount_due: invoice.amount_due,
            amount_paid: invoice.amount_paid,
            currency: invoice.currency,
            description: invoice.description,
            invoice_number: invoice.number,
            created_at: Self::timestamp_to_datetime(invoice.created),
        }
    }

    fn to_promotion_code(promo: StripePromotionCode) -> PromotionCodeInfo {
        PromotionCodeInfo {
            id: promo.id,
            code: promo.code,
            customer_id: promo.customer,
            coupon: CouponInfo {
                id: promo.coupon.id,
                name: promo.coupon.name,
                percent_off: promo.coupon.percent_off,
                amount_off: promo.coupon.amount_off,
            },
        }
    }
}

fn is_already_attached(err: &AppError) -> bool {
    match err {
        AppError::ProviderRejected { code, message } => {
            code == "resource_already_exists"
                || message.contains("already attached")
                || message.contains("already been attached")
                || message.contains("already exists")
        }
        _ => false,
    }
}

#[async_trait]
impl BillingProvider for StripeBillingAdapter {
    // ========================================================================
    // Customers
    // ========================================================================

    async fn find_customer(&self, email: &str, user_id: Uuid) -> AppResult<Option<CustomerId>> {
        let user_id = user_id.to_string();
        let customers = self.client.list_customers_by_email(email).await?;
        Ok(customers
            .into_iter()
            .find(|c| c.metadata.get("user_id") == Some(&user_id))
            .map(|c| CustomerId::new(c.id)))
    }

    async fn create_customer(
        &self,
        email: &str,
        user_id: Uuid,
        key: &IdempotencyKey,
    ) -> AppResult<CustomerId> {
        let customer = self
            .client
            .create_customer(email, &[("user_id", user_id.to_string())], key)
            .await?;
        Ok(CustomerId::new(customer.id))
    }

    // ========================================================================
    // Payment methods
    // ========================================================================

    async fn create_setup_intent(&self, customer: &CustomerId) -> AppResult<SetupIntentInfo> {
        let intent = self.client.create_setup_intent(customer.as_str()).await?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| AppError::Internal("setup intent has no client secret".into()))?;
        Ok(SetupIntentInfo {
            id: intent.id,
            client_secret,
        })
    }

    async fn attach_payment_method(
        &self,
        customer: &CustomerId,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<AttachOutcome> {
        match self
            .client
            .attach_payment_method(payment_method_id, customer.as_str(), key)
            .await
        {
            Ok(_) => Ok(AttachOutcome::Attached),
            Err(e) if is_already_attached(&e) => {
                warn!(
                    payment_method = %mask_id(payment_method_id),
                    customer = %mask_id(customer.as_str()),
                    "Payment method already attached"
                );
                Ok(AttachOutcome::AlreadyAttached)
            }
            Err(e) => Err(e),
        }
    }

    async fn set_default_payment_method(
        &self,
        customer: &CustomerId,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<()> {
        self.client
            .set_default_payment_method(customer.as_str(), payment_method_id, key)
            .await?;
        Ok(())
    }

    async fn list_payment_methods(&self, customer: &CustomerId) -> AppResult<Vec<PaymentMethodInfo>> {
        let methods = self.client.list_card_payment_methods(customer.as_str()).await?;
        Ok(methods.into_iter().filter_map(Self::to_payment_method).collect())
    }

    async fn detach_payment_method(
        &self,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<()> {
        self.client.detach_payment_method(payment_method_id, key).await?;
        Ok(())
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    async fn create_subscription(
        &self,
        customer: &CustomerId,
        price_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo> {
        let sub = self
            .client
            .create_subscription(customer.as_str(), price_id, key)
            .await?;
        Self::to_subscription_info(sub)
    }

    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionInfo>> {
        self.client
            .get_subscription(subscription_id.as_str())
            .await?
            .map(Self::to_subscription_info)
            .transpose()
    }

    async fn resume_subscription(
        &self,
        subscription_id: &SubscriptionId,
        price_change: Option<(&str, &str)>,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo> {
        let mut params = vec![("cancel_at_period_end".to_string(), "false".to_string())];
        if let Some((item_id, price_id)) = price_change {
            params.push(("items[0][id]".to_string(), item_id.to_string()));
            params.push(("items[0][price]".to_string(), price_id.to_string()));
            params.push(("proration_behavior".to_string(), "create_prorations".to_string()));
        }
        let sub = self
            .client
            .update_subscription(subscription_id.as_str(), &params, key)
            .await?;
        Self::to_subscription_info(sub)
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo> {
        let params = vec![("cancel_at_period_end".to_string(), "true".to_string())];
        let sub = self
            .client
            .update_subscription(subscription_id.as_str(), &params, key)
            .await?;
        Self::to_subscription_info(sub)
    }

    async fn cancel_now(
        &self,
        subscription_id: &SubscriptionId,
        key: &IdempotencyKey,
    ) -> AppResult<()> {
        self.client
            .cancel_subscription(subscription_id.as_str(), key)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Invoices & promotions
    // ========================================================================

    async fn list_invoices(&self, customer: &CustomerId, limit: u32) -> AppResult<Vec<InvoiceInfo>> {
        let invoices = self.client.list_invoices(customer.as_str(), limit).await?;
        Ok(invoices.into_iter().map(Self::to_invoice).collect())
    }

    async fn find_promotion_codes(&self, code: &str) -> AppResult<Vec<PromotionCodeInfo>> {
        let codes = self.client.list_promotion_codes(code).await?;
        Ok(codes.into_iter().map(Self::to_promotion_code).collect())
    }

    async fn apply_promotion_code(
        &self,
        subscription_id: &SubscriptionId,
        promotion_code_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo> {
        let params = vec![(
            "discounts[0][promotion_code]".to_string(),
            promotion_code_id.to_string(),
        )];
        let sub = self
            .client
            .update_subscription(subscription_id.as_str(), &params, key)
            .await?;
        Self::to_subscription_info(sub)
    }
}

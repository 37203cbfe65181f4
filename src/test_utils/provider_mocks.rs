//! Scripted in-memory billing provider.
//!
//! Records every idempotency key it sees and replays the stored result when a
//! key repeats, the way the real provider does. Rejections are stored too. Outages, lagging responses and
//! ignored cancellations can be switched on per test.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::billing_provider::{
        AttachOutcome, BillingProvider, CustomerId, IdempotencyKey, InvoiceInfo,
        PaymentMethodInfo, PromotionCodeInfo, SetupIntentInfo, SubscriptionId, SubscriptionInfo,
    },
    domain::entities::subscription::SubscriptionStatus,
};

/// Result stored under an idempotency key.
#[derive(Debug, Clone)]
enum Replay {
    Customer(CustomerId),
    Subscription(SubscriptionInfo),
    Attach(AttachOutcome),
    Done,
    Rejected { code: String, message: String },
}

#[derive(Debug, Clone)]
struct FakeCustomer {
    email: String,
    user_id: Uuid,
}

#[derive(Default)]
struct FakeState {
    customers: HashMap<String, FakeCustomer>,
    payment_methods: HashMap<String, PaymentMethodInfo>,
    default_payment_methods: HashMap<String, String>,
    subscriptions: HashMap<String, SubscriptionInfo>,
    invoices: HashMap<String, Vec<InvoiceInfo>>,
    promotion_codes: Vec<PromotionCodeInfo>,
    replays: HashMap<String, Replay>,
    seen_keys: Vec<String>,
    next_id: u64,
    unavailable: bool,
    fail_next_after_commit: bool,
    cancel_response_lags: bool,
    cancel_ignored: bool,
    decline_next_subscription: bool,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_fake{:04}", self.next_id)
    }
}

fn unavailable() -> AppError {
    AppError::ProviderUnavailable("provider unreachable".into())
}

fn missing(resource: &str, id: &str) -> AppError {
    AppError::ProviderRejected {
        code: "resource_missing".into(),
        message: format!("No such {resource}: '{id}'"),
    }
}

fn key_reused() -> AppError {
    AppError::ProviderRejected {
        code: "idempotency_error".into(),
        message: "Keys for idempotent requests can only be used with the same parameters".into(),
    }
}

#[derive(Default)]
pub struct FakeBillingProvider {
    state: Mutex<FakeState>,
}

impl FakeBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Scripting
    // ========================================================================

    pub fn put_customer(&self, customer_id: &str, email: &str, user_id: Uuid) {
        self.state.lock().unwrap().customers.insert(
            customer_id.to_string(),
            FakeCustomer {
                email: email.to_string(),
                user_id,
            },
        );
    }

    /// A card already attached to `customer_id`.
    pub fn put_payment_method(&self, customer_id: &str, payment_method_id: &str) {
        let last4: String = payment_method_id
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        self.state.lock().unwrap().payment_methods.insert(
            payment_method_id.to_string(),
            PaymentMethodInfo {
                id: payment_method_id.to_string(),
                customer_id: Some(customer_id.to_string()),
                brand: "visa".into(),
                last4,
                exp_month: 12,
                exp_year: 2030,
            },
        );
    }

    pub fn put_subscription(&self, info: SubscriptionInfo) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(info.subscription_id.0.clone(), info);
    }

    pub fn put_invoice(&self, customer_id: &str, invoice: InvoiceInfo) {
        self.state
            .lock()
            .unwrap()
            .invoices
            .entry(customer_id.to_string())
            .or_default()
            .push(invoice);
    }

    pub fn put_promotion_code(&self, promotion: PromotionCodeInfo) {
        self.state.lock().unwrap().promotion_codes.push(promotion);
    }

    /// Every call fails with `ProviderUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// The next mutation commits, but its response is lost to a timeout.
    pub fn fail_next_response_after_commit(&self) {
        self.state.lock().unwrap().fail_next_after_commit = true;
    }

    /// Cancellation is stored, but the immediate response still shows the old flag.
    pub fn set_cancel_response_lags(&self, lags: bool) {
        self.state.lock().unwrap().cancel_response_lags = lags;
    }

    /// Cancellation requests succeed without changing anything.
    pub fn set_cancel_ignored(&self, ignored: bool) {
        self.state.lock().unwrap().cancel_ignored = ignored;
    }

    /// The next subscription creation is declined the way a failed card is.
    pub fn decline_next_subscription(&self) {
        self.state.lock().unwrap().decline_next_subscription = true;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn customer_count(&self) -> usize {
        self.state.lock().unwrap().customers.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap().subscriptions.len()
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionInfo> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription_id)
            .cloned()
    }

    pub fn default_payment_method(&self, customer_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .default_payment_methods
            .get(customer_id)
            .cloned()
    }

    pub fn seen_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().seen_keys.clone()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn read<T>(&self, f: impl FnOnce(&FakeState) -> AppResult<T>) -> AppResult<T> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable());
        }
        f(&state)
    }

    /// Run a keyed mutation once; a repeated key returns the stored result.
    fn mutate(
        &self,
        key: &IdempotencyKey,
        f: impl FnOnce(&mut FakeState) -> AppResult<Replay>,
    ) -> AppResult<Replay> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable());
        }
        state.seen_keys.push(key.as_str().to_string());
        match state.replays.get(key.as_str()) {
            Some(Replay::Rejected { code, message }) => {
                return Err(AppError::ProviderRejected {
                    code: code.clone(),
                    message: message.clone(),
                });
            }
            Some(replay) => return Ok(replay.clone()),
            None => {}
        }

        let result = match f(&mut state) {
            Ok(result) => result,
            Err(AppError::ProviderRejected { code, message }) => {
                state.replays.insert(
                    key.as_str().to_string(),
                    Replay::Rejected {
                        code: code.clone(),
                        message: message.clone(),
                    },
                );
                return Err(AppError::ProviderRejected { code, message });
            }
            Err(e) => return Err(e),
        };
        state
            .replays
            .insert(key.as_str().to_string(), result.clone());

        if state.fail_next_after_commit {
            state.fail_next_after_commit = false;
            return Err(AppError::ProviderUnavailable(
                "timed out waiting for provider response".into(),
            ));
        }
        Ok(result)
    }

    fn subscription_result(replay: Replay) -> AppResult<SubscriptionInfo> {
        match replay {
            Replay::Subscription(info) => Ok(info),
            _ => Err(key_reused()),
        }
    }
}

#[async_trait]
impl BillingProvider for FakeBillingProvider {
    async fn find_customer(&self, email: &str, user_id: Uuid) -> AppResult<Option<CustomerId>> {
        self.read(|state| {
            Ok(state
                .customers
                .iter()
                .find(|(_, c)| c.email == email && c.user_id == user_id)
                .map(|(id, _)| CustomerId::new(id.clone())))
        })
    }

    async fn create_customer(
        &self,
        email: &str,
        user_id: Uuid,
        key: &IdempotencyKey,
    ) -> AppResult<CustomerId> {
        let replay = self.mutate(key, |state| {
            let id = format!("cus_{}", user_id.simple());
            state.customers.insert(
                id.clone(),
                FakeCustomer {
                    email: email.to_string(),
                    user_id,
                },
            );
            Ok(Replay::Customer(CustomerId::new(id)))
        })?;
        match replay {
            Replay::Customer(id) => Ok(id),
            _ => Err(key_reused()),
        }
    }

    async fn create_setup_intent(&self, _customer: &CustomerId) -> AppResult<SetupIntentInfo> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(unavailable());
        }
        let id = state.next_id("seti");
        Ok(SetupIntentInfo {
            client_secret: format!("{id}_secret_test"),
            id,
        })
    }

    async fn attach_payment_method(
        &self,
        customer: &CustomerId,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<AttachOutcome> {
        let replay = self.mutate(key, |state| {
            match state.payment_methods.get_mut(payment_method_id) {
                Some(pm) if pm.customer_id.as_deref() == Some(customer.as_str()) => {
                    Ok(Replay::Attach(AttachOutcome::AlreadyAttached))
                }
                Some(pm) if pm.customer_id.is_some() => Err(AppError::ProviderRejected {
                    code: "payment_method_unexpected_state".into(),
                    message: "The payment method belongs to another customer".into(),
                }),
                Some(pm) => {
                    pm.customer_id = Some(customer.0.clone());
                    Ok(Replay::Attach(AttachOutcome::Attached))
                }
                None => {
                    state.payment_methods.insert(
                        payment_method_id.to_string(),
                        PaymentMethodInfo {
                            id: payment_method_id.to_string(),
                            customer_id: Some(customer.0.clone()),
                            brand: "visa".into(),
                            last4: "4242".into(),
                            exp_month: 12,
                            exp_year: 2030,
                        },
                    );
                    Ok(Replay::Attach(AttachOutcome::Attached))
                }
            }
        })?;
        match replay {
            Replay::Attach(outcome) => Ok(outcome),
            _ => Err(key_reused()),
        }
    }

    async fn set_default_payment_method(
        &self,
        customer: &CustomerId,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<()> {
        self.mutate(key, |state| {
            if !state.payment_methods.contains_key(payment_method_id) {
                return Err(missing("payment_method", payment_method_id));
            }
            state
                .default_payment_methods
                .insert(customer.0.clone(), payment_method_id.to_string());
            Ok(Replay::Done)
        })?;
        Ok(())
    }

    async fn list_payment_methods(&self, customer: &CustomerId) -> AppResult<Vec<PaymentMethodInfo>> {
        self.read(|state| {
            let mut methods: Vec<PaymentMethodInfo> = state
                .payment_methods
                .values()
                .filter(|pm| pm.customer_id.as_deref() == Some(customer.as_str()))
                .cloned()
                .collect();
            methods.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(methods)
        })
    }

    async fn detach_payment_method(
        &self,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<()> {
        self.mutate(key, |state| {
            state
                .payment_methods
                .remove(payment_method_id)
                .ok_or_else(|| missing("payment_method", payment_method_id))?;
            state
                .default_payment_methods
                .retain(|_, pm| pm != payment_method_id);
            Ok(Replay::Done)
        })?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        customer: &CustomerId,
        price_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo> {
        let replay = self.mutate(key, |state| {
            if std::mem::take(&mut state.decline_next_subscription) {
                return Err(AppError::ProviderRejected {
                    code: "card_declined".into(),
                    message: "Your card was declined.".into(),
                });
            }
            let info = SubscriptionInfo {
                subscription_id: SubscriptionId::new(state.next_id("sub")),
                customer_id: customer.clone(),
                status: SubscriptionStatus::Active,
                current_period_end: Some(Utc::now() + Duration::days(30)),
                cancel_at_period_end: false,
                price_id: Some(price_id.to_string()),
                subscription_item_id: Some(state.next_id("si")),
                unit_amount: Some(1000),
                client_secret: None,
            };
            state
                .subscriptions
                .insert(info.subscription_id.0.clone(), info.clone());
            Ok(Replay::Subscription(info))
        })?;
        Self::subscription_result(replay)
    }

    async fn get_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> AppResult<Option<SubscriptionInfo>> {
        self.read(|state| Ok(state.subscriptions.get(subscription_id.as_str()).cloned()))
    }

    async fn resume_subscription(
        &self,
        subscription_id: &SubscriptionId,
        price_change: Option<(&str, &str)>,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo> {
        let replay = self.mutate(key, |state| {
            let info = state
                .subscriptions
                .get_mut(subscription_id.as_str())
                .ok_or_else(|| missing("subscription", subscription_id.as_str()))?;
            info.cancel_at_period_end = false;
            if let Some((item_id, price_id)) = price_change {
                if info.subscription_item_id.as_deref() != Some(item_id) {
                    return Err(missing("subscription_item", item_id));
                }
                info.price_id = Some(price_id.to_string());
            }
            Ok(Replay::Subscription(info.clone()))
        })?;
        Self::subscription_result(replay)
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &SubscriptionId,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo> {
        let replay = self.mutate(key, |state| {
            let ignored = state.cancel_ignored;
            let lags = state.cancel_response_lags;
            let info = state
                .subscriptions
                .get_mut(subscription_id.as_str())
                .ok_or_else(|| missing("subscription", subscription_id.as_str()))?;
            if ignored {
                return Ok(Replay::Subscription(info.clone()));
            }
            let before = info.clone();
            info.cancel_at_period_end = true;
            Ok(Replay::Subscription(if lags { before } else { info.clone() }))
        })?;
        Self::subscription_result(replay)
    }

    async fn cancel_now(
        &self,
        subscription_id: &SubscriptionId,
        key: &IdempotencyKey,
    ) -> AppResult<()> {
        self.mutate(key, |state| {
            let info = state
                .subscriptions
                .get_mut(subscription_id.as_str())
                .ok_or_else(|| missing("subscription", subscription_id.as_str()))?;
            info.status = SubscriptionStatus::Canceled;
            Ok(Replay::Done)
        })?;
        Ok(())
    }

    async fn list_invoices(&self, customer: &CustomerId, limit: u32) -> AppResult<Vec<InvoiceInfo>> {
        self.read(|state| {
            Ok(state
                .invoices
                .get(customer.as_str())
                .map(|invoices| invoices.iter().take(limit as usize).cloned().collect())
                .unwrap_or_default())
        })
    }

    async fn find_promotion_codes(&self, code: &str) -> AppResult<Vec<PromotionCodeInfo>> {
        self.read(|state| {
            Ok(state
                .promotion_codes
                .iter()
                .filter(|p| p.code == code)
                .cloned()
                .collect())
        })
    }

    async fn apply_promotion_code(
        &self,
        subscription_id: &SubscriptionId,
        promotion_code_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<SubscriptionInfo> {
        let replay = self.mutate(key, |state| {
            if !state.promotion_codes.iter().any(|p| p.id == promotion_code_id) {
                return Err(missing("promotion_code", promotion_code_id));
            }
            let info = state
                .subscriptions
                .get(subscription_id.as_str())
                .ok_or_else(|| missing("subscription", subscription_id.as_str()))?;
            Ok(Replay::Subscription(info.clone()))
        })?;
        Self::subscription_result(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_key_replays_original_subscription() {
        let provider = FakeBillingProvider::new();
        let customer = CustomerId::new("cus_1");
        let key = IdempotencyKey::subscription_create(Uuid::nil(), &customer, "price_m", None, Utc::now());

        let first = provider
            .create_subscription(&customer, "price_m", &key)
            .await
            .unwrap();
        let second = provider
            .create_subscription(&customer, "price_m", &key)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.subscription_count(), 1);
        assert_eq!(provider.seen_keys().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_provider_fails_reads() {
        let provider = FakeBillingProvider::new();
        provider.set_unavailable(true);
        let result = provider
            .get_subscription(&SubscriptionId::new("sub_1"))
            .await;
        assert!(matches!(result, Err(AppError::ProviderUnavailable(_))));
    }
}

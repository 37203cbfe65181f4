use std::collections::HashMap;

use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::billing_provider::IdempotencyKey,
};

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: String,
}

impl StripeClient {
    pub fn new(client: Client, secret_key: SecretString, api_base: &Url) -> Self {
        Self {
            client,
            secret_key,
            api_base: api_base.as_str().trim_end_matches('/').to_string(),
        }
    }

    fn auth_header(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .header("Authorization", self.auth_header())
    }

    fn post(&self, path: &str, key: &IdempotencyKey) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header("Authorization", self.auth_header())
            .header("Idempotency-Key", key.as_str())
    }

    // ========================================================================
    // Customers
    // ========================================================================

    pub async fn list_customers_by_email(&self, email: &str) -> AppResult<Vec<StripeCustomer>> {
        let request = self.get("customers").query(&[("email", email), ("limit", "10")]);
        let list: StripeList<StripeCustomer> = self.send(request).await?;
        Ok(list.data)
    }

    pub async fn create_customer(
        &self,
        email: &str,
        metadata: &[(&str, String)],
        key: &IdempotencyKey,
    ) -> AppResult<StripeCustomer> {
        let mut params: Vec<(String, String)> = vec![("email".to_string(), email.to_string())];
        for (name, value) in metadata {
            params.push((format!("metadata[{}]", name), value.clone()));
        }
        self.send(self.post("customers", key).form(&params)).await
    }

    pub async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<StripeCustomer> {
        let params = [("invoice_settings[default_payment_method]", payment_method_id)];
        self.send(
            self.post(&format!("customers/{}", customer_id), key)
                .form(&params),
        )
        .await
    }

    // ========================================================================
    // Setup intents & payment methods
    // ========================================================================

    /// Each call yields a fresh intent, so no idempotency key is sent.
    pub async fn create_setup_intent(&self, customer_id: &str) -> AppResult<StripeSetupIntent> {
        let params = [
            ("customer", customer_id),
            ("usage", "off_session"),
            ("payment_method_types[]", "card"),
        ];
        let request = self
            .client
            .post(self.url("setup_intents"))
            .header("Authorization", self.auth_header())
            .form(&params);
        self.send(request).await
    }

    pub async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<StripePaymentMethod> {
        let params = [("customer", customer_id)];
        self.send(
            self.post(&format!("payment_methods/{}/attach", payment_method_id), key)
                .form(&params),
        )
        .await
    }

    pub async fn detach_payment_method(
        &self,
        payment_method_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<StripePaymentMethod> {
        self.send(self.post(&format!("payment_methods/{}/detach", payment_method_id), key))
            .await
    }

    pub async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<StripePaymentMethod>> {
        let request = self
            .get(&format!("customers/{}/payment_methods", customer_id))
            .query(&[("type", "card"), ("limit", "100")]);
        let list: StripeList<StripePaymentMethod> = self.send(request).await?;
        Ok(list.data)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<StripeSubscription> {
        let params = [
            ("customer", customer_id),
            ("items[0][price]", price_id),
            ("payment_behavior", "error_if_incomplete"),
            ("expand[]", "latest_invoice.payment_intent"),
        ];
        self.send(self.post("subscriptions", key).form(&params)).await
    }

    /// `None` when the provider answers `resource_missing`.
    pub async fn get_subscription(&self, subscription_id: &str) -> AppResult<Option<StripeSubscription>> {
        match self
            .send(self.get(&format!("subscriptions/{}", subscription_id)))
            .await
        {
            Ok(subscription) => Ok(Some(subscription)),
            Err(AppError::ProviderRejected { code, .. }) if code == RESOURCE_MISSING => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn update_subscription(
        &self,
        subscription_id: &str,
        params: &[(String, String)],
        key: &IdempotencyKey,
    ) -> AppResult<StripeSubscription> {
        self.send(
            self.post(&format!("subscriptions/{}", subscription_id), key)
                .form(params),
        )
        .await
    }

    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        key: &IdempotencyKey,
    ) -> AppResult<StripeSubscription> {
        let request = self
            .client
            .delete(self.url(&format!("subscriptions/{}", subscription_id)))
            .header("Authorization", self.auth_header())
            .header("Idempotency-Key", key.as_str());
        self.send(request).await
    }

    // ========================================================================
    // Invoices & promotion codes
    // ========================================================================

    pub async fn list_invoices(&self, customer_id: &str, limit: u32) -> AppResult<Vec<StripeInvoice>> {
        let request = self
            .get("invoices")
            .query(&[("customer", customer_id.to_string()), ("limit", limit.to_string())]);
        let list: StripeList<StripeInvoice> = self.send(request).await?;
        Ok(list.data)
    }

    pub async fn list_promotion_codes(&self, code: &str) -> AppResult<Vec<StripePromotionCode>> {
        let request = self
            .get("promotion_codes")
            .query(&[("code", code), ("active", "true"), ("limit", "10")]);
        let list: StripeList<StripePromotionCode> = self.send(request).await?;
        Ok(list.data)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> AppResult<T> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Stripe request failed");
            AppError::ProviderUnavailable(format!("Stripe request failed: {}", e))
        })?;
        self.handle_response(response).await
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Stripe response");
            AppError::Internal(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

const RESOURCE_MISSING: &str = "resource_missing";

/// Transient failures (5xx, rate limiting) are `ProviderUnavailable`;
/// everything else is a rejection carrying the provider's error code.
fn classify_error(status: StatusCode, body: &str) -> AppError {
    let parsed = serde_json::from_str::<StripeErrorResponse>(body).ok();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(status = %status, "Stripe unavailable");
        return AppError::ProviderUnavailable(format!("Stripe returned {}", status));
    }

    let Some(StripeErrorResponse { error }) = parsed else {
        tracing::error!(status = %status, "Unparseable Stripe error response");
        return AppError::ProviderRejected {
            code: format!("http_{}", status.as_u16()),
            message: String::new(),
        };
    };

    let code = error.code.unwrap_or(error.error_type);
    let message = error.message.unwrap_or_default();
    if code == RESOURCE_MISSING {
        tracing::debug!(status = %status, "Stripe resource missing");
    } else {
        tracing::error!(status = %status, code = %code, message = %message, "Stripe API error");
    }
    AppError::ProviderRejected { code, message }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

/// A field that is either an id or, when expanded, the full object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StripeExpandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T> StripeExpandable<T> {
    pub fn object(&self) -> Option<&T> {
        match self {
            StripeExpandable::Id(_) => None,
            StripeExpandable::Object(object) => Some(object),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSetupIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripePaymentMethod {
    pub id: String,
    pub customer: Option<String>,
    pub card: Option<StripeCard>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCard {
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    /// Moved onto the items in newer API versions.
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub items: StripeList<StripeSubscriptionItem>,
    pub latest_invoice: Option<StripeExpandable<StripeLatestInvoice>>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub current_period_end: Option<i64>,
    pub price: StripePrice,
}

#[derive(Debug, Deserialize)]
pub struct StripePrice {
    pub id: String,
    pub unit_amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StripeLatestInvoice {
    pub id: String,
    pub payment_intent: Option<StripeExpandable<StripePaymentIntent>>,
}

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub status: Option<String>,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub number: Option<String>,
    pub created: i64,
}

#[derive(Debug, Deserialize)]
pub struct StripePromotionCode {
    pub id: String,
    pub code: String,
    pub customer: Option<String>,
    pub coupon: StripeCoupon,
}

#[derive(Debug, Deserialize)]
pub struct StripeCoupon {
    pub id: String,
    pub name: Option<String>,
    pub percent_off: Option<f64>,
    pub amount_off: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeError,
}

#[derive(Debug, Deserialize)]
pub struct StripeError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: Option<String>,
    pub message: Option<String>,
}

use std::net::SocketAddr;

use axum::http::HeaderValue;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;
use url::Url;

pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub cors_origin: HeaderValue,
    pub jwt_secret: SecretString,
    pub stripe_secret_key: SecretString,
    pub stripe_webhook_secret: SecretString,
    pub stripe_api_base: Url,
    /// Price ids a caller may subscribe to. Empty variables are skipped.
    pub allowed_price_ids: Vec<String>,
    pub webhook_tolerance_secs: i64,
    pub webhook_workers: usize,
    pub webhook_queue_capacity: usize,
    pub webhook_shutdown_timeout_secs: u64,
    pub ledger_retention_days: i64,
    pub ledger_prune_interval_secs: u64,
    pub log_file: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url: String = get_env("DATABASE_URL");
        let bind_addr: SocketAddr = get_env_default(
            "BIND_ADDR",
            SocketAddr::from(([127, 0, 0, 1], 3001)),
        );
        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .expect("CORS_ORIGIN must be a valid header value");

        let jwt_secret = SecretString::new(get_env::<String>("JWT_SECRET").into());
        let stripe_secret_key = SecretString::new(get_env::<String>("STRIPE_SECRET_KEY").into());
        let stripe_webhook_secret =
            SecretString::new(get_env::<String>("STRIPE_WEBHOOK_SECRET").into());
        let stripe_api_base: Url = get_env_default(
            "STRIPE_API_BASE",
            Url::parse("https://api.stripe.com/v1").expect("default Stripe base URL is valid"),
        );

        let allowed_price_ids = ["STRIPE_PRICE_MONTHLY", "STRIPE_PRICE_YEARLY", "STRIPE_PRICE_2YEARS"]
            .into_iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|price| price.trim().to_string())
            .filter(|price| !price.is_empty())
            .collect();

        Self {
            database_url,
            bind_addr,
            cors_origin,
            jwt_secret,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_api_base,
            allowed_price_ids,
            webhook_tolerance_secs: get_env_default("WEBHOOK_TOLERANCE_SECS", 300),
            webhook_workers: get_env_default("WEBHOOK_WORKERS", 5),
            webhook_queue_capacity: get_env_default("WEBHOOK_QUEUE_CAPACITY", 100),
            webhook_shutdown_timeout_secs: get_env_default("WEBHOOK_SHUTDOWN_TIMEOUT_SECS", 30),
            ledger_retention_days: get_env_default("LEDGER_RETENTION_DAYS", 30),
            ledger_prune_interval_secs: get_env_default("LEDGER_PRUNE_INTERVAL_SECS", 3600),
            log_file: get_env_default("LOG_FILE", String::from("billing-sync.log")),
        }
    }
}

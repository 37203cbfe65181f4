use crate::{adapters::persistence::PostgresPersistence, infra::db::init_db};

pub mod app;
pub mod config;
pub mod db;
pub mod http_client;
pub mod ledger_retention;
pub mod setup;
pub mod stripe_billing_adapter;
pub mod stripe_client;
pub mod webhook_verifier;
pub mod worker_pool;

pub async fn postgres_persistence(database_url: &str) -> anyhow::Result<PostgresPersistence> {
    let pool = init_db(database_url).await?;
    let persistence = PostgresPersistence::new(pool);
    Ok(persistence)
}

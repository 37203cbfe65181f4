pub mod billing;
pub mod ledger;
pub mod reconciliation;
pub mod subscription_store;
pub mod transitions;
pub mod webhook_ingest;

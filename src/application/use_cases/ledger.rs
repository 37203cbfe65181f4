use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::{
    app_error::AppResult,
    domain::entities::processed_event::{LedgerOutcome, ProcessedEvent},
};

#[async_trait]
pub trait ProcessedEventRepo: Send + Sync {
    /// Insert unless `event_id` is already present. Must be atomic.
    async fn insert_if_absent(&self, event: &ProcessedEvent) -> AppResult<LedgerOutcome>;

    /// Delete entries received before `cutoff`; returns how many were removed.
    async fn delete_received_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

/// Exactly-once boundary for provider events.
#[derive(Clone)]
pub struct IdempotencyLedger {
    repo: Arc<dyn ProcessedEventRepo>,
    retention: Duration,
}

impl IdempotencyLedger {
    pub fn new(repo: Arc<dyn ProcessedEventRepo>, retention: Duration) -> Self {
        Self { repo, retention }
    }

    pub async fn accept(&self, event_id: &str, event_type: &str) -> AppResult<LedgerOutcome> {
        let entry = ProcessedEvent {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            received_at: Utc::now(),
        };
        let outcome = self.repo.insert_if_absent(&entry).await?;
        if !outcome.is_accepted() {
            debug!(event_id, event_type, "Event already processed, skipping");
        }
        Ok(outcome)
    }

    /// Drop entries older than the retention window.
    pub async fn prune(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let cutoff = now - self.retention;
        let removed = self.repo.delete_received_before(cutoff).await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "Pruned processed event ledger");
        }
        Ok(removed)
    }
}

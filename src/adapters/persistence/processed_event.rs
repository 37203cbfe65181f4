use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::ledger::ProcessedEventRepo,
    domain::entities::processed_event::{LedgerOutcome, ProcessedEvent},
};

#[async_trait]
impl ProcessedEventRepo for PostgresPersistence {
    async fn insert_if_absent(&self, event: &ProcessedEvent) -> AppResult<LedgerOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, received_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.received_at)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(if result.rows_affected() == 0 {
            LedgerOutcome::AlreadyProcessed
        } else {
            LedgerOutcome::Accepted
        })
    }

    async fn delete_received_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM processed_events WHERE received_at < $1")
            .bind(cutoff)
            .execute(self.pool())
            .await
            .map_err(AppError::from)?;
        Ok(result.rows_affected())
    }
}

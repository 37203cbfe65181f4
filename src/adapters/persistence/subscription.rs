use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::subscription_store::{
        ProviderStateUpdate, SubscriptionRepo, SubscriptionUpsert, WriteOutcome,
    },
    domain::entities::subscription::{SubscriptionRecord, SubscriptionStatus},
};

fn row_to_record(row: &sqlx::postgres::PgRow) -> SubscriptionRecord {
    SubscriptionRecord {
        user_id: row.get("user_id"),
        provider_customer_id: row.get("provider_customer_id"),
        provider_subscription_id: row
            .get::<Option<String>, _>("provider_subscription_id")
            .unwrap_or_default(),
        status: row.get("status"),
        price_id: row.get("price_id"),
        current_period_end: row.get("current_period_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        provider_synced_at: row.get("provider_synced_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    user_id, provider_customer_id, provider_subscription_id, status, price_id,
    current_period_end, cancel_at_period_end, provider_synced_at, created_at, updated_at
"#;

impl PostgresPersistence {
    /// Distinguishes a guarded update that matched nothing from one that was
    /// blocked by a newer `provider_synced_at`.
    async fn missing_or_stale(&self, subscription_id: &str) -> AppResult<WriteOutcome> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM subscriptions WHERE provider_subscription_id = $1",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;

        Ok(match exists {
            Some(_) => WriteOutcome::Stale,
            None => WriteOutcome::NotFound,
        })
    }
}

#[async_trait]
impl SubscriptionRepo for PostgresPersistence {
    async fn get_by_user(&self, user_id: Uuid) -> AppResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn get_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE provider_subscription_id = $1",
            SELECT_COLS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn list_all(&self) -> AppResult<Vec<SubscriptionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscriptions ORDER BY created_at DESC",
            SELECT_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn upsert_for_user(&self, input: &SubscriptionUpsert) -> AppResult<WriteOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                user_id, provider_customer_id, provider_subscription_id, status, price_id,
                current_period_end, cancel_at_period_end, provider_synced_at
            )
            VALUES ($1, $2, NULLIF($3, ''), $4, COALESCE($5, ''), $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                provider_customer_id = EXCLUDED.provider_customer_id,
                provider_subscription_id = EXCLUDED.provider_subscription_id,
                status = EXCLUDED.status,
                price_id = COALESCE($5, subscriptions.price_id),
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                provider_synced_at = EXCLUDED.provider_synced_at,
                updated_at = CURRENT_TIMESTAMP
            WHERE subscriptions.provider_synced_at IS NULL
               OR subscriptions.provider_synced_at <= EXCLUDED.provider_synced_at
            "#,
        )
        .bind(input.user_id)
        .bind(&input.customer_id)
        .bind(&input.subscription_id)
        .bind(input.status)
        .bind(input.price_id.as_deref())
        .bind(input.current_period_end)
        .bind(input.cancel_at_period_end)
        .bind(input.as_of)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;

        // The insert arm always affects a row, so zero means the guard held.
        Ok(if result.rows_affected() == 0 {
            WriteOutcome::Stale
        } else {
            WriteOutcome::Applied
        })
    }

    async fn apply_provider_state(
        &self,
        subscription_id: &str,
        update: &ProviderStateUpdate,
        as_of: DateTime<Utc>,
    ) -> AppResult<WriteOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                current_period_end = COALESCE($3, current_period_end),
                cancel_at_period_end = $4,
                price_id = COALESCE($5, price_id),
                provider_customer_id = COALESCE($6, provider_customer_id),
                provider_synced_at = $7,
                updated_at = CURRENT_TIMESTAMP
            WHERE provider_subscription_id = $1
              AND (provider_synced_at IS NULL OR provider_synced_at <= $7)
            "#,
        )
        .bind(subscription_id)
        .bind(update.status)
        .bind(update.current_period_end)
        .bind(update.cancel_at_period_end)
        .bind(update.price_id.as_deref())
        .bind(update.customer_id.as_deref())
        .bind(as_of)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;

        if result.rows_affected() == 0 {
            return self.missing_or_stale(subscription_id).await;
        }
        Ok(WriteOutcome::Applied)
    }

    async fn set_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        as_of: DateTime<Utc>,
    ) -> AppResult<WriteOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                provider_synced_at = $3,
                updated_at = CURRENT_TIMESTAMP
            WHERE provider_subscription_id = $1
              AND (provider_synced_at IS NULL OR provider_synced_at <= $3)
            "#,
        )
        .bind(subscription_id)
        .bind(status)
        .bind(as_of)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;

        if result.rows_affected() == 0 {
            return self.missing_or_stale(subscription_id).await;
        }
        Ok(WriteOutcome::Applied)
    }

    async fn delete_by_user(&self, user_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(result.rows_affected() > 0)
    }
}

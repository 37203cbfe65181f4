use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::subscription_store::PaymentProfileRepo,
    domain::entities::payment_profile::{PaymentProfile, ProfileInsertOutcome},
};

fn row_to_profile(row: sqlx::postgres::PgRow) -> PaymentProfile {
    PaymentProfile {
        user_id: row.get("user_id"),
        provider_customer_id: row.get("provider_customer_id"),
        has_payment_method: row.get("has_payment_method"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str =
    "user_id, provider_customer_id, has_payment_method, created_at, updated_at";

#[async_trait]
impl PaymentProfileRepo for PostgresPersistence {
    async fn get_by_user(&self, user_id: Uuid) -> AppResult<Option<PaymentProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_profiles WHERE user_id = $1",
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row.map(row_to_profile))
    }

    async fn insert(&self, user_id: Uuid, customer_id: &str) -> AppResult<ProfileInsertOutcome> {
        // Filling a customer into an existing empty profile counts as an insert.
        let result = sqlx::query(
            r#"
            INSERT INTO payment_profiles (user_id, provider_customer_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET
                provider_customer_id = EXCLUDED.provider_customer_id,
                updated_at = CURRENT_TIMESTAMP
            WHERE payment_profiles.provider_customer_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(if result.rows_affected() == 0 {
            ProfileInsertOutcome::Duplicate
        } else {
            ProfileInsertOutcome::Inserted
        })
    }

    async fn set_has_payment_method(
        &self,
        user_id: Uuid,
        has_payment_method: bool,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_profiles
            SET has_payment_method = $2, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(has_payment_method)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}

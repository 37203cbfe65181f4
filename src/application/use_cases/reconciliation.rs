//! Re-sync of local subscription records from the provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    application::{
        masking::mask_id,
        ports::billing_provider::{BillingProvider, SubscriptionId, SubscriptionInfo},
        use_cases::subscription_store::{
            ProviderStateUpdate, SubscriptionRepo, WriteOutcome, direct_write_as_of,
        },
    },
    domain::entities::subscription::{SubscriptionRecord, SubscriptionStatus},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionSummary {
    pub id: String,
    pub status: SubscriptionStatus,
    pub price_id: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl From<&SubscriptionRecord> for SubscriptionSummary {
    fn from(record: &SubscriptionRecord) -> Self {
        Self {
            id: record.provider_subscription_id.clone(),
            status: record.status,
            price_id: record.price_id.clone(),
            current_period_end: record.current_period_end,
            cancel_at_period_end: record.cancel_at_period_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    #[serde(rename = "hasActiveSubscription")]
    pub has_active_subscription: bool,
    pub subscription: Option<SubscriptionSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub synced: u64,
    pub removed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    InSync,
    Repaired,
    /// The provider no longer knows the subscription.
    MarkedCanceled,
    /// Provider unreachable; local state served as-is.
    Stale,
    /// No provider subscription id to check against.
    Orphaned,
}

#[derive(Clone)]
pub struct ReconciliationUseCases {
    subscriptions: Arc<dyn SubscriptionRepo>,
    provider: Arc<dyn BillingProvider>,
}

impl ReconciliationUseCases {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepo>, provider: Arc<dyn BillingProvider>) -> Self {
        Self {
            subscriptions,
            provider,
        }
    }

    /// Status query with lazy reconciliation.
    #[instrument(skip(self))]
    pub async fn status_for(&self, user_id: Uuid, now: DateTime<Utc>) -> AppResult<StatusView> {
        let Some(record) = self.subscriptions.get_by_user(user_id).await? else {
            return Ok(StatusView {
                has_active_subscription: false,
                subscription: None,
            });
        };

        let (record, _) = self.reconcile(record, now).await;

        Ok(StatusView {
            has_active_subscription: record.is_active_at(now),
            subscription: Some(SubscriptionSummary::from(&record)),
        })
    }

    /// Compare one record with the provider and overwrite drifted fields.
    ///
    /// Never fails: provider and store errors are logged and the best known
    /// state is returned.
    pub async fn reconcile(
        &self,
        record: SubscriptionRecord,
        now: DateTime<Utc>,
    ) -> (SubscriptionRecord, ReconcileOutcome) {
        if record.is_orphaned() {
            return (record, ReconcileOutcome::Orphaned);
        }
        let subscription_id = SubscriptionId::new(record.provider_subscription_id.clone());

        let remote = match self.provider.get_subscription(&subscription_id).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(
                    subscription = %mask_id(subscription_id.as_str()),
                    error = %e,
                    "Failed to fetch subscription from provider, serving local state"
                );
                return (record, ReconcileOutcome::Stale);
            }
        };

        let Some(remote) = remote else {
            info!(
                subscription = %mask_id(subscription_id.as_str()),
                "Subscription missing at provider, marking canceled"
            );
            let update = ProviderStateUpdate {
                status: SubscriptionStatus::Canceled,
                current_period_end: record.current_period_end,
                cancel_at_period_end: true,
                price_id: None,
                customer_id: None,
            };
            let record = self.persist(record, &update, now).await;
            return (record, ReconcileOutcome::MarkedCanceled);
        };

        if remote.cancel_at_period_end
            && remote.current_period_end.is_some_and(|end| now > end)
            && remote.status != SubscriptionStatus::Canceled
        {
            warn!(
                subscription = %mask_id(subscription_id.as_str()),
                status = %remote.status,
                "Cancellation period has ended but provider status is not canceled"
            );
        }

        if !has_drifted(&record, &remote) {
            return (record, ReconcileOutcome::InSync);
        }

        info!(
            subscription = %mask_id(subscription_id.as_str()),
            local_status = %record.status,
            provider_status = %remote.status,
            local_cancel = record.cancel_at_period_end,
            provider_cancel = remote.cancel_at_period_end,
            "Subscription drifted from provider, syncing"
        );
        let update = ProviderStateUpdate {
            status: remote.status,
            current_period_end: remote.current_period_end,
            cancel_at_period_end: remote.cancel_at_period_end,
            price_id: remote.price_id.clone(),
            customer_id: None,
        };
        let record = self.persist(record, &update, now).await;
        (record, ReconcileOutcome::Repaired)
    }

    /// Administrative sweep over every record.
    ///
    /// Orphans and records whose provider subscription is gone are deleted;
    /// everything else is overwritten from the provider.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let records = self.subscriptions.list_all().await?;
        let mut report = SweepReport {
            synced: 0,
            removed: 0,
        };

        for record in records {
            if record.is_orphaned() {
                if self.subscriptions.delete_by_user(record.user_id).await? {
                    info!(user_id = %record.user_id, "Removed subscription record without provider id");
                    report.removed += 1;
                }
                continue;
            }

            let subscription_id = SubscriptionId::new(record.provider_subscription_id.clone());
            match self.provider.get_subscription(&subscription_id).await {
                Ok(None) => {
                    if self.subscriptions.delete_by_user(record.user_id).await? {
                        info!(
                            user_id = %record.user_id,
                            subscription = %mask_id(subscription_id.as_str()),
                            "Removed subscription record missing at provider"
                        );
                        report.removed += 1;
                    }
                }
                Ok(Some(remote)) => {
                    let update = ProviderStateUpdate {
                        status: remote.status,
                        current_period_end: remote.current_period_end,
                        cancel_at_period_end: remote.cancel_at_period_end,
                        price_id: remote.price_id.clone(),
                        customer_id: Some(remote.customer_id.0.clone()),
                    };
                    match self
                        .subscriptions
                        .apply_provider_state(
                            subscription_id.as_str(),
                            &update,
                            direct_write_as_of(now),
                        )
                        .await?
                    {
                        WriteOutcome::Applied => report.synced += 1,
                        outcome => {
                            info!(
                                subscription = %mask_id(subscription_id.as_str()),
                                ?outcome,
                                "Sweep skipped record"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        subscription = %mask_id(subscription_id.as_str()),
                        error = %e,
                        "Sweep could not fetch subscription, leaving record untouched"
                    );
                }
            }
        }

        info!(synced = report.synced, removed = report.removed, "Subscription sweep finished");
        Ok(report)
    }

    async fn persist(
        &self,
        mut record: SubscriptionRecord,
        update: &ProviderStateUpdate,
        now: DateTime<Utc>,
    ) -> SubscriptionRecord {
        match self
            .subscriptions
            .apply_provider_state(
                &record.provider_subscription_id,
                update,
                direct_write_as_of(now),
            )
            .await
        {
            Ok(WriteOutcome::Stale) => {
                // A newer webhook landed while we were fetching; it wins.
                match self.subscriptions.get_by_user(record.user_id).await {
                    Ok(Some(fresh)) => return fresh,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to re-read subscription after stale sync"),
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(
                    user_id = %record.user_id,
                    error = %e,
                    "Failed to persist reconciled subscription"
                );
            }
        }

        record.status = update.status;
        if let Some(end) = update.current_period_end {
            record.current_period_end = Some(end);
        }
        record.cancel_at_period_end = update.cancel_at_period_end;
        if let Some(price_id) = &update.price_id {
            record.price_id = price_id.clone();
        }
        record
    }
}

fn has_drifted(local: &SubscriptionRecord, remote: &SubscriptionInfo) -> bool {
    local.status != remote.status
        || remote
            .current_period_end
            .is_some_and(|end| local.current_period_end != Some(end))
        || local.cancel_at_period_end != remote.cancel_at_period_end
        || remote
            .price_id
            .as_deref()
            .is_some_and(|price| price != local.price_id)
}

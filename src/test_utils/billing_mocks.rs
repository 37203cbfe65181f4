//! In-memory mock implementations of the store traits.
//!
//! Each repo enforces the same uniqueness and ordering rules as the SQL schema
//! so use case tests exercise the real write semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::{
        ledger::ProcessedEventRepo,
        subscription_store::{
            PaymentProfileRepo, ProviderStateUpdate, SubscriptionRepo, SubscriptionUpsert,
            WriteOutcome,
        },
    },
    domain::entities::{
        payment_profile::{PaymentProfile, ProfileInsertOutcome},
        processed_event::{LedgerOutcome, ProcessedEvent},
        subscription::{SubscriptionRecord, SubscriptionStatus},
    },
};

fn is_newer(stored: Option<DateTime<Utc>>, as_of: DateTime<Utc>) -> bool {
    stored.is_some_and(|synced| synced > as_of)
}

fn duplicate() -> AppError {
    AppError::InvalidInput("A record with this value already exists".into())
}

// ============================================================================
// InMemorySubscriptionRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    pub records: Mutex<HashMap<Uuid, SubscriptionRecord>>,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<SubscriptionRecord>) -> Self {
        let map: HashMap<Uuid, SubscriptionRecord> =
            records.into_iter().map(|r| (r.user_id, r)).collect();
        Self {
            records: Mutex::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guarded_write(
        &self,
        subscription_id: &str,
        as_of: DateTime<Utc>,
        write: impl FnOnce(&mut SubscriptionRecord),
    ) -> WriteOutcome {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records
            .values_mut()
            .find(|r| !r.is_orphaned() && r.provider_subscription_id == subscription_id)
        else {
            return WriteOutcome::NotFound;
        };
        if is_newer(record.provider_synced_at, as_of) {
            return WriteOutcome::Stale;
        }
        write(record);
        record.provider_synced_at = Some(as_of);
        record.updated_at = Utc::now();
        WriteOutcome::Applied
    }
}

#[async_trait]
impl SubscriptionRepo for InMemorySubscriptionRepo {
    async fn get_by_user(&self, user_id: Uuid) -> AppResult<Option<SubscriptionRecord>> {
        Ok(self.records.lock().unwrap().get(&user_id).cloned())
    }

    async fn get_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<SubscriptionRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| !r.is_orphaned() && r.provider_subscription_id == subscription_id)
            .cloned())
    }

    async fn list_all(&self) -> AppResult<Vec<SubscriptionRecord>> {
        let mut all: Vec<SubscriptionRecord> =
            self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn upsert_for_user(&self, input: &SubscriptionUpsert) -> AppResult<WriteOutcome> {
        let mut records = self.records.lock().unwrap();

        if !input.subscription_id.is_empty()
            && records.values().any(|r| {
                r.user_id != input.user_id && r.provider_subscription_id == input.subscription_id
            })
        {
            return Err(duplicate());
        }

        let now = Utc::now();
        match records.get_mut(&input.user_id) {
            Some(existing) => {
                if is_newer(existing.provider_synced_at, input.as_of) {
                    return Ok(WriteOutcome::Stale);
                }
                existing.provider_customer_id = input.customer_id.clone();
                existing.provider_subscription_id = input.subscription_id.clone();
                existing.status = input.status;
                if let Some(price_id) = &input.price_id {
                    existing.price_id = price_id.clone();
                }
                existing.current_period_end = input.current_period_end;
                existing.cancel_at_period_end = input.cancel_at_period_end;
                existing.provider_synced_at = Some(input.as_of);
                existing.updated_at = now;
            }
            None => {
                records.insert(
                    input.user_id,
                    SubscriptionRecord {
                        user_id: input.user_id,
                        provider_customer_id: input.customer_id.clone(),
                        provider_subscription_id: input.subscription_id.clone(),
                        status: input.status,
                        price_id: input.price_id.clone().unwrap_or_default(),
                        current_period_end: input.current_period_end,
                        cancel_at_period_end: input.cancel_at_period_end,
                        provider_synced_at: Some(input.as_of),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(WriteOutcome::Applied)
    }

    async fn apply_provider_state(
        &self,
        subscription_id: &str,
        update: &ProviderStateUpdate,
        as_of: DateTime<Utc>,
    ) -> AppResult<WriteOutcome> {
        Ok(self.guarded_write(subscription_id, as_of, |record| {
            record.status = update.status;
            if let Some(end) = update.current_period_end {
                record.current_period_end = Some(end);
            }
            record.cancel_at_period_end = update.cancel_at_period_end;
            if let Some(price_id) = &update.price_id {
                record.price_id = price_id.clone();
            }
            if let Some(customer_id) = &update.customer_id {
                record.provider_customer_id = customer_id.clone();
            }
        }))
    }

    async fn set_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        as_of: DateTime<Utc>,
    ) -> AppResult<WriteOutcome> {
        Ok(self.guarded_write(subscription_id, as_of, |record| {
            record.status = status;
        }))
    }

    async fn delete_by_user(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.records.lock().unwrap().remove(&user_id).is_some())
    }
}

// ============================================================================
// InMemoryPaymentProfileRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryPaymentProfileRepo {
    pub profiles: Mutex<HashMap<Uuid, PaymentProfile>>,
    /// Profiles written by a "concurrent request" right before the next insert.
    pending_competitors: Mutex<Vec<(Uuid, String)>>,
}

impl InMemoryPaymentProfileRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<PaymentProfile>) -> Self {
        let map: HashMap<Uuid, PaymentProfile> =
            profiles.into_iter().map(|p| (p.user_id, p)).collect();
        Self {
            profiles: Mutex::new(map),
            pending_competitors: Mutex::new(Vec::new()),
        }
    }

    /// Make another request win the race: the profile appears just before
    /// this repo's next `insert`.
    pub fn simulate_competing_insert(&self, user_id: Uuid, customer_id: &str) {
        self.pending_competitors
            .lock()
            .unwrap()
            .push((user_id, customer_id.to_string()));
    }
}

#[async_trait]
impl PaymentProfileRepo for InMemoryPaymentProfileRepo {
    async fn get_by_user(&self, user_id: Uuid) -> AppResult<Option<PaymentProfile>> {
        Ok(self.profiles.lock().unwrap().get(&user_id).cloned())
    }

    async fn insert(&self, user_id: Uuid, customer_id: &str) -> AppResult<ProfileInsertOutcome> {
        let mut profiles = self.profiles.lock().unwrap();
        let now = Utc::now();

        for (competitor, competing_customer) in self.pending_competitors.lock().unwrap().drain(..) {
            profiles.insert(
                competitor,
                PaymentProfile {
                    user_id: competitor,
                    provider_customer_id: Some(competing_customer),
                    has_payment_method: false,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        if profiles
            .values()
            .any(|p| p.user_id != user_id && p.customer_id() == Some(customer_id))
        {
            return Err(duplicate());
        }

        match profiles.get_mut(&user_id) {
            Some(existing) if existing.customer_id().is_some() => {
                Ok(ProfileInsertOutcome::Duplicate)
            }
            Some(existing) => {
                existing.provider_customer_id = Some(customer_id.to_string());
                existing.updated_at = now;
                Ok(ProfileInsertOutcome::Inserted)
            }
            None => {
                profiles.insert(
                    user_id,
                    PaymentProfile {
                        user_id,
                        provider_customer_id: Some(customer_id.to_string()),
                        has_payment_method: false,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(ProfileInsertOutcome::Inserted)
            }
        }
    }

    async fn set_has_payment_method(
        &self,
        user_id: Uuid,
        has_payment_method: bool,
    ) -> AppResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.get_mut(&user_id).ok_or(AppError::NotFound)?;
        profile.has_payment_method = has_payment_method;
        profile.updated_at = Utc::now();
        Ok(())
    }
}

// ============================================================================
// InMemoryProcessedEventRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryProcessedEventRepo {
    pub events: Mutex<HashMap<String, ProcessedEvent>>,
}

impl InMemoryProcessedEventRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, event: ProcessedEvent) {
        self.events
            .lock()
            .unwrap()
            .insert(event.event_id.clone(), event);
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.events.lock().unwrap().contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProcessedEventRepo for InMemoryProcessedEventRepo {
    async fn insert_if_absent(&self, event: &ProcessedEvent) -> AppResult<LedgerOutcome> {
        let mut events = self.events.lock().unwrap();
        if events.contains_key(&event.event_id) {
            return Ok(LedgerOutcome::AlreadyProcessed);
        }
        events.insert(event.event_id.clone(), event.clone());
        Ok(LedgerOutcome::Accepted)
    }

    async fn delete_received_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|_, e| e.received_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

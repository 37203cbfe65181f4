//! Synchronous half of webhook handling: ledger accept, then hand-off.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::{ledger::IdempotencyLedger, transitions::TransitionHandlers},
    domain::entities::{billing_event::WebhookEnvelope, processed_event::LedgerOutcome},
};

/// Processes one accepted event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: &WebhookEnvelope) -> AppResult<()>;
}

#[async_trait]
impl EventHandler for TransitionHandlers {
    async fn handle(&self, envelope: &WebhookEnvelope) -> AppResult<()> {
        TransitionHandlers::handle(self, envelope).await.map(|_| ())
    }
}

/// Non-blocking hand-off to the worker pool.
pub trait EventQueue: Send + Sync {
    /// Returns false when the queue is full or shutting down.
    fn enqueue(&self, envelope: WebhookEnvelope) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    /// Queue was full; the event ran on a dedicated task instead.
    ProcessedInline,
    AlreadyProcessed,
}

#[derive(Clone)]
pub struct WebhookIngest {
    ledger: IdempotencyLedger,
    queue: Arc<dyn EventQueue>,
    handler: Arc<dyn EventHandler>,
}

impl WebhookIngest {
    pub fn new(
        ledger: IdempotencyLedger,
        queue: Arc<dyn EventQueue>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            ledger,
            queue,
            handler,
        }
    }

    /// Accept a verified event. Handler failures never surface here: once the
    /// ledger holds the event id, the provider gets a success response.
    #[instrument(skip(self, envelope), fields(event_id = %envelope.event_id, event_type = %envelope.event_type))]
    pub async fn ingest(&self, envelope: WebhookEnvelope) -> AppResult<IngestOutcome> {
        match self
            .ledger
            .accept(&envelope.event_id, &envelope.event_type)
            .await?
        {
            LedgerOutcome::AlreadyProcessed => return Ok(IngestOutcome::AlreadyProcessed),
            LedgerOutcome::Accepted => {}
        }

        if self.queue.enqueue(envelope.clone()) {
            return Ok(IngestOutcome::Queued);
        }

        error!(
            alert = "webhook_queue_full",
            error = %AppError::QueueFull,
            "Webhook queue full, processing event inline"
        );
        self.process_inline(envelope).await;
        Ok(IngestOutcome::ProcessedInline)
    }

    async fn process_inline(&self, envelope: WebhookEnvelope) {
        let handler = self.handler.clone();
        let event_id = envelope.event_id.clone();
        let task = tokio::spawn(async move { handler.handle(&envelope).await });

        match task.await {
            Ok(Ok(())) => info!(%event_id, "Inline webhook processing finished"),
            Ok(Err(e)) => warn!(%event_id, error = %e, "Inline webhook processing failed"),
            Err(e) if e.is_panic() => error!(%event_id, "Inline webhook processing panicked"),
            Err(e) => error!(%event_id, error = %e, "Inline webhook task was cancelled"),
        }
    }
}

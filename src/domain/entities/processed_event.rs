use chrono::{DateTime, Utc};

/// Ledger entry for a provider event that has been accepted for processing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
}

/// Result of offering an event id to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// First sighting; the caller owns processing.
    Accepted,
    /// Seen before. Not an error, the event must not be processed again.
    AlreadyProcessed,
}

impl LedgerOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, LedgerOutcome::Accepted)
    }
}

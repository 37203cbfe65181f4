use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

use crate::use_cases::ledger::IdempotencyLedger;

/// Prune the processed-event ledger every `every` until `stop` flips to true.
pub async fn run_ledger_retention_loop(
    ledger: IdempotencyLedger,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);

    info!(
        "Ledger retention started (pruning every {}s)",
        every.as_secs()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = ledger.prune(Utc::now()).await {
                    error!(error = %e, "Failed to prune processed event ledger");
                }
            }
            _ = stop.changed() => break,
        }
    }

    info!("Ledger retention stopped");
}

use std::net::SocketAddr;
use std::time::Duration;

use dotenvy::dotenv;
use tokio::sync::watch;
use tracing::info;

use billing_sync::infra::{
    app::create_app,
    config::AppConfig,
    ledger_retention::run_ledger_retention_loop,
    setup::{AppRuntime, init_app_state, init_tracing},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env();
    init_tracing(&config.log_file);

    let AppRuntime {
        app_state,
        worker_pool,
        ledger,
    } = init_app_state(config).await?;

    let bind_addr = app_state.config.bind_addr;
    let prune_every = Duration::from_secs(app_state.config.ledger_prune_interval_secs.max(1));

    let (stop_tx, stop_rx) = watch::channel(false);
    let retention = tokio::spawn(run_ledger_retention_loop(ledger, prune_every, stop_rx));

    let app = create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Backend listening at {}", &listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("HTTP server stopped, draining webhook workers");
    stop_tx.send(true).ok();
    let metrics = worker_pool.shutdown().await;
    retention.await.ok();
    info!(?metrics, "Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

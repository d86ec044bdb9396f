use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use subcults_api::bounded_contexts::firehose::application::indexer::{Indexer, IndexerConfig};
use subcults_api::bounded_contexts::firehose::infrastructure::repositories::postgres::{
    PostgresCursorRepository, PostgresRecordRepository,
};
use subcults_api::router::build_router;
use subcults_api::shared::infrastructure::app_state::AppState;
use subcults_api::shared::infrastructure::config::AppConfig;
use subcults_api::shared::infrastructure::database;

const JANITOR_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(bind = %config.bind_addr, "starting subcults-api");

    let pool = database::connect(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let state = AppState::with_postgres(&config, pool.clone())?;

    let indexer = Arc::new(
        Indexer::new(
            Arc::new(PostgresRecordRepository::new(pool.clone())),
            Arc::new(PostgresCursorRepository::new(pool.clone())),
            state.metrics.clone(),
            IndexerConfig::new(config.firehose_url.clone()),
        )
        .await?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let trust_handle = tokio::spawn(state.trust_service.clone().run(shutdown_rx.clone()));
    let indexer_handle = tokio::spawn(indexer.run(shutdown_rx.clone()));
    let janitor_handle = tokio::spawn(janitor_loop(state.clone(), shutdown_rx.clone()));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting is done; tell the workers, then give them their drain
    // window before the pool closes.
    tracing::info!("shutting down background workers");
    let _ = shutdown_tx.send(true);
    let drain = async {
        let _ = trust_handle.await;
        let _ = indexer_handle.await;
        let _ = janitor_handle.await;
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("workers did not drain before the shutdown deadline");
    }
    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

/// Hourly retention pass: expired idempotency keys are dropped and audit IPs
/// past their window are anonymized.
async fn janitor_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match state.payment_service.cleanup_expired_idempotency_keys().await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "expired idempotency keys removed");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "idempotency cleanup failed"),
                }
                match state.audit.anonymize_expired_ips(chrono::Utc::now()).await {
                    Ok(changed) if changed > 0 => {
                        tracing::info!(changed, "audit IPs anonymized");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "audit anonymization failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

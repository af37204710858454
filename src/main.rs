use processor_failover::config::{AppConfig, StorageBackend};
use processor_failover::gateways::http::HttpProcessorGateway;
use processor_failover::gateways::ProcessorClient;
use processor_failover::repo::health_repo::HealthRepo;
use processor_failover::repo::in_memory::InMemoryStore;
use processor_failover::repo::payments_repo::PaymentsRepo;
use processor_failover::repo::redis_store::RedisStore;
use processor_failover::repo::{HealthStore, PaymentStore};
use processor_failover::service::health_monitor::HealthMonitor;
use processor_failover::service::payment_service::PaymentService;
use processor_failover::service::retry_engine::{drain_or_abort, RetryEngine, RetryPolicy};
use processor_failover::AppState;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let mut pool: Option<PgPool> = None;
    let (payment_store, health_store): (Arc<dyn PaymentStore>, Arc<dyn HealthStore>) = match cfg.storage_backend {
        StorageBackend::Postgres => {
            let pg = PgPoolOptions::new()
                .max_connections(cfg.db_max_connections)
                .connect(&cfg.database_url)
                .await?;
            sqlx::migrate!("./migrations").run(&pg).await?;
            pool = Some(pg.clone());
            (
                Arc::new(PaymentsRepo { pool: pg.clone() }),
                Arc::new(HealthRepo { pool: pg }),
            )
        }
        StorageBackend::Redis => {
            let store = RedisStore::new(&cfg.redis_url)?;
            (Arc::new(store.clone()), Arc::new(store))
        }
        StorageBackend::Memory => {
            let store = InMemoryStore::new();
            (Arc::new(store.clone()), Arc::new(store))
        }
    };
    tracing::info!(backend = ?cfg.storage_backend, "storage ready");

    let gateway: Arc<dyn ProcessorClient> = Arc::new(HttpProcessorGateway::new(
        cfg.default_processor_url.clone(),
        cfg.fallback_processor_url.clone(),
        cfg.processor_api_token.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_monitor = HealthMonitor::new(gateway.clone(), health_store);
    let monitor_handle = if cfg.start_health_checker {
        Some(tokio::spawn(health_monitor.clone().run(shutdown_rx.clone())))
    } else {
        tracing::info!("health checker disabled");
        None
    };

    let policy = RetryPolicy {
        capacity: cfg.retry_queue_capacity,
        enqueue_timeout: cfg.retry_enqueue_timeout,
        ..RetryPolicy::default()
    };
    let (engine, retry_queue) = RetryEngine::new(
        gateway.clone(),
        payment_store.clone(),
        health_monitor.clone(),
        policy,
    );
    let engine_handle = tokio::spawn(engine.run(shutdown_rx.clone()));

    match retry_queue.restore(payment_store.as_ref()).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("restored {} unsettled payments into the retry queue", n),
        Err(e) => tracing::error!("could not restore unsettled payments: {:#}", e),
    }

    let state = AppState {
        payment_service: PaymentService::new(gateway, payment_store, retry_queue),
        health_monitor,
    };

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, processor_failover::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("http server stopped, draining retry queue");
    let _ = shutdown_tx.send(true);

    if !drain_or_abort(engine_handle, cfg.shutdown_grace).await {
        tracing::warn!(
            "retry queue not drained within {:?}, engine aborted, remaining payments stay pending",
            cfg.shutdown_grace
        );
    }
    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }

    if let Some(pool) = pool {
        pool.close().await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

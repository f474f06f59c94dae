use Paydesk_backend::api::{self, ApiState};
use Paydesk_backend::config::AppConfig;
use Paydesk_backend::coordination::redis::{init_coordination_pool, CoordinationPoolConfig};
use Paydesk_backend::coordination::{
    CoordinationStore, DepositAttemptLimiter, MemoryCoordinationStore, OrderLockService,
    RedisCoordinationStore, ReviewerRing,
};
use Paydesk_backend::database::{self, PgDepositStore, PgRouteStore, PgWithdrawalStore};
use Paydesk_backend::engine::{
    DepositEngine, DepositStore, LogNotifier, MemoryDepositStore, MemoryLedger,
    MemoryRouteStore, MemoryWithdrawalStore, Notifier, WithdrawalEngine, WithdrawalStore,
};
use Paydesk_backend::routing::RouteStore;
use Paydesk_backend::logging::init_tracing;
use Paydesk_backend::providers::ProviderRegistry;
use Paydesk_backend::routing::ChannelRouter;

use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);

    let skip_externals = std::env::var("SKIP_EXTERNALS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Paydesk backend service"
    );

    // Coordination store: Redis in production, in-process when skipping
    // externals.
    let coordination: Arc<dyn CoordinationStore> = if skip_externals {
        info!("⏭️  Using in-process coordination store (SKIP_EXTERNALS=true)");
        Arc::new(MemoryCoordinationStore::new())
    } else {
        info!("🔄 Initializing coordination store...");
        let pool = init_coordination_pool(CoordinationPoolConfig {
            redis_url: config.coordination.redis_url.clone(),
            max_connections: config.coordination.max_connections,
            connection_timeout: Duration::from_secs(config.coordination.connection_timeout),
            ..Default::default()
        })
        .await
        .map_err(|e| {
            error!("Failed to initialize coordination store: {}", e);
            anyhow::anyhow!(e)
        })?;
        info!(redis_url = %config.coordination.redis_url, "✅ Coordination store initialized");
        Arc::new(RedisCoordinationStore::new(pool))
    };

    // Order and route storage.
    let (db_pool, deposit_store, withdrawal_store, route_store) = if skip_externals {
        info!("⏭️  Using in-memory stores (SKIP_EXTERNALS=true)");
        let ledger = MemoryLedger::new();
        (
            None,
            Arc::new(MemoryDepositStore::new(ledger.clone())) as Arc<dyn DepositStore>,
            Arc::new(MemoryWithdrawalStore::new(ledger)) as Arc<dyn WithdrawalStore>,
            Arc::new(MemoryRouteStore::new()) as Arc<dyn RouteStore>,
        )
    } else {
        info!("📊 Initializing database connection pool...");
        let pool = database::init_pool_from_config(&config.database)
            .await
            .map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                anyhow::anyhow!(e)
            })?;
        info!("✅ Database connection pool initialized");
        (
            Some(pool.clone()),
            Arc::new(PgDepositStore::new(pool.clone())) as Arc<dyn DepositStore>,
            Arc::new(PgWithdrawalStore::new(pool.clone())) as Arc<dyn WithdrawalStore>,
            Arc::new(PgRouteStore::new(pool)) as Arc<dyn RouteStore>,
        )
    };

    // Provider registry.
    let registry = if skip_externals {
        info!("⏭️  Skipping provider initialization (SKIP_EXTERNALS=true)");
        Arc::new(ProviderRegistry::new())
    } else {
        let registry = ProviderRegistry::from_env().map_err(|e| {
            error!("Failed to initialize provider registry: {}", e);
            anyhow::anyhow!(e)
        })?;
        info!(providers = registry.list().len(), "✅ Provider registry initialized");
        Arc::new(registry)
    };

    let locks = Arc::new(OrderLockService::new(
        coordination.clone(),
        Duration::from_secs(config.engine.order_lock_ttl_secs),
    ));
    let limiter = Arc::new(DepositAttemptLimiter::new(coordination.clone()));
    let ring = Arc::new(ReviewerRing::new(
        coordination.clone(),
        config.engine.reviewer_max_open as usize,
    ));
    let router = Arc::new(ChannelRouter::new(route_store));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let deposits = Arc::new(DepositEngine::new(
        deposit_store,
        registry.clone(),
        router.clone(),
        locks.clone(),
        limiter,
        coordination.clone(),
        notifier.clone(),
        config.engine.public_base_url.clone(),
    ));
    let withdrawals = Arc::new(WithdrawalEngine::new(
        withdrawal_store,
        registry,
        locks,
        ring,
        coordination,
        notifier,
        config.engine.public_base_url.clone(),
    ));

    let state = Arc::new(ApiState {
        deposits,
        withdrawals,
        db_pool,
    });
    let app = api::router(state);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    info!(addr = %addr, "🌐 Listening for provider callbacks");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Paydesk backend stopped");
    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::config::Config;
use tollgate::db::{self, MemoryStore, PaymentStore, PgStore};
use tollgate::{build_state, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    // Select the store backend
    let store: Arc<dyn PaymentStore> = match config.store.backend.as_str() {
        "memory" => {
            info!("Using in-memory store (nothing survives a restart)");
            Arc::new(MemoryStore::new())
        }
        "postgres" => {
            if config.database.url.is_empty() {
                anyhow::bail!("DATABASE_URL must be set when STORE_BACKEND=postgres");
            }
            let pool = db::create_pool(&config.database).await?;

            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            info!("Database migrations completed");

            Arc::new(PgStore::new(pool))
        }
        other => anyhow::bail!("unknown store backend: {other}"),
    };

    // Wire the engine
    let state = build_state(config.clone(), store);

    // Reconcile transactions left pending by a previous run
    let resumed = state.monitor.resume_pending().await?;
    if resumed > 0 {
        info!("Resumed confirmation polling for {resumed} transactions");
    }

    // Periodic usage/revenue rollup for the current day
    Arc::clone(&state.aggregator).spawn_interval(Duration::from_secs(6 * 60 * 60));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use auth::PasswordHashing;
use common::database::{init_pool, run_migrations};
use realtime::cleanup::TempDirCleanup;
use realtime::config::StorageBackend;
use realtime::{AppState, Settings, Storage, routes, sweeper};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log.filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting realtime service");

    let storage = match settings.storage.backend {
        StorageBackend::Postgres => {
            let pool = init_pool(&settings.database).await?;
            if !common::health_check(&pool).await? {
                anyhow::bail!("Failed to connect to database");
            }
            run_migrations(&pool).await?;
            Storage::Postgres(pool)
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage, nothing will be persisted");
            Storage::Memory
        }
    };

    let state = AppState::build(
        &settings,
        storage,
        PasswordHashing::default(),
        Arc::new(TempDirCleanup::new(&settings.cleanup.temp_dir)),
    );

    let mut scheduler = sweeper::start_session_sweeper(
        state.gateway.sessions().clone(),
        &settings.session.sweep_schedule,
    )
    .await?;

    let app = routes::create_router(state);
    let listener = TcpListener::bind(&settings.server.bind_address).await?;
    info!("Realtime service listening on {}", settings.server.bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    scheduler.shutdown().await?;
    Ok(())
}

use rideasy::config::AppConfig;
use rideasy::db::{init_pool, run_migrations};
use rideasy::error::AppError;
use rideasy::routes::create_router;
use rideasy::services::notifier::NotificationRegistry;
use rideasy::state::AppState;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;
    run_migrations(&db).await?;

    let registry = NotificationRegistry::new();
    let state = AppState::new(config.clone(), db.clone(), registry.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = config.match_sweep_interval.map(|interval| {
        info!(?interval, "starting match sweeper");
        state
            .rides
            .matcher()
            .clone()
            .spawn_sweeper(interval, shutdown_rx)
    });

    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(registry, shutdown_tx))
        .await?;

    if let Some(handle) = sweeper {
        if let Err(err) = handle.await {
            warn!("match sweeper ended abnormally: {err}");
        }
    }
    db.close().await;

    Ok(())
}

/// Resolves on ctrl-c after stopping the sweeper and closing every socket,
/// so open WebSockets do not hold the graceful shutdown open.
async fn shutdown_signal(registry: NotificationRegistry, sweeper: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("could not listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
    let _ = sweeper.send(true);
    registry.shutdown().await;
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,rideasy=debug,tower_http=info".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

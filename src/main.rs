use std::sync::Arc;

use timeblind::config::AppConfig;
use timeblind::db::{init_pool, migrate};
use timeblind::error::AppError;
use timeblind::monitor::{Collaborators, SystemClock};
use timeblind::routes::create_router;
use timeblind::services::{
    estimator::OsrmEstimator, geocoder::NominatimGeocoder, live_status::FileLiveStatus,
    location::DeviceLocation, store::SqliteStore,
};
use timeblind::state::AppState;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;

    if let Err(err) = migrate(&db).await {
        error!("migration failed: {err:?}");
        return Err(err);
    }

    let store = SqliteStore::new(db.clone());
    store.ensure_uncategorized().await?;

    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|err| AppError::Other(err.into()))?;

    let location = DeviceLocation::new(config.origin);
    if config.origin.is_none() {
        warn!("no ORIGIN_LAT/ORIGIN_LON set; travel estimates wait for PUT /location");
    }

    let live_status = FileLiveStatus::new(
        config.live_status_path.clone(),
        config.live_status_enabled,
    );
    if let Err(err) = live_status.discard_orphan().await {
        warn!("could not clear live status from a previous run: {err}");
    }

    let collaborators = Collaborators {
        store: Arc::new(store.clone()),
        geocoder: Arc::new(NominatimGeocoder::new(
            client.clone(),
            config.geocoder_url.clone(),
        )),
        estimator: Arc::new(OsrmEstimator::new(
            client,
            config.router_url.clone(),
            location.clone(),
        )),
        surface: Arc::new(live_status.clone()),
    };

    let state = AppState::new(
        config.clone(),
        store,
        collaborators,
        location,
        live_status,
        Arc::new(SystemClock),
    );
    state.monitor.start().await;

    let app = create_router(state.clone());

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.monitor.stop().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down..."),
        Err(err) => {
            error!("could not listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,timeblind=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

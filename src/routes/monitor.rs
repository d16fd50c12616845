use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::AppError,
    models::{destination::Coordinate, live_status::LiveStatusRecord},
    monitor::{CycleReport, MonitorState, MonitorStatus},
    services::live_status::LiveStatusSurface,
    state::AppState,
};

use super::request_sync;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/monitor", get(overview))
        .route("/monitor/sync", post(sync))
        .route("/monitor/start", post(start))
        .route("/monitor/stop", post(stop))
        .route("/monitor/live-status", put(set_live_status))
        .route("/location", put(set_location))
}

#[derive(Serialize)]
struct Overview {
    state: MonitorState,
    live_status_enabled: bool,
    status: MonitorStatus,
    live_record: Option<LiveStatusRecord>,
}

async fn overview(State(state): State<AppState>) -> Result<Json<Overview>, AppError> {
    let live_record = state
        .live_status
        .current()
        .await
        .map_err(|err| AppError::Other(err.into()))?;
    Ok(Json(Overview {
        state: state.monitor.state().await,
        live_status_enabled: state.live_status.is_enabled(),
        status: state.monitor.status(),
        live_record,
    }))
}

async fn sync(State(state): State<AppState>) -> Json<CycleReport> {
    Json(state.monitor.sync_now().await)
}

#[derive(Serialize)]
struct Toggled {
    changed: bool,
}

async fn start(State(state): State<AppState>) -> Json<Toggled> {
    let changed = state.monitor.start().await;
    Json(Toggled { changed })
}

async fn stop(State(state): State<AppState>) -> Json<Toggled> {
    let changed = state.monitor.stop().await;
    Json(Toggled { changed })
}

#[derive(Deserialize)]
struct LiveStatusForm {
    enabled: bool,
}

async fn set_live_status(
    State(state): State<AppState>,
    Json(form): Json<LiveStatusForm>,
) -> StatusCode {
    state.live_status.set_enabled(form.enabled);
    info!(enabled = form.enabled, "live status capability changed");
    if form.enabled {
        request_sync(&state);
    }
    StatusCode::NO_CONTENT
}

async fn set_location(
    State(state): State<AppState>,
    Json(coordinate): Json<Coordinate>,
) -> Result<StatusCode, AppError> {
    if !(-90.0..=90.0).contains(&coordinate.latitude)
        || !(-180.0..=180.0).contains(&coordinate.longitude)
    {
        warn!(?coordinate, "rejected out of range location");
        return Err(AppError::BadRequest("coordinate out of range".into()));
    }
    state.location.set(coordinate).await;
    request_sync(&state);
    Ok(StatusCode::NO_CONTENT)
}

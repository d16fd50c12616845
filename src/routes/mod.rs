pub mod destinations;
pub mod groups;
pub mod monitor;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(groups::router())
        .merge(destinations::router())
        .merge(monitor::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Queues an immediate cycle after an edit without holding up the response.
fn request_sync(state: &AppState) {
    let monitor = state.monitor.clone();
    tokio::spawn(async move {
        let report = monitor.sync_now().await;
        debug!(outcome = ?report.outcome, "sync after edit");
    });
}

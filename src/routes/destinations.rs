use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::{
    error::AppError,
    models::destination::{Destination, DestinationFilter, DestinationUpdate, NewDestination},
    services::store::DestinationStore,
    state::AppState,
};

use super::request_sync;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/destinations", post(create_destination))
        .route(
            "/destinations/:id",
            get(get_destination)
                .patch(update_destination)
                .delete(delete_destination),
        )
        .route("/destinations/:id/move", post(move_destination))
}

fn required(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

async fn resolve_group(state: &AppState, group_id: Option<String>) -> Result<String, AppError> {
    match group_id {
        Some(id) => Ok(state.store.get_group(&id).await?.id),
        None => Ok(state.store.ensure_uncategorized().await?.id),
    }
}

/// Geocodes up front so a destination is never saved with an unknown address.
async fn create_destination(
    State(state): State<AppState>,
    Json(form): Json<NewDestination>,
) -> Result<(StatusCode, Json<Destination>), AppError> {
    let name = required(&form.name, "name")?;
    let address = required(&form.address, "address")?;
    let group_id = resolve_group(&state, form.group_id).await?;

    let coordinate = state.geocoder.geocode(&address).await?;
    let mut destination = Destination::new(name, address)
        .with_coordinate(coordinate)
        .in_group(group_id);
    destination.last_geocoded = Some(Utc::now());
    destination.target_arrival_time = form.target_arrival_time;

    let saved = state.store.insert_destination(&destination).await?;
    info!(destination = %saved.id, "destination created");
    if saved.target_arrival_time.is_some() {
        request_sync(&state);
    }
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn get_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Destination>, AppError> {
    Ok(Json(state.store.get_destination(&id).await?))
}

async fn update_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<DestinationUpdate>,
) -> Result<Json<Destination>, AppError> {
    let mut destination = state.store.get_destination(&id).await?;
    let had_target = destination.target_arrival_time.is_some();

    if let Some(name) = update.name.as_deref() {
        destination.name = required(name, "name")?;
    }
    if let Some(address) = update.address.as_deref() {
        let address = required(address, "address")?;
        if address != destination.address {
            // Re-geocoded lazily on the next lookup.
            destination.address = address;
            destination.coordinate = None;
            destination.last_geocoded = None;
        }
    }
    if let Some(group_id) = update.group_id {
        destination.group_id = Some(resolve_group(&state, Some(group_id)).await?);
    }
    if let Some(target) = update.target_arrival_time {
        destination.target_arrival_time = target;
    }

    let saved = state.store.update_destination(&destination).await?;
    if had_target || saved.target_arrival_time.is_some() {
        request_sync(&state);
    }
    Ok(Json(saved))
}

async fn delete_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete_destination(&id).await?;
    info!(destination = %id, "destination deleted");
    request_sync(&state);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct MoveForm {
    to: usize,
}

async fn move_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<MoveForm>,
) -> Result<Json<Vec<Destination>>, AppError> {
    let destination = state.store.get_destination(&id).await?;
    let Some(group_id) = destination.group_id else {
        return Err(AppError::BadRequest("destination has no group".into()));
    };
    state.store.normalize_order(&group_id).await?;
    let siblings = state
        .store
        .fetch(DestinationFilter::InGroup(group_id.clone()))
        .await?;
    let from = siblings
        .iter()
        .position(|d| d.id == id)
        .ok_or(AppError::NotFound)?;
    Ok(Json(state.store.move_destination(&group_id, from, form.to).await?))
}

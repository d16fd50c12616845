use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::AppError,
    models::{
        destination::{Destination, DestinationFilter},
        group::{Group, UNCATEGORIZED},
    },
    services::{eta::EtaEntry, store::DestinationStore},
    state::AppState,
};

use super::request_sync;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/:id", patch(rename_group).delete(delete_group))
        .route("/groups/:id/destinations", get(group_destinations))
        .route("/groups/:id/etas", get(group_etas))
}

#[derive(Deserialize)]
struct GroupForm {
    name: String,
}

impl GroupForm {
    fn name(&self) -> Result<&str, AppError> {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            return Err(AppError::BadRequest("group name must not be empty".into()));
        }
        if trimmed == UNCATEGORIZED {
            return Err(AppError::BadRequest(format!("{UNCATEGORIZED} is reserved")));
        }
        Ok(trimmed)
    }
}

async fn list_groups(State(state): State<AppState>) -> Result<Json<Vec<Group>>, AppError> {
    state.store.ensure_uncategorized().await?;
    Ok(Json(state.store.list_groups().await?))
}

async fn create_group(
    State(state): State<AppState>,
    Json(form): Json<GroupForm>,
) -> Result<(StatusCode, Json<Group>), AppError> {
    let group = state.store.create_group(form.name()?).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn rename_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<GroupForm>,
) -> Result<Json<Group>, AppError> {
    let group = state.store.get_group(&id).await?;
    if group.is_uncategorized() {
        return Err(AppError::Forbidden);
    }
    Ok(Json(state.store.rename_group(&id, form.name()?).await?))
}

async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let group = state.store.get_group(&id).await?;
    if group.is_uncategorized() {
        return Err(AppError::Forbidden);
    }
    state.store.delete_group(&id).await?;
    request_sync(&state);
    Ok(StatusCode::NO_CONTENT)
}

async fn group_destinations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Destination>>, AppError> {
    state.store.get_group(&id).await?;
    state.store.normalize_order(&id).await?;
    let destinations = state.store.fetch(DestinationFilter::InGroup(id)).await?;
    Ok(Json(destinations))
}

async fn group_etas(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EtaEntry>>, AppError> {
    state.store.get_group(&id).await?;
    Ok(Json(state.eta.refresh_group(&id).await?))
}

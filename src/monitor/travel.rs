use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    error::LookupError,
    models::destination::{Coordinate, Destination, DestinationChange},
    services::estimator::TravelEstimate,
};

use super::Collaborators;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelData {
    pub coordinate: Coordinate,
    pub estimate: TravelEstimate,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TravelFailure {
    #[error("geocoding failed: {0}")]
    Geocoding(LookupError),
    #[error("estimation failed: {0}")]
    Estimation(LookupError),
}

/// Resolves the destination's coordinate if needed, then estimates travel.
///
/// A freshly geocoded coordinate is written back to the store; a failed write
/// is logged and does not abort the lookup.
pub async fn lookup(
    destination: &Destination,
    collaborators: &Collaborators,
    now: DateTime<Utc>,
) -> Result<TravelData, TravelFailure> {
    let coordinate = match destination.coordinate {
        Some(coordinate) => coordinate,
        None => {
            let coordinate = collaborators
                .geocoder
                .geocode(&destination.address)
                .await
                .map_err(TravelFailure::Geocoding)?;
            let change = DestinationChange::SetCoordinate {
                id: destination.id.clone(),
                coordinate,
                geocoded_at: now,
            };
            if let Err(err) = collaborators.store.save(&[change]).await {
                warn!(destination = %destination.id, "could not persist geocoded coordinate: {err}");
            }
            coordinate
        }
    };

    let estimate = collaborators
        .estimator
        .estimate(coordinate)
        .await
        .map_err(TravelFailure::Estimation)?;
    debug!(
        destination = %destination.id,
        travel_minutes = estimate.travel_minutes,
        "travel data refreshed"
    );
    Ok(TravelData {
        coordinate,
        estimate,
    })
}

/// Like [`lookup`], but a failure just means "no travel data this cycle".
pub async fn fetch_travel(
    destination: &Destination,
    collaborators: &Collaborators,
    now: DateTime<Utc>,
) -> Option<TravelData> {
    match lookup(destination, collaborators, now).await {
        Ok(data) => Some(data),
        Err(err) => {
            warn!(destination = %destination.id, "skipping refresh: {err}");
            None
        }
    }
}

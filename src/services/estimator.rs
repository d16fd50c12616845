use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{
    error::LookupError,
    models::destination::Coordinate,
    services::location::DeviceLocation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelEstimate {
    pub arrival_time: DateTime<Utc>,
    pub travel_minutes: i64,
}

impl TravelEstimate {
    /// Whole minutes, truncated, departing at `departure`.
    pub fn from_seconds(departure: DateTime<Utc>, travel_seconds: f64) -> Self {
        let travel_seconds = travel_seconds.max(0.0);
        Self {
            arrival_time: departure + Duration::seconds(travel_seconds.round() as i64),
            travel_minutes: (travel_seconds / 60.0) as i64,
        }
    }
}

/// Estimates travel from the user's current location.
#[async_trait]
pub trait TravelEstimator: Send + Sync {
    async fn estimate(&self, destination: Coordinate) -> Result<TravelEstimate, LookupError>;
}

/// Driving estimates from an OSRM-compatible `/route/v1/driving` endpoint.
#[derive(Clone)]
pub struct OsrmEstimator {
    client: reqwest::Client,
    base_url: Url,
    location: DeviceLocation,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<Route>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Route {
    duration: f64,
}

impl OsrmEstimator {
    pub fn new(client: reqwest::Client, base_url: Url, location: DeviceLocation) -> Self {
        Self {
            client,
            base_url,
            location,
        }
    }

    fn route_url(&self, from: Coordinate, to: Coordinate) -> Result<Url, LookupError> {
        let mut url = self.base_url.clone();
        let coordinates = format!(
            "{},{};{},{}",
            from.longitude, from.latitude, to.longitude, to.latitude
        );
        url.path_segments_mut()
            .map_err(|_| LookupError::Transport("router url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["route", "v1", "driving", coordinates.as_str()]);
        url.query_pairs_mut()
            .append_pair("overview", "false")
            .append_pair("alternatives", "false");
        Ok(url)
    }
}

#[async_trait]
impl TravelEstimator for OsrmEstimator {
    async fn estimate(&self, destination: Coordinate) -> Result<TravelEstimate, LookupError> {
        let origin = self
            .location
            .current()
            .await
            .ok_or(LookupError::LocationUnavailable)?;
        let url = self.route_url(origin, destination)?;
        let departure = Utc::now();

        // The router reports "no route" with a 400 and a JSON body.
        let response: RouteResponse = self.client.get(url).send().await?.json().await?;
        let duration = interpret(response)?;
        let estimate = TravelEstimate::from_seconds(departure, duration);
        debug!(travel_minutes = estimate.travel_minutes, "estimated travel time");
        Ok(estimate)
    }
}

fn interpret(response: RouteResponse) -> Result<f64, LookupError> {
    match response.code.as_str() {
        "Ok" => response
            .routes
            .first()
            .map(|route| route.duration)
            .ok_or(LookupError::NoRoute),
        "NoRoute" | "NoSegment" => Err(LookupError::NoRoute),
        other => Err(LookupError::Transport(format!(
            "router returned {other}: {}",
            response.message.unwrap_or_default()
        ))),
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{error::LookupError, models::destination::Coordinate};

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolves a free-text address; `NotFound` when nothing matches.
    async fn geocode(&self, address: &str) -> Result<Coordinate, LookupError>;
}

/// Geocoder backed by a Nominatim-compatible `/search` endpoint.
#[derive(Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn search_url(&self, address: &str) -> Result<Url, LookupError> {
        let mut url = self
            .base_url
            .join("search")
            .map_err(|err| LookupError::Transport(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("q", address)
            .append_pair("format", "jsonv2")
            .append_pair("limit", "1");
        Ok(url)
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Coordinate, LookupError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(LookupError::NotFound);
        }
        let url = self.search_url(address)?;
        let places: Vec<Place> = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let place = places.into_iter().next().ok_or(LookupError::NotFound)?;
        let coordinate = parse_place(&place)?;
        debug!(%address, ?coordinate, "geocoded address");
        Ok(coordinate)
    }
}

fn parse_place(place: &Place) -> Result<Coordinate, LookupError> {
    let latitude = place
        .lat
        .parse()
        .map_err(|_| LookupError::Transport(format!("invalid latitude {:?}", place.lat)))?;
    let longitude = place
        .lon
        .parse()
        .map_err(|_| LookupError::Transport(format!("invalid longitude {:?}", place.lon)))?;
    Ok(Coordinate::new(latitude, longitude))
}

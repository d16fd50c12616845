use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub group_id: Option<String>,
    /// Joined from the owning group for display; not persisted on the row.
    pub group_name: Option<String>,
    pub name: String,
    pub address: String,
    pub coordinate: Option<Coordinate>,
    pub target_arrival_time: Option<DateTime<Utc>>,
    pub last_geocoded: Option<DateTime<Utc>>,
    pub order_index: i64,
}

impl Destination {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id: None,
            group_name: None,
            name: name.into(),
            address: address.into(),
            coordinate: None,
            target_arrival_time: None,
            last_geocoded: None,
            order_index: 0,
        }
    }

    pub fn with_target(mut self, target: DateTime<Utc>) -> Self {
        self.target_arrival_time = Some(target);
        self
    }

    pub fn with_coordinate(mut self, coordinate: Coordinate) -> Self {
        self.coordinate = Some(coordinate);
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// Row shape as stored; the coordinate columns are nullable independently.
#[derive(Debug, FromRow)]
pub(crate) struct DestinationRow {
    pub id: String,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub target_arrival_time: Option<DateTime<Utc>>,
    pub last_geocoded: Option<DateTime<Utc>>,
    pub order_index: i64,
}

impl From<DestinationRow> for Destination {
    fn from(row: DestinationRow) -> Self {
        let coordinate = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinate::new(latitude, longitude)),
            _ => None,
        };
        Self {
            id: row.id,
            group_id: row.group_id,
            group_name: row.group_name,
            name: row.name,
            address: row.address,
            coordinate,
            target_arrival_time: row.target_arrival_time,
            last_geocoded: row.last_geocoded,
            order_index: row.order_index,
        }
    }
}

/// Field mutations the monitor hands back to the store in one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DestinationChange {
    ClearTarget {
        id: String,
    },
    SetCoordinate {
        id: String,
        coordinate: Coordinate,
        geocoded_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationFilter {
    All,
    WithTarget,
    InGroup(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDestination {
    pub name: String,
    pub address: String,
    pub group_id: Option<String>,
    pub target_arrival_time: Option<DateTime<Utc>>,
}

/// Partial edit; `target_arrival_time: Some(None)` clears the deadline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DestinationUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub group_id: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub target_arrival_time: Option<Option<DateTime<Utc>>>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<DateTime<Utc>>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_without_both_coordinates_has_none() {
        let row = DestinationRow {
            id: "a".into(),
            group_id: None,
            group_name: None,
            name: "Gym".into(),
            address: "1 Main St".into(),
            latitude: Some(1.0),
            longitude: None,
            target_arrival_time: None,
            last_geocoded: None,
            order_index: 0,
        };
        assert_eq!(Destination::from(row).coordinate, None);
    }

    #[test]
    fn update_distinguishes_null_from_missing_target() {
        let missing: DestinationUpdate = serde_json::from_str(r#"{"name":"x"}"#).expect("parse");
        assert_eq!(missing.target_arrival_time, None);

        let cleared: DestinationUpdate =
            serde_json::from_str(r#"{"target_arrival_time":null}"#).expect("parse");
        assert_eq!(cleared.target_arrival_time, Some(None));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{destination::Destination, trip::TripSnapshot};

/// Fixed attributes of a live status record, set once on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatusAttributes {
    pub destination_name: String,
    pub destination_address: String,
    pub group_name: Option<String>,
}

impl From<&Destination> for LiveStatusAttributes {
    fn from(destination: &Destination) -> Self {
        Self {
            destination_name: destination.name.clone(),
            destination_address: destination.address.clone(),
            group_name: destination.group_name.clone(),
        }
    }
}

/// The part of a live status record that is updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatusContent {
    pub leave_by: DateTime<Utc>,
    pub target_time: DateTime<Utc>,
    pub travel_minutes: i64,
}

impl From<&TripSnapshot> for LiveStatusContent {
    fn from(snapshot: &TripSnapshot) -> Self {
        Self {
            leave_by: snapshot.leave_by,
            target_time: snapshot.target_time,
            travel_minutes: snapshot.travel_minutes,
        }
    }
}

/// Opaque reference to a record created on a live status surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LiveStatusHandle(pub String);

/// What a surface currently displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatusRecord {
    pub handle: LiveStatusHandle,
    pub attributes: LiveStatusAttributes,
    pub content: LiveStatusContent,
}

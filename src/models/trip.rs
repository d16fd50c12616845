use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::destination::Coordinate;

/// The trip tracked during one sync cycle. Replaced wholesale every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub destination_id: String,
    pub coordinate: Coordinate,
    pub target_time: DateTime<Utc>,
    pub travel_minutes: i64,
    pub leave_by: DateTime<Utc>,
}

impl TripSnapshot {
    pub fn new(
        destination_id: impl Into<String>,
        coordinate: Coordinate,
        target_time: DateTime<Utc>,
        travel_minutes: i64,
    ) -> Self {
        Self {
            destination_id: destination_id.into(),
            coordinate,
            target_time,
            travel_minutes,
            leave_by: target_time - Duration::minutes(travel_minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn leave_by_is_target_minus_travel() {
        let target = Utc.with_ymd_and_hms(2025, 10, 28, 17, 0, 0).unwrap();
        let snapshot = TripSnapshot::new("d", Coordinate::new(0.0, 0.0), target, 25);
        assert_eq!(
            snapshot.leave_by,
            Utc.with_ymd_and_hms(2025, 10, 28, 16, 35, 0).unwrap()
        );
    }
}

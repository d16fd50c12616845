use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::models::destination::Destination;

/// A destination together with the deadline being tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub destination: Destination,
    pub target: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Earliest upcoming trip inside the window.
    pub next: Option<Candidate>,
    /// Destinations whose target is not today or already passed.
    pub expired: Vec<String>,
    /// Destinations that still hold a valid target, in or out of the window.
    pub live: Vec<String>,
}

/// Picks the next trip to track.
///
/// Calendar days are judged in `now`'s offset. Ties on the target time are
/// broken by destination id.
pub fn select_trip<Tz: TimeZone>(
    now: &DateTime<Tz>,
    destinations: impl IntoIterator<Item = Destination>,
    window: Duration,
) -> Selection {
    let now_utc = now.with_timezone(&Utc);
    let today = now.date_naive();
    let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);

    let mut selection = Selection::default();
    for destination in destinations {
        let Some(target) = destination.target_arrival_time else {
            continue;
        };
        let local_day = target.with_timezone(&now.timezone()).date_naive();
        if local_day != today || target < now_utc {
            selection.expired.push(destination.id);
            continue;
        }
        selection.live.push(destination.id.clone());

        if (target - now_utc).num_seconds() > window_secs {
            continue;
        }
        let earlier = match &selection.next {
            None => true,
            Some(best) => (target, &destination.id) < (best.target, &best.destination.id),
        };
        if earlier {
            selection.next = Some(Candidate {
                destination,
                target,
            });
        }
    }
    selection
}

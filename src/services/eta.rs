use std::{sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    models::{
        destination::{Destination, DestinationChange, DestinationFilter},
        eta::{ArrivalStatus, EtaResult, EtaStatus, CALCULATING},
    },
    monitor::{
        clock::Clock,
        travel::{self, TravelFailure},
        Collaborators,
    },
};

/// Pause between lookups so the routing backend is not hammered.
const LOOKUP_PACING: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize)]
pub struct EtaEntry {
    pub destination: Destination,
    pub eta: EtaResult,
    pub arrival: Option<ArrivalStatus>,
    pub summary: String,
}

/// Per-destination arrival estimates for a group's list view.
#[derive(Clone)]
pub struct EtaBoard {
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    pacing: Duration,
}

impl EtaBoard {
    pub fn new(collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        Self {
            collaborators,
            clock,
            pacing: LOOKUP_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub async fn refresh_group(&self, group_id: &str) -> Result<Vec<EtaEntry>, StoreError> {
        let destinations = self
            .collaborators
            .store
            .fetch(DestinationFilter::InGroup(group_id.to_string()))
            .await?;
        Ok(self.refresh(destinations).await)
    }

    /// Looks destinations up one at a time, in order.
    pub async fn refresh(&self, mut destinations: Vec<Destination>) -> Vec<EtaEntry> {
        let now = self.clock.now();
        self.clear_stale_targets(&now, &mut destinations).await;

        let mut entries = Vec::with_capacity(destinations.len());
        let count = destinations.len();
        for (index, destination) in destinations.into_iter().enumerate() {
            let lookup = travel::lookup(&destination, &self.collaborators, now.with_timezone(&Utc));
            let eta = match lookup.await {
                Ok(data) => EtaResult {
                    arrival_time: Some(data.estimate.arrival_time),
                    travel_minutes: data.estimate.travel_minutes,
                    status: EtaStatus::Ok,
                },
                Err(failure) => {
                    warn!(destination = %destination.id, "eta refresh failed: {failure}");
                    EtaResult {
                        arrival_time: None,
                        travel_minutes: 0,
                        status: match failure {
                            TravelFailure::Geocoding(_) => EtaStatus::GeocodingFailed,
                            TravelFailure::Estimation(_) => EtaStatus::EtaFailed,
                        },
                    }
                }
            };
            entries.push(entry(destination, eta, now.offset()));

            if index + 1 < count && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }
        entries
    }

    /// Targets set for another day are dropped before showing estimates.
    async fn clear_stale_targets(
        &self,
        now: &DateTime<FixedOffset>,
        destinations: &mut [Destination],
    ) {
        let today = now.date_naive();
        let mut changes = Vec::new();
        for destination in destinations.iter_mut() {
            let Some(target) = destination.target_arrival_time else {
                continue;
            };
            if target.with_timezone(now.offset()).date_naive() != today {
                destination.target_arrival_time = None;
                changes.push(DestinationChange::ClearTarget {
                    id: destination.id.clone(),
                });
            }
        }
        if changes.is_empty() {
            return;
        }
        match self.collaborators.store.save(&changes).await {
            Ok(()) => debug!(count = changes.len(), "cleared targets from other days"),
            Err(err) => warn!("could not clear stale targets: {err}"),
        }
    }
}

fn entry(destination: Destination, eta: EtaResult, offset: &FixedOffset) -> EtaEntry {
    let arrival = match (eta.arrival_time, destination.target_arrival_time) {
        (Some(arrival), Some(target)) => {
            Some(ArrivalStatus::compare(arrival, target, eta.travel_minutes))
        }
        _ => None,
    };
    let summary = match (&arrival, eta.arrival_time) {
        (Some(status), _) => status.text.clone(),
        (None, Some(arrival_time)) => format!(
            "Arrive at {}",
            arrival_time.with_timezone(offset).format("%H:%M")
        ),
        (None, None) => CALCULATING.to_string(),
    };
    EtaEntry {
        destination,
        eta,
        arrival,
        summary,
    }
}

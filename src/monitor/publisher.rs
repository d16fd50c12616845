use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    models::{
        destination::Destination,
        live_status::{LiveStatusAttributes, LiveStatusContent, LiveStatusHandle},
        trip::TripSnapshot,
    },
    services::live_status::LiveStatusSurface,
};

/// What a reconciliation did to the external record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishAction {
    Unchanged,
    Ended,
    Updated,
    Created,
    /// Create or update failed; tracked identity was reset.
    Failed,
}

#[derive(Debug, Clone)]
struct ActiveRecord {
    handle: LiveStatusHandle,
    snapshot: TripSnapshot,
}

/// Owns the single live status record and diffs it against each new snapshot.
pub struct LivePublisher {
    surface: Arc<dyn LiveStatusSurface>,
    active: Option<ActiveRecord>,
}

impl LivePublisher {
    pub fn new(surface: Arc<dyn LiveStatusSurface>) -> Self {
        Self {
            surface,
            active: None,
        }
    }

    pub fn active(&self) -> Option<&TripSnapshot> {
        self.active.as_ref().map(|record| &record.snapshot)
    }

    pub fn active_destination(&self) -> Option<&str> {
        self.active
            .as_ref()
            .map(|record| record.snapshot.destination_id.as_str())
    }

    /// Brings the external record in line with `next`.
    ///
    /// Same destination: content is updated in place. Different destination:
    /// the old record is ended before the new one is created.
    pub async fn reconcile(&mut self, next: Option<(&Destination, TripSnapshot)>) -> PublishAction {
        let Some((destination, snapshot)) = next else {
            return if self.end_active().await {
                PublishAction::Ended
            } else {
                PublishAction::Unchanged
            };
        };

        let content = LiveStatusContent::from(&snapshot);
        if let Some(active) = self.active.as_mut() {
            if active.snapshot.destination_id == snapshot.destination_id {
                return match self.surface.update(&active.handle, content).await {
                    Ok(()) => {
                        active.snapshot = snapshot;
                        PublishAction::Updated
                    }
                    Err(err) => {
                        warn!(destination = %destination.id, "live status update failed: {err}");
                        self.end_active().await;
                        PublishAction::Failed
                    }
                };
            }
        }

        self.end_active().await;
        match self
            .surface
            .create(LiveStatusAttributes::from(destination), content)
            .await
        {
            Ok(handle) => {
                debug!(destination = %destination.id, handle = %handle.0, "tracking new trip");
                self.active = Some(ActiveRecord { handle, snapshot });
                PublishAction::Created
            }
            Err(err) => {
                warn!(destination = %destination.id, "live status creation failed: {err}");
                self.active = None;
                PublishAction::Failed
            }
        }
    }

    /// Ends the record if its destination is not among `live` any more.
    pub async fn retire_unless(&mut self, live: &[String]) -> bool {
        match self.active_destination() {
            Some(id) if !live.iter().any(|candidate| candidate == id) => self.end_active().await,
            _ => false,
        }
    }

    /// Tears the active record down. Identity is cleared even if `end` fails.
    async fn end_active(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        let destination = active.snapshot.destination_id;
        if let Err(err) = self.surface.end(active.handle).await {
            warn!(%destination, "live status end failed: {err}");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::destination::Coordinate,
        services::live_status::FileLiveStatus,
        testing::{RecordingSurface, SurfaceCall},
    };
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn trip(destination: &Destination, minutes: i64) -> (&Destination, TripSnapshot) {
        let snapshot = TripSnapshot::new(
            &destination.id,
            Coordinate::new(1.0, 2.0),
            Utc::now() + Duration::hours(1),
            minutes,
        );
        (destination, snapshot)
    }

    #[tokio::test]
    async fn same_destination_updates_in_place() {
        let surface = Arc::new(RecordingSurface::default());
        let mut publisher = LivePublisher::new(surface.clone());
        let gym = Destination::new("Gym", "1 Main St");

        assert_eq!(publisher.reconcile(Some(trip(&gym, 10))).await, PublishAction::Created);
        assert_eq!(publisher.reconcile(Some(trip(&gym, 14))).await, PublishAction::Updated);

        let calls = surface.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], SurfaceCall::Create { .. }));
        assert!(matches!(&calls[1], SurfaceCall::Update { content, .. } if content.travel_minutes == 14));
        assert_eq!(surface.live_count(), 1);
    }

    #[tokio::test]
    async fn switching_destination_ends_before_create() {
        let surface = Arc::new(RecordingSurface::default());
        let mut publisher = LivePublisher::new(surface.clone());
        let b = Destination::new("B", "b street");
        let d = Destination::new("D", "d street");

        publisher.reconcile(Some(trip(&b, 10))).await;
        publisher.reconcile(Some(trip(&d, 5))).await;

        let calls = surface.calls();
        let first = calls[0].handle().clone();
        assert_eq!(calls[1], SurfaceCall::End { handle: first });
        assert!(matches!(&calls[2], SurfaceCall::Create { attributes, .. } if attributes.destination_name == "D"));
        assert_eq!(publisher.active_destination(), Some(d.id.as_str()));
        assert_eq!(surface.live_count(), 1);
    }

    #[tokio::test]
    async fn no_trip_ends_record_once() {
        let surface = Arc::new(RecordingSurface::default());
        let mut publisher = LivePublisher::new(surface.clone());
        let gym = Destination::new("Gym", "1 Main St");

        publisher.reconcile(Some(trip(&gym, 10))).await;
        assert_eq!(publisher.reconcile(None).await, PublishAction::Ended);
        assert_eq!(publisher.reconcile(None).await, PublishAction::Unchanged);
        assert!(publisher.active().is_none());
        assert_eq!(surface.live_count(), 0);
    }

    #[tokio::test]
    async fn failed_creation_resets_identity_and_retries() {
        let surface = Arc::new(RecordingSurface::default());
        let mut publisher = LivePublisher::new(surface.clone());
        let gym = Destination::new("Gym", "1 Main St");

        surface.deny_creation(true);
        assert_eq!(publisher.reconcile(Some(trip(&gym, 10))).await, PublishAction::Failed);
        assert!(publisher.active().is_none());

        surface.deny_creation(false);
        assert_eq!(publisher.reconcile(Some(trip(&gym, 10))).await, PublishAction::Created);
    }

    #[tokio::test]
    async fn failed_update_ends_record_and_recreates_next_time() {
        let surface = Arc::new(RecordingSurface::default());
        let mut publisher = LivePublisher::new(surface.clone());
        let gym = Destination::new("Gym", "1 Main St");

        publisher.reconcile(Some(trip(&gym, 10))).await;
        surface.fail_updates(true);
        assert_eq!(publisher.reconcile(Some(trip(&gym, 12))).await, PublishAction::Failed);
        assert_eq!(surface.live_count(), 0);

        surface.fail_updates(false);
        assert_eq!(publisher.reconcile(Some(trip(&gym, 12))).await, PublishAction::Created);
        assert_eq!(surface.live_count(), 1);
    }

    #[tokio::test]
    async fn retire_unless_ends_records_for_vanished_destinations() {
        let surface = Arc::new(RecordingSurface::default());
        let mut publisher = LivePublisher::new(surface.clone());
        let gym = Destination::new("Gym", "1 Main St");
        publisher.reconcile(Some(trip(&gym, 10))).await;

        assert!(!publisher.retire_unless(&[gym.id.clone()]).await);
        assert!(publisher.retire_unless(&["other".to_string()]).await);
        assert_eq!(surface.live_count(), 0);
    }

    #[tokio::test]
    async fn restart_with_leftover_file_tracks_new_trip_after_discard() {
        let root = TempDir::new().expect("temp dir");
        let path = root.path().join("live.json");
        let old = Destination::new("Old", "old street");
        let gym = Destination::new("Gym", "1 Main St");

        let mut before_restart = LivePublisher::new(Arc::new(FileLiveStatus::new(path.clone(), true)));
        assert_eq!(before_restart.reconcile(Some(trip(&old, 10))).await, PublishAction::Created);
        drop(before_restart);

        let surface = FileLiveStatus::new(path, true);
        let mut publisher = LivePublisher::new(Arc::new(surface.clone()));
        assert_eq!(publisher.reconcile(Some(trip(&gym, 10))).await, PublishAction::Failed);

        surface.discard_orphan().await.expect("discard");
        for _ in 0..3 {
            let action = publisher.reconcile(Some(trip(&gym, 10))).await;
            assert_ne!(action, PublishAction::Failed);
        }
        let record = surface.current().await.expect("read").expect("record");
        assert_eq!(record.attributes.destination_name, "Gym");

        assert_eq!(publisher.reconcile(None).await, PublishAction::Ended);
        assert!(surface.current().await.expect("read").is_none());
    }
}

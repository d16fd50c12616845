//! Adaptive poll loop around the sync cycle.
//!
//! The loop runs one cycle, waits for the interval the policy derives from the
//! tracked deadline, and repeats until stopped. `sync_now` shares the same
//! cycle lock, so a manual refresh never overlaps a scheduled one.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::MonitorConfig,
    models::{
        destination::{DestinationChange, DestinationFilter},
        trip::TripSnapshot,
    },
};

use super::{
    clock::Clock,
    interval::PollPolicy,
    publisher::{LivePublisher, PublishAction},
    selector::select_trip,
    travel, Collaborators,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "action")]
pub enum CycleOutcome {
    /// Live status capability is off; nothing was touched.
    Disabled,
    /// The store could not be read; the previous trip state stands.
    StoreUnavailable,
    NoTrip,
    /// Travel data for the selected trip could not be fetched.
    LookupFailed,
    Published(PublishAction),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub interval: Duration,
    pub expired: usize,
    pub selected: Option<String>,
}

/// Last observed monitor status, published after every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<CycleOutcome>,
    pub interval_secs: u64,
    pub tracked_target: Option<DateTime<Utc>>,
    pub active: Option<TripSnapshot>,
}

/// State carried from one cycle to the next. Only touched under the cycle lock.
struct CycleState {
    publisher: LivePublisher,
    tracked_target: Option<DateTime<Utc>>,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct TripMonitor {
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    cycle: Mutex<CycleState>,
    running: Mutex<Option<LoopHandle>>,
    status: watch::Sender<MonitorStatus>,
}

impl TripMonitor {
    pub fn new(
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        let policy = PollPolicy::from(config);
        let publisher = LivePublisher::new(collaborators.surface.clone());
        let (status, _) = watch::channel(MonitorStatus {
            interval_secs: policy.idle.as_secs(),
            ..MonitorStatus::default()
        });
        Arc::new(Self {
            collaborators,
            clock,
            policy,
            cycle: Mutex::new(CycleState {
                publisher,
                tracked_target: None,
            }),
            running: Mutex::new(None),
            status,
        })
    }

    /// Starts the background loop. Returns `false` if it was already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().await;
        if let Some(handle) = running.as_ref() {
            if !handle.task.is_finished() {
                debug!("trip monitor already running");
                return false;
            }
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run_loop(cancel.clone()));
        *running = Some(LoopHandle { cancel, task });
        true
    }

    /// Stops the loop and waits for it to wind down. A cycle already in
    /// flight is allowed to finish; no further cycle is scheduled and the
    /// live record is ended, since nothing keeps it current any more.
    pub async fn stop(&self) -> bool {
        let Some(handle) = self.running.lock().await.take() else {
            return false;
        };
        handle.cancel.cancel();
        if let Err(err) = handle.task.await {
            warn!("trip monitor task ended abnormally: {err}");
        }
        self.end_record().await;
        true
    }

    async fn end_record(&self) {
        let mut state = self.cycle.lock().await;
        state.tracked_target = None;
        if state.publisher.reconcile(None).await == PublishAction::Ended {
            info!("live status ended with the monitor");
        }
        self.status.send_modify(|status| {
            status.tracked_target = None;
            status.active = None;
        });
    }

    pub async fn state(&self) -> MonitorState {
        match self.running.lock().await.as_ref() {
            Some(handle) if !handle.task.is_finished() => MonitorState::Running,
            _ => MonitorState::Idle,
        }
    }

    /// Runs one cycle now, queued behind any cycle already in flight.
    pub async fn sync_now(&self) -> CycleReport {
        self.run_cycle().await
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status.subscribe()
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!("trip monitor started");
        loop {
            let report = self.run_cycle().await;
            if cancel.is_cancelled() {
                break;
            }
            debug!(interval_secs = report.interval.as_secs(), "next sync scheduled");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(report.interval) => {}
            }
        }
        info!("trip monitor stopped");
    }

    async fn run_cycle(&self) -> CycleReport {
        let mut state = self.cycle.lock().await;
        let report = self.cycle_inner(&mut state).await;

        let active = state.publisher.active().cloned();
        let tracked_target = state.tracked_target;
        let now = self.clock.now().with_timezone(&Utc);
        self.status.send_modify(|status| {
            status.cycles += 1;
            status.last_cycle_at = Some(now);
            status.last_outcome = Some(report.outcome);
            status.interval_secs = report.interval.as_secs();
            status.tracked_target = tracked_target;
            status.active = active;
        });
        report
    }

    async fn cycle_inner(&self, state: &mut CycleState) -> CycleReport {
        let now = self.clock.now();
        let now_utc = now.with_timezone(&Utc);

        if !self.collaborators.surface.is_enabled() {
            debug!("live status disabled, skipping sync");
            return CycleReport {
                outcome: CycleOutcome::Disabled,
                interval: self.policy.idle,
                expired: 0,
                selected: None,
            };
        }

        let destinations = match self
            .collaborators
            .store
            .fetch(DestinationFilter::WithTarget)
            .await
        {
            Ok(destinations) => destinations,
            Err(err) => {
                warn!("could not load destinations: {err}");
                return CycleReport {
                    outcome: CycleOutcome::StoreUnavailable,
                    interval: self.policy.interval_until(state.tracked_target, now_utc),
                    expired: 0,
                    selected: None,
                };
            }
        };

        let selection = select_trip(&now, destinations, self.policy.window);
        let expired = selection.expired.len();
        if expired > 0 {
            let changes: Vec<_> = selection
                .expired
                .iter()
                .map(|id| DestinationChange::ClearTarget { id: id.clone() })
                .collect();
            match self.collaborators.store.save(&changes).await {
                Ok(()) => info!(count = expired, "cleared expired target times"),
                Err(err) => warn!("could not clear expired target times: {err}"),
            }
        }

        let Some(candidate) = selection.next else {
            state.tracked_target = None;
            state.publisher.reconcile(None).await;
            return CycleReport {
                outcome: CycleOutcome::NoTrip,
                interval: self.policy.idle,
                expired,
                selected: None,
            };
        };

        state.tracked_target = Some(candidate.target);
        let interval = self.policy.interval_until(Some(candidate.target), now_utc);
        let selected = Some(candidate.destination.id.clone());

        let Some(data) = travel::fetch_travel(&candidate.destination, &self.collaborators, now_utc).await
        else {
            state.publisher.retire_unless(&selection.live).await;
            return CycleReport {
                outcome: CycleOutcome::LookupFailed,
                interval,
                expired,
                selected,
            };
        };

        let snapshot = TripSnapshot::new(
            &candidate.destination.id,
            data.coordinate,
            candidate.target,
            data.estimate.travel_minutes,
        );
        let action = state
            .publisher
            .reconcile(Some((&candidate.destination, snapshot)))
            .await;
        CycleReport {
            outcome: CycleOutcome::Published(action),
            interval,
            expired,
            selected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::LookupError,
        models::destination::{Coordinate, Destination},
        monitor::clock::ManualClock,
        testing::{MemoryStore, RecordingSurface, ScriptedEstimator, StaticGeocoder, SurfaceCall},
    };
    use chrono::{Duration as Delta, FixedOffset, TimeZone};

    struct Harness {
        monitor: Arc<TripMonitor>,
        store: Arc<MemoryStore>,
        geocoder: Arc<StaticGeocoder>,
        estimator: Arc<ScriptedEstimator>,
        surface: Arc<RecordingSurface>,
        clock: ManualClock,
    }

    fn noon() -> chrono::DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 10, 28, 12, 0, 0)
            .unwrap()
    }

    fn destination(name: &str, in_minutes: i64) -> Destination {
        let mut destination = Destination::new(name, format!("{name} street"))
            .with_coordinate(Coordinate::new(1.0, 2.0))
            .with_target((noon() + Delta::minutes(in_minutes)).with_timezone(&Utc));
        destination.id = name.to_string();
        destination
    }

    fn harness(destinations: Vec<Destination>) -> Harness {
        let store = Arc::new(MemoryStore::new(destinations));
        let geocoder = Arc::new(StaticGeocoder::default());
        let estimator = Arc::new(ScriptedEstimator::new(20));
        let surface = Arc::new(RecordingSurface::default());
        let clock = ManualClock::new(noon());
        let monitor = TripMonitor::new(
            Collaborators {
                store: store.clone(),
                geocoder: geocoder.clone(),
                estimator: estimator.clone(),
                surface: surface.clone(),
            },
            Arc::new(clock.clone()),
            MonitorConfig::default(),
        );
        Harness {
            monitor,
            store,
            geocoder,
            estimator,
            surface,
            clock,
        }
    }

    #[tokio::test]
    async fn selects_nearest_trip_and_polls_at_its_urgency() {
        let h = harness(vec![destination("a", 180), destination("b", 20)]);
        let report = h.monitor.sync_now().await;

        assert_eq!(report.selected.as_deref(), Some("b"));
        assert_eq!(report.interval, Duration::from_secs(120));
        assert_eq!(report.outcome, CycleOutcome::Published(PublishAction::Created));

        let records = h.surface.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attributes.destination_name, "b");
        assert_eq!(records[0].content.travel_minutes, 20);
    }

    #[tokio::test]
    async fn expired_targets_are_cleared_in_one_batch() {
        let h = harness(vec![
            destination("yesterday", -24 * 60),
            destination("past", -5),
            destination("soon", 60),
        ]);
        let report = h.monitor.sync_now().await;

        assert_eq!(report.expired, 2);
        assert_eq!(report.selected.as_deref(), Some("soon"));
        assert_eq!(h.store.saves().len(), 1);
        assert!(h.store.get("yesterday").expect("kept").target_arrival_time.is_none());
        assert!(h.store.get("past").expect("kept").target_arrival_time.is_none());
        assert!(h.store.get("yesterday").expect("kept").coordinate.is_some());
    }

    #[tokio::test]
    async fn lookup_failure_keeps_record_and_interval() {
        let h = harness(vec![destination("b", 20)]);
        h.monitor.sync_now().await;
        let before = h.surface.records();

        h.estimator.fail_with(Some(LookupError::NoRoute));
        h.clock.advance(Delta::minutes(2));
        let report = h.monitor.sync_now().await;

        assert_eq!(report.outcome, CycleOutcome::LookupFailed);
        assert_eq!(report.interval, Duration::from_secs(120));
        assert_eq!(h.surface.records(), before);
        assert_eq!(h.monitor.status().tracked_target, before.first().map(|r| r.content.target_time));
    }

    #[tokio::test]
    async fn lookup_failure_ends_record_of_destination_that_vanished() {
        let h = harness(vec![destination("b", 20), destination("d", 40)]);
        h.monitor.sync_now().await;

        h.store.remove("b");
        h.estimator.fail_with(Some(LookupError::LocationUnavailable));
        let report = h.monitor.sync_now().await;

        assert_eq!(report.outcome, CycleOutcome::LookupFailed);
        assert_eq!(h.surface.live_count(), 0);
    }

    #[tokio::test]
    async fn switching_trips_ends_then_creates() {
        let h = harness(vec![destination("b", 20), destination("d", 40)]);
        h.monitor.sync_now().await;

        h.store.set_target("b", None);
        h.monitor.sync_now().await;

        let calls = h.surface.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(&calls[1], SurfaceCall::End { handle } if handle == calls[0].handle()));
        assert!(matches!(&calls[2], SurfaceCall::Create { attributes, .. } if attributes.destination_name == "d"));
        assert!(!calls
            .iter()
            .any(|call| matches!(call, SurfaceCall::Update { handle, .. } if handle == calls[0].handle())));
        assert_eq!(h.surface.max_live(), 1);
    }

    #[tokio::test]
    async fn no_trip_ends_record_and_goes_idle() {
        let h = harness(vec![destination("b", 20)]);
        h.monitor.sync_now().await;

        h.clock.advance(Delta::minutes(21));
        let report = h.monitor.sync_now().await;

        assert_eq!(report.outcome, CycleOutcome::NoTrip);
        assert_eq!(report.interval, Duration::from_secs(900));
        assert_eq!(h.surface.live_count(), 0);
    }

    #[tokio::test]
    async fn missing_coordinate_is_geocoded_and_saved() {
        let mut gym = destination("gym", 90);
        gym.coordinate = None;
        let h = harness(vec![gym]);
        h.geocoder.learn("gym street", Coordinate::new(5.0, 6.0));

        let report = h.monitor.sync_now().await;
        assert_eq!(report.outcome, CycleOutcome::Published(PublishAction::Created));
        assert_eq!(report.interval, Duration::from_secs(600));

        let saved = h.store.get("gym").expect("kept");
        assert_eq!(saved.coordinate, Some(Coordinate::new(5.0, 6.0)));
        assert!(saved.last_geocoded.is_some());
        assert_eq!(h.monitor.status().active.expect("active").coordinate, Coordinate::new(5.0, 6.0));
    }

    #[tokio::test]
    async fn coordinate_write_failure_does_not_abort_fetch() {
        let mut gym = destination("gym", 90);
        gym.coordinate = None;
        let h = harness(vec![gym]);
        h.geocoder.learn("gym street", Coordinate::new(5.0, 6.0));
        h.store.fail_save(true);

        let report = h.monitor.sync_now().await;
        assert_eq!(report.outcome, CycleOutcome::Published(PublishAction::Created));
        assert_eq!(h.estimator.calls(), 1);
    }

    #[tokio::test]
    async fn disabled_capability_is_a_no_op_at_idle_interval() {
        let h = harness(vec![destination("b", 20)]);
        h.surface.set_enabled(false);

        let report = h.monitor.sync_now().await;
        assert_eq!(report.outcome, CycleOutcome::Disabled);
        assert_eq!(report.interval, Duration::from_secs(900));
        assert_eq!(h.store.fetch_count(), 0);
        assert!(h.surface.calls().is_empty());
    }

    #[tokio::test]
    async fn store_failure_keeps_last_known_interval() {
        let h = harness(vec![destination("b", 4)]);
        h.monitor.sync_now().await;

        h.store.fail_fetch(true);
        let report = h.monitor.sync_now().await;
        assert_eq!(report.outcome, CycleOutcome::StoreUnavailable);
        assert_eq!(report.interval, Duration::from_secs(30));
        assert_eq!(h.surface.live_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_reschedules_and_start_is_idempotent() {
        let h = harness(vec![destination("b", 20)]);
        let mut status = h.monitor.subscribe();

        assert!(h.monitor.start().await);
        assert!(!h.monitor.start().await);
        assert_eq!(h.monitor.state().await, MonitorState::Running);

        while status.borrow_and_update().cycles < 3 {
            status.changed().await.expect("monitor alive");
        }
        assert_eq!(h.monitor.status().interval_secs, 120);
        assert_eq!(h.surface.max_live(), 1);

        assert!(h.monitor.stop().await);
        assert_eq!(h.monitor.state().await, MonitorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_sleep_and_schedules_nothing_further() {
        let h = harness(Vec::new());
        let mut status = h.monitor.subscribe();
        h.monitor.start().await;
        while status.borrow_and_update().cycles < 1 {
            status.changed().await.expect("monitor alive");
        }

        let stopped = tokio::time::timeout(Duration::from_secs(1), h.monitor.stop()).await;
        assert_eq!(stopped, Ok(true));

        let cycles = h.monitor.status().cycles;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(h.monitor.status().cycles, cycles);
        assert!(!h.monitor.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_live_record() {
        let h = harness(vec![destination("b", 20)]);
        let mut status = h.monitor.subscribe();
        h.monitor.start().await;
        while status.borrow_and_update().cycles < 1 {
            status.changed().await.expect("monitor alive");
        }
        assert_eq!(h.surface.live_count(), 1);

        assert!(h.monitor.stop().await);
        assert_eq!(h.surface.live_count(), 0);
        assert!(matches!(h.surface.calls().last(), Some(SurfaceCall::End { .. })));
        assert!(h.monitor.status().active.is_none());
        assert!(h.monitor.status().tracked_target.is_none());
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        /// Sets a target this many minutes after the current clock, or clears it.
        Target(&'static str, Option<i64>),
        Add(&'static str, i64),
        Remove(&'static str),
        Advance(i64),
        FailLookups(bool),
        DenyCreation(bool),
        FailUpdates(bool),
    }

    #[tokio::test]
    async fn at_most_one_record_across_a_long_run() {
        use Step::*;
        let h = harness(vec![destination("a", 30), destination("b", 90), destination("c", 200)]);
        let steps = [
            Advance(1),
            Target("c", Some(10)),
            Advance(2),
            FailLookups(true),
            Target("c", None),
            FailLookups(false),
            FailUpdates(true),
            Advance(1),
            FailUpdates(false),
            DenyCreation(true),
            Target("b", Some(5)),
            DenyCreation(false),
            Advance(6),
            Remove("a"),
            Add("d", 40),
            Target("c", Some(25)),
            FailLookups(true),
            Remove("c"),
            FailLookups(false),
            Advance(1),
            Add("e", 3),
            FailUpdates(true),
            Advance(1),
            Advance(3),
            FailUpdates(false),
            Target("d", Some(2)),
            DenyCreation(true),
            Remove("d"),
            DenyCreation(false),
            Add("f", 400),
            Advance(60),
            Target("f", Some(15)),
            FailLookups(true),
            Advance(20),
            FailLookups(false),
            Add("g", 50),
            Target("g", None),
        ];

        let mut owners = std::collections::HashMap::new();
        for (index, step) in steps.into_iter().enumerate() {
            match step {
                Target(id, minutes) => {
                    let now = h.clock.now().with_timezone(&Utc);
                    h.store.set_target(id, minutes.map(|m| now + Delta::minutes(m)));
                }
                Add(id, minutes) => {
                    let now = h.clock.now().with_timezone(&Utc);
                    let mut added = Destination::new(id, format!("{id} street"))
                        .with_coordinate(Coordinate::new(1.0, 2.0))
                        .with_target(now + Delta::minutes(minutes));
                    added.id = id.to_string();
                    h.store.insert(added);
                }
                Remove(id) => h.store.remove(id),
                Advance(minutes) => h.clock.advance(Delta::minutes(minutes)),
                FailLookups(fail) => h
                    .estimator
                    .fail_with(fail.then_some(LookupError::NoRoute)),
                DenyCreation(deny) => h.surface.deny_creation(deny),
                FailUpdates(fail) => h.surface.fail_updates(fail),
            }

            let calls_before = h.surface.calls().len();
            let report = h.monitor.sync_now().await;
            let calls = h.surface.calls();

            assert!(h.surface.live_count() <= 1, "step {index} {step:?}: {report:?}");
            for call in &calls[calls_before..] {
                match call {
                    SurfaceCall::Create { handle, attributes, .. } => {
                        assert_eq!(
                            Some(attributes.destination_name.as_str()),
                            report.selected.as_deref(),
                            "step {index} {step:?}: created for a trip that was not selected"
                        );
                        owners.insert(handle.clone(), attributes.destination_name.clone());
                    }
                    SurfaceCall::Update { handle, .. } => {
                        assert_eq!(
                            owners.get(handle).map(String::as_str),
                            report.selected.as_deref(),
                            "step {index} {step:?}: update for a trip that was not selected"
                        );
                    }
                    SurfaceCall::End { .. } => {}
                }
            }
            if let Some(active) = h.monitor.status().active {
                assert_eq!(h.surface.live_count(), 1, "step {index} {step:?}");
                assert!(h.store.get(&active.destination_id).is_some(), "step {index} {step:?}");
            }
        }
        assert_eq!(h.surface.max_live(), 1);
    }

    #[tokio::test]
    async fn sync_now_is_serialized_with_other_cycles() {
        let h = harness(vec![destination("b", 20)]);
        let (first, second) = tokio::join!(h.monitor.sync_now(), h.monitor.sync_now());

        let mut outcomes = [first.outcome, second.outcome];
        outcomes.sort_by_key(|outcome| format!("{outcome:?}"));
        assert_eq!(
            outcomes,
            [
                CycleOutcome::Published(PublishAction::Created),
                CycleOutcome::Published(PublishAction::Updated),
            ]
        );
        assert_eq!(h.surface.max_live(), 1);
    }
}

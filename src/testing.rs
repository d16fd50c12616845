//! In-memory collaborators for exercising the trip monitor without a
//! database, network or real live status surface.
//!
//! Used by the unit tests and by the behaviour tests under `tests/`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    error::{LookupError, PublishError, StoreError},
    models::{
        destination::{Coordinate, Destination, DestinationChange, DestinationFilter},
        live_status::{LiveStatusAttributes, LiveStatusContent, LiveStatusHandle, LiveStatusRecord},
    },
    services::{
        estimator::{TravelEstimate, TravelEstimator},
        geocoder::Geocoder,
        live_status::LiveStatusSurface,
        store::DestinationStore,
    },
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryStore {
    destinations: Mutex<Vec<Destination>>,
    saves: Mutex<Vec<Vec<DestinationChange>>>,
    fetches: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_save: AtomicBool,
}

impl MemoryStore {
    pub fn new(destinations: Vec<Destination>) -> Self {
        Self {
            destinations: Mutex::new(destinations),
            ..Self::default()
        }
    }

    pub fn insert(&self, destination: Destination) {
        lock(&self.destinations).push(destination);
    }

    pub fn remove(&self, id: &str) {
        lock(&self.destinations).retain(|d| d.id != id);
    }

    pub fn get(&self, id: &str) -> Option<Destination> {
        lock(&self.destinations).iter().find(|d| d.id == id).cloned()
    }

    pub fn set_target(&self, id: &str, target: Option<DateTime<Utc>>) {
        if let Some(destination) = lock(&self.destinations).iter_mut().find(|d| d.id == id) {
            destination.target_arrival_time = target;
        }
    }

    /// Every batch passed to `save`, including failed ones.
    pub fn saves(&self) -> Vec<Vec<DestinationChange>> {
        lock(&self.saves).clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn fetch(&self, filter: DestinationFilter) -> Result<Vec<Destination>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let destinations = lock(&self.destinations);
        let matching = destinations
            .iter()
            .filter(|d| match &filter {
                DestinationFilter::All => true,
                DestinationFilter::WithTarget => d.target_arrival_time.is_some(),
                DestinationFilter::InGroup(group) => d.group_id.as_deref() == Some(group),
            })
            .cloned()
            .collect();
        Ok(matching)
    }

    async fn save(&self, changes: &[DestinationChange]) -> Result<(), StoreError> {
        lock(&self.saves).push(changes.to_vec());
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let mut destinations = lock(&self.destinations);
        for change in changes {
            match change {
                DestinationChange::ClearTarget { id } => {
                    if let Some(d) = destinations.iter_mut().find(|d| &d.id == id) {
                        d.target_arrival_time = None;
                    }
                }
                DestinationChange::SetCoordinate {
                    id,
                    coordinate,
                    geocoded_at,
                } => {
                    if let Some(d) = destinations.iter_mut().find(|d| &d.id == id) {
                        d.coordinate = Some(*coordinate);
                        d.last_geocoded = Some(*geocoded_at);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Resolves only the addresses it was given.
#[derive(Default)]
pub struct StaticGeocoder {
    known: Mutex<HashMap<String, Coordinate>>,
    calls: AtomicUsize,
}

impl StaticGeocoder {
    pub fn with(self, address: impl Into<String>, coordinate: Coordinate) -> Self {
        lock(&self.known).insert(address.into(), coordinate);
        self
    }

    pub fn learn(&self, address: impl Into<String>, coordinate: Coordinate) {
        lock(&self.known).insert(address.into(), coordinate);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn geocode(&self, address: &str) -> Result<Coordinate, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.known)
            .get(address)
            .copied()
            .ok_or(LookupError::NotFound)
    }
}

/// Returns a fixed travel time, or a scripted failure.
pub struct ScriptedEstimator {
    minutes: Mutex<i64>,
    failure: Mutex<Option<LookupError>>,
    departure: Mutex<Option<DateTime<Utc>>>,
    calls: AtomicUsize,
}

impl ScriptedEstimator {
    pub fn new(minutes: i64) -> Self {
        Self {
            minutes: Mutex::new(minutes),
            failure: Mutex::new(None),
            departure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Pins the departure time arrivals are computed from; wall clock otherwise.
    pub fn depart_at(&self, departure: DateTime<Utc>) {
        *lock(&self.departure) = Some(departure);
    }

    pub fn set_minutes(&self, minutes: i64) {
        *lock(&self.minutes) = minutes;
    }

    pub fn fail_with(&self, failure: Option<LookupError>) {
        *lock(&self.failure) = failure;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedEstimator {
    fn default() -> Self {
        Self::new(15)
    }
}

#[async_trait]
impl TravelEstimator for ScriptedEstimator {
    async fn estimate(&self, _destination: Coordinate) -> Result<TravelEstimate, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = lock(&self.failure).clone() {
            return Err(failure);
        }
        let minutes = *lock(&self.minutes);
        let departure = (*lock(&self.departure)).unwrap_or_else(Utc::now);
        Ok(TravelEstimate {
            arrival_time: departure + Duration::minutes(minutes),
            travel_minutes: minutes,
        })
    }
}

/// A surface call that succeeded, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Create {
        handle: LiveStatusHandle,
        attributes: LiveStatusAttributes,
        content: LiveStatusContent,
    },
    Update {
        handle: LiveStatusHandle,
        content: LiveStatusContent,
    },
    End {
        handle: LiveStatusHandle,
    },
}

impl SurfaceCall {
    pub fn handle(&self) -> &LiveStatusHandle {
        match self {
            SurfaceCall::Create { handle, .. }
            | SurfaceCall::Update { handle, .. }
            | SurfaceCall::End { handle } => handle,
        }
    }
}

#[derive(Default)]
struct SurfaceState {
    calls: Vec<SurfaceCall>,
    live: HashMap<LiveStatusHandle, LiveStatusRecord>,
    next_id: u64,
    max_live: usize,
    deny_creation: bool,
    fail_updates: bool,
}

/// Keeps records in memory and logs every call. Unlike a real platform it
/// does not refuse a second record, so the publisher's discipline is what
/// keeps `max_live` at one.
pub struct RecordingSurface {
    state: Mutex<SurfaceState>,
    enabled: AtomicBool,
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self {
            state: Mutex::new(SurfaceState::default()),
            enabled: AtomicBool::new(true),
        }
    }
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        lock(&self.state).calls.clone()
    }

    pub fn records(&self) -> Vec<LiveStatusRecord> {
        lock(&self.state).live.values().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        lock(&self.state).live.len()
    }

    /// Highest number of simultaneously live records ever observed.
    pub fn max_live(&self) -> usize {
        lock(&self.state).max_live
    }

    pub fn deny_creation(&self, deny: bool) {
        lock(&self.state).deny_creation = deny;
    }

    pub fn fail_updates(&self, fail: bool) {
        lock(&self.state).fail_updates = fail;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl LiveStatusSurface for RecordingSurface {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn create(
        &self,
        attributes: LiveStatusAttributes,
        content: LiveStatusContent,
    ) -> Result<LiveStatusHandle, PublishError> {
        let mut state = lock(&self.state);
        if state.deny_creation {
            return Err(PublishError::CreationDenied("denied by test".into()));
        }
        state.next_id += 1;
        let handle = LiveStatusHandle(format!("record-{}", state.next_id));
        state.live.insert(
            handle.clone(),
            LiveStatusRecord {
                handle: handle.clone(),
                attributes: attributes.clone(),
                content: content.clone(),
            },
        );
        state.max_live = state.max_live.max(state.live.len());
        state.calls.push(SurfaceCall::Create {
            handle: handle.clone(),
            attributes,
            content,
        });
        Ok(handle)
    }

    async fn update(
        &self,
        handle: &LiveStatusHandle,
        content: LiveStatusContent,
    ) -> Result<(), PublishError> {
        let mut state = lock(&self.state);
        if state.fail_updates {
            return Err(PublishError::UnknownHandle);
        }
        let record = state.live.get_mut(handle).ok_or(PublishError::UnknownHandle)?;
        record.content = content.clone();
        state.calls.push(SurfaceCall::Update {
            handle: handle.clone(),
            content,
        });
        Ok(())
    }

    async fn end(&self, handle: LiveStatusHandle) -> Result<(), PublishError> {
        let mut state = lock(&self.state);
        state
            .live
            .remove(&handle)
            .ok_or(PublishError::UnknownHandle)?;
        state.calls.push(SurfaceCall::End { handle });
        Ok(())
    }
}

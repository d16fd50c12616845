//! Trip monitoring: picks the next trip, refreshes its travel estimate on an
//! adaptive schedule and keeps the single live status record in sync.
//!
//! One [`TripMonitor`] owns all tracked state. A sync cycle runs
//! normalize → select → fetch travel data → publish, and cycles never overlap.

pub mod clock;
pub mod interval;
pub mod publisher;
pub mod scheduler;
pub mod selector;
pub mod travel;

use std::sync::Arc;

use crate::services::{
    estimator::TravelEstimator, geocoder::Geocoder, live_status::LiveStatusSurface,
    store::DestinationStore,
};

pub use clock::{Clock, SystemClock};
pub use interval::PollPolicy;
pub use publisher::{LivePublisher, PublishAction};
pub use scheduler::{CycleOutcome, CycleReport, MonitorState, MonitorStatus, TripMonitor};
pub use selector::{select_trip, Candidate, Selection};

/// Everything the monitor talks to, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DestinationStore>,
    pub geocoder: Arc<dyn Geocoder>,
    pub estimator: Arc<dyn TravelEstimator>,
    pub surface: Arc<dyn LiveStatusSurface>,
}

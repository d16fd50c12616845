use std::sync::Arc;

use crate::{
    config::AppConfig,
    monitor::{Clock, Collaborators, TripMonitor},
    services::{
        eta::EtaBoard, geocoder::Geocoder, live_status::FileLiveStatus, location::DeviceLocation,
        store::SqliteStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: SqliteStore,
    pub geocoder: Arc<dyn Geocoder>,
    pub location: DeviceLocation,
    pub live_status: FileLiveStatus,
    pub monitor: Arc<TripMonitor>,
    pub eta: EtaBoard,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires the monitor and ETA board to the same collaborators.
    pub fn new(
        config: AppConfig,
        store: SqliteStore,
        collaborators: Collaborators,
        location: DeviceLocation,
        live_status: FileLiveStatus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let monitor = TripMonitor::new(
            collaborators.clone(),
            clock.clone(),
            config.monitor.clone(),
        );
        let eta = EtaBoard::new(collaborators.clone(), clock.clone());
        Self {
            config,
            store,
            geocoder: collaborators.geocoder,
            location,
            live_status,
            monitor,
            eta,
            clock,
        }
    }
}

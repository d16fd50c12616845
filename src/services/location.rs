use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::models::destination::Coordinate;

/// The user's current position, shared between the HTTP surface and the estimator.
#[derive(Clone, Default)]
pub struct DeviceLocation {
    current: Arc<RwLock<Option<Coordinate>>>,
}

impl DeviceLocation {
    pub fn new(initial: Option<Coordinate>) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn current(&self) -> Option<Coordinate> {
        *self.current.read().await
    }

    pub async fn set(&self, coordinate: Coordinate) {
        info!(
            latitude = coordinate.latitude,
            longitude = coordinate.longitude,
            "device location updated"
        );
        *self.current.write().await = Some(coordinate);
    }
}

pub mod estimator;
pub mod eta;
pub mod geocoder;
pub mod live_status;
pub mod location;
pub mod store;

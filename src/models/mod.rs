pub mod destination;
pub mod eta;
pub mod group;
pub mod live_status;
pub mod trip;

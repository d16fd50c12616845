pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod monitor;
pub mod routes;
pub mod services;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

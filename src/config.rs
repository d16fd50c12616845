use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use url::Url;

use crate::{error::AppError, models::destination::Coordinate};

const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_ROUTER_URL: &str = "https://router.project-osrm.org";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub geocoder_url: Url,
    pub router_url: Url,
    pub user_agent: String,
    pub origin: Option<Coordinate>,
    pub live_status_path: PathBuf,
    pub live_status_enabled: bool,
    pub monitor: MonitorConfig,
}

/// Tuning for the trip monitor loop.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Trips further out than this are not yet upcoming.
    pub window: Duration,
    /// Poll interval while no trip is tracked.
    pub idle_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(6 * 3600),
            idle_interval: Duration::from_secs(900),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://timeblind.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let geocoder_url = parse_url("GEOCODER_URL", DEFAULT_GEOCODER_URL)?;
        let router_url = parse_url("ROUTER_URL", DEFAULT_ROUTER_URL)?;

        let user_agent = env::var("HTTP_USER_AGENT")
            .unwrap_or_else(|_| format!("timeblind/{}", env!("CARGO_PKG_VERSION")));

        let origin = match (optional::<f64>("ORIGIN_LAT")?, optional::<f64>("ORIGIN_LON")?) {
            (Some(latitude), Some(longitude)) => Some(Coordinate::new(latitude, longitude)),
            (None, None) => None,
            _ => {
                return Err(AppError::Config(
                    "ORIGIN_LAT and ORIGIN_LON must be set together".into(),
                ))
            }
        };

        let live_status_path = env::var("LIVE_STATUS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("live_status.json"));
        let live_status_enabled = optional::<bool>("LIVE_STATUS_ENABLED")?.unwrap_or(true);

        let mut monitor = MonitorConfig::default();
        if let Some(hours) = optional::<u64>("TRIP_WINDOW_HOURS")? {
            monitor.window = Duration::from_secs(hours * 3600);
        }
        if let Some(secs) = optional::<u64>("IDLE_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(AppError::Config("IDLE_INTERVAL_SECS must be positive".into()));
            }
            monitor.idle_interval = Duration::from_secs(secs);
        }

        Ok(Self {
            database_url,
            listen_addr,
            geocoder_url,
            router_url,
            user_agent,
            origin,
            live_status_path,
            live_status_enabled,
            monitor,
        })
    }
}

fn parse_url(key: &str, default: &str) -> Result<Url, AppError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|err| AppError::Config(format!("invalid {key}: {err}")))
}

fn optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        _ => Ok(None),
    }
}

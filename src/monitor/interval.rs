use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;

/// Poll every 30 s once the deadline is five minutes away or less.
pub const URGENT_INTERVAL: Duration = Duration::from_secs(30);
/// Poll every 2 min within half an hour of the deadline.
pub const NEAR_INTERVAL: Duration = Duration::from_secs(120);
/// Poll every 10 min for anything else inside the window.
pub const FAR_INTERVAL: Duration = Duration::from_secs(600);

const URGENT_SECS: i64 = 5 * 60;
const NEAR_SECS: i64 = 30 * 60;

/// Maps the remaining time until the tracked deadline to the next sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub window: Duration,
    pub idle: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        MonitorConfig::default().into()
    }
}

impl From<MonitorConfig> for PollPolicy {
    fn from(config: MonitorConfig) -> Self {
        Self {
            window: config.window,
            idle: config.idle_interval,
        }
    }
}

impl PollPolicy {
    /// `remaining_secs` of `None` means nothing is tracked.
    pub fn interval(&self, remaining_secs: Option<i64>) -> Duration {
        let Some(remaining) = remaining_secs else {
            return self.idle;
        };
        let window = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        if remaining <= URGENT_SECS {
            URGENT_INTERVAL
        } else if remaining <= NEAR_SECS {
            NEAR_INTERVAL
        } else if remaining <= window {
            FAR_INTERVAL
        } else {
            self.idle
        }
    }

    pub fn interval_until(&self, target: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        self.interval(target.map(|target| (target - now).num_seconds()))
    }
}

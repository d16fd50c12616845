use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtaStatus {
    Ok,
    GeocodingFailed,
    EtaFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtaResult {
    pub arrival_time: Option<DateTime<Utc>>,
    pub travel_minutes: i64,
    pub status: EtaStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalLevel {
    OnTimeOrEarly,
    LeaveNow,
    Late,
}

/// How an estimated arrival compares with the destination's target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalStatus {
    /// Positive when late, negative when early.
    pub diff_minutes: i64,
    pub level: ArrivalLevel,
    pub text: String,
    pub leave_by: DateTime<Utc>,
}

pub const CALCULATING: &str = "Calculating…";

impl ArrivalStatus {
    pub fn compare(
        arrival: DateTime<Utc>,
        target: DateTime<Utc>,
        travel_minutes: i64,
    ) -> Self {
        let diff_minutes = (arrival - target).num_minutes();
        let level = match diff_minutes {
            d if d <= 0 => ArrivalLevel::OnTimeOrEarly,
            d if d < 5 => ArrivalLevel::LeaveNow,
            _ => ArrivalLevel::Late,
        };
        Self {
            diff_minutes,
            level,
            text: diff_text(diff_minutes),
            leave_by: target - Duration::minutes(travel_minutes),
        }
    }
}

fn diff_text(minutes: i64) -> String {
    if minutes == 0 {
        return "On Time".to_string();
    }

    let abs = minutes.abs();
    let hours = abs / 60;
    let rest = abs % 60;

    let mut text = String::new();
    if hours > 0 {
        text.push_str(&format!("{hours} hr"));
        if hours > 1 {
            text.push('s');
        }
    }
    if rest > 0 {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&format!("{rest} min"));
    }

    if minutes < 0 {
        format!("{text} early")
    } else {
        format!("{text} late")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 28, h, m, 0).unwrap()
    }

    #[test]
    fn on_time_when_arrival_equals_target() {
        let status = ArrivalStatus::compare(at(9, 0), at(9, 0), 20);
        assert_eq!(status.text, "On Time");
        assert_eq!(status.level, ArrivalLevel::OnTimeOrEarly);
        assert_eq!(status.leave_by, at(8, 40));
    }

    #[test]
    fn early_and_late_texts() {
        assert_eq!(ArrivalStatus::compare(at(8, 45), at(9, 0), 0).text, "15 min early");
        assert_eq!(ArrivalStatus::compare(at(10, 5), at(9, 0), 0).text, "1 hr 5 min late");
        assert_eq!(ArrivalStatus::compare(at(11, 0), at(9, 0), 0).text, "2 hrs late");
    }

    #[test]
    fn small_delay_means_leave_now() {
        let status = ArrivalStatus::compare(at(9, 3), at(9, 0), 10);
        assert_eq!(status.level, ArrivalLevel::LeaveNow);
        let late = ArrivalStatus::compare(at(9, 5), at(9, 0), 10);
        assert_eq!(late.level, ArrivalLevel::Late);
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const TEMP_MIN: f64 = -100.0;
pub const TEMP_MAX: f64 = 100.0;
pub const LOW_BATTERY_VOLTS: f64 = 5.5;
pub const INACTIVE_AFTER_MINUTES: i64 = 120;

/// Battery percentage steps, upper bound inclusive
const BATTERY_STEPS: [(f64, u8); 9] = [
    (5.75, 10),
    (5.83, 20),
    (5.91, 30),
    (5.98, 40),
    (6.05, 50),
    (6.12, 60),
    (6.19, 70),
    (6.25, 80),
    (6.31, 90),
];

/// Low-battery characteristic codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum BatteryStatus {
    Normal = 0,
    Low = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Active,
    Inactive,
    #[default]
    Unknown,
}

impl Liveness {
    /// Active-state characteristic value; unknown reports as inactive
    pub fn as_value(self) -> u8 {
        match self {
            Liveness::Active => 1,
            Liveness::Inactive | Liveness::Unknown => 0,
        }
    }
}

fn valid(raw: Option<f64>) -> Option<f64> {
    raw.filter(|v| v.is_finite())
}

/// Missing readings report code 0.
pub fn battery_status(volts: Option<f64>) -> BatteryStatus {
    match valid(volts) {
        Some(v) if v < LOW_BATTERY_VOLTS => BatteryStatus::Low,
        _ => BatteryStatus::Normal,
    }
}

pub fn battery_percent(volts: Option<f64>) -> u8 {
    let Some(v) = valid(volts) else {
        return 0;
    };
    BATTERY_STEPS
        .iter()
        .find(|(upper, _)| v <= *upper)
        .map(|(_, pct)| *pct)
        .unwrap_or(100)
}

/// Negative and missing readings become 0. No upper clamp.
pub fn water_level(percent: Option<f64>) -> f64 {
    match valid(percent) {
        Some(v) if v > 0.0 => v,
        _ => 0.0,
    }
}

pub fn temperature(celsius: Option<f64>) -> f64 {
    valid(celsius)
        .map(|v| v.clamp(TEMP_MIN, TEMP_MAX))
        .unwrap_or(0.0)
}

/// Derived at fetch time; the provider's own flag is used when the contact time is unknown.
pub fn liveness(
    last_contact: Option<DateTime<Utc>>,
    reported_active: Option<bool>,
    now: DateTime<Utc>,
) -> Liveness {
    match (last_contact, reported_active) {
        (Some(contact), _) => {
            if (now - contact).num_minutes() >= INACTIVE_AFTER_MINUTES {
                Liveness::Inactive
            } else {
                Liveness::Active
            }
        }
        (None, Some(true)) => Liveness::Active,
        (None, Some(false)) => Liveness::Inactive,
        (None, None) => Liveness::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_reading;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_battery_status() {
        assert_eq!(battery_status(Some(5.49)), BatteryStatus::Low);
        assert_eq!(battery_status(Some(5.5)), BatteryStatus::Normal);
        assert_eq!(battery_status(Some(6.3)), BatteryStatus::Normal);
        assert_eq!(battery_status(None), BatteryStatus::Normal);
        assert_eq!(battery_status(Some(f64::NAN)), BatteryStatus::Normal);
        assert_eq!(battery_status(None) as u8, 0);
    }

    #[test]
    fn test_battery_percent_boundaries() {
        let expected = [
            (5.0, 10),
            (5.75, 10),
            (5.76, 20),
            (5.83, 20),
            (5.91, 30),
            (5.98, 40),
            (6.05, 50),
            (6.12, 60),
            (6.19, 70),
            (6.25, 80),
            (6.31, 90),
            (6.32, 100),
            (7.0, 100),
        ];
        for (volts, pct) in expected {
            assert_eq!(battery_percent(Some(volts)), pct, "volts={}", volts);
        }
        assert_eq!(battery_percent(None), 0);
        assert_eq!(battery_percent(Some(f64::INFINITY)), 0);
    }

    #[test]
    fn test_battery_percent_monotonic() {
        let mut last = 0;
        let mut volts = 5.0;
        while volts < 7.0 {
            let pct = battery_percent(Some(volts));
            assert!(pct >= last, "dropped at {}", volts);
            last = pct;
            volts += 0.005;
        }
    }

    #[test]
    fn test_water_level() {
        assert_eq!(water_level(Some(-5.0)), 0.0);
        assert_eq!(water_level(Some(42.3)), 42.3);
        assert_eq!(water_level(parse_reading(&json!("abc"))), 0.0);
        assert_eq!(water_level(Some(130.0)), 130.0);
        assert_eq!(water_level(None), 0.0);
    }

    #[test]
    fn test_temperature_clamped_to_range() {
        assert_eq!(temperature(Some(21.5)), 21.5);
        assert_eq!(temperature(Some(-140.0)), TEMP_MIN);
        assert_eq!(temperature(Some(250.0)), TEMP_MAX);
        assert_eq!(temperature(None), 0.0);
    }

    #[test]
    fn test_liveness() {
        let now = Utc::now();

        assert_eq!(
            liveness(Some(now - Duration::minutes(119)), Some(false), now),
            Liveness::Active
        );
        assert_eq!(
            liveness(Some(now - Duration::minutes(120)), Some(true), now),
            Liveness::Inactive
        );
        assert_eq!(liveness(None, Some(true), now), Liveness::Active);
        assert_eq!(liveness(None, Some(false), now), Liveness::Inactive);
        assert_eq!(liveness(None, None, now), Liveness::Unknown);
        assert_eq!(Liveness::Unknown.as_value(), 0);
    }
}

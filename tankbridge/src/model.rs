use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Device list returned by the provider for one user account
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl ProviderResponse {
    /// Exact match on the device identifier, compared as a string.
    pub fn find(&self, device_id: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.id == device_id)
    }
}

/// One device record ("location") in the provider payload
#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub software: Option<String>,
    #[serde(default)]
    pub measurement: Measurement,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Measurement {
    #[serde(default, deserialize_with = "lenient_number")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub volts: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub datatime: Option<String>,
}

/// The cached reading for the configured device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub device_id: String,
    pub temperature: Option<f64>,
    pub water_level_percent: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub last_contact: Option<DateTime<Utc>>,
    pub software_revision: Option<String>,
    pub reported_active: Option<bool>,
}

impl From<&Location> for Snapshot {
    fn from(location: &Location) -> Self {
        let m = &location.measurement;
        Self {
            device_id: location.id.clone(),
            temperature: m.temperature,
            water_level_percent: m.percent,
            battery_voltage: m.volts,
            last_contact: m.datatime.as_deref().and_then(parse_contact_time),
            software_revision: location.software.clone(),
            reported_active: location.active,
        }
    }
}

/// Numbers and numeric strings become a value; anything else is missing.
pub fn parse_reading(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Accepts RFC 3339, the provider's `YYYY-MM-DD HH:MM:SS` in local time, or unix seconds.
pub fn parse_contact_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_reading(&value))
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

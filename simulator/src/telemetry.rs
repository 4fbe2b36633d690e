use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::Serialize;

/// Provider response body
#[derive(Debug, Clone, Serialize)]
pub struct DeviceList {
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Location {
    pub id: String,
    pub active: u8,
    pub software: String,
    pub measurement: Measurement,
}

/// The provider sends numbers as strings and local time without zone
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub temperature: String,
    pub percent: String,
    pub volts: String,
    pub datatime: String,
}

/// Simulated tank, drifting a little on every poll
#[derive(Debug, Clone)]
pub struct Tank {
    pub id: String,
    pub temperature: f64,
    pub percent: f64,
    pub volts: f64,
    pub last_contact: DateTime<Utc>,
}

impl Tank {
    pub fn new(rng: &mut impl Rng, id: String) -> Self {
        Self {
            id,
            temperature: rng.gen_range(4.0..18.0),
            percent: rng.gen_range(20.0..95.0),
            volts: rng.gen_range(5.6..6.4),
            last_contact: Utc::now(),
        }
    }

    pub fn step(&mut self, rng: &mut impl Rng, offline_rate: f64) {
        self.temperature = (self.temperature + rng.gen_range(-0.3..0.3)).clamp(-5.0, 35.0);
        self.percent = (self.percent + rng.gen_range(-1.5..1.0)).clamp(0.0, 100.0);
        self.volts = (self.volts - rng.gen_range(0.0..0.002)).max(5.2);

        // Offline tanks stop reporting; the bridge should flag them inactive
        if !rng.gen_bool(offline_rate) {
            self.last_contact = Utc::now();
        }
    }

    pub fn to_location(&self) -> Location {
        let online = Utc::now() - self.last_contact < chrono::Duration::minutes(120);
        Location {
            id: self.id.clone(),
            active: u8::from(online),
            software: "2.1.7".to_string(),
            measurement: Measurement {
                temperature: format!("{:.1}", self.temperature),
                percent: format!("{:.0}", self.percent),
                volts: format!("{:.2}", self.volts),
                datatime: self
                    .last_contact
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
            },
        }
    }
}

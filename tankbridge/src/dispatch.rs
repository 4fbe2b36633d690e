use crate::cache::{Origin, TelemetryCache};
use crate::errors::SharedError;
use crate::model::Snapshot;
use crate::transform;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    Temperature,
    WaterLevel,
    BatteryLow,
    BatteryLevel,
    Active,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Temperature,
        Metric::WaterLevel,
        Metric::BatteryLow,
        Metric::BatteryLevel,
        Metric::Active,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::WaterLevel => "water-level",
            Metric::BatteryLow => "battery-low",
            Metric::BatteryLevel => "battery-level",
            Metric::Active => "active",
        }
    }

    /// Service whose fault flag tracks this metric
    pub fn service(self) -> ServiceKind {
        match self {
            Metric::Temperature => ServiceKind::Temperature,
            Metric::WaterLevel => ServiceKind::WaterLevel,
            Metric::BatteryLow | Metric::BatteryLevel => ServiceKind::Battery,
            Metric::Active => ServiceKind::Liveness,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("Unknown metric: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    Temperature,
    WaterLevel,
    Battery,
    Liveness,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Temperature,
        ServiceKind::WaterLevel,
        ServiceKind::Battery,
        ServiceKind::Liveness,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricReading {
    pub metric: Metric,
    pub value: f64,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ServiceFault {
    pub service: ServiceKind,
    pub fault: bool,
}

#[derive(Debug, Default)]
struct FaultFlags([AtomicBool; 4]);

impl FaultFlags {
    fn set(&self, service: ServiceKind, fault: bool) {
        self.0[service.index()].store(fault, Ordering::SeqCst);
    }

    fn get(&self, service: ServiceKind) -> bool {
        self.0[service.index()].load(Ordering::SeqCst)
    }
}

/// Per-metric read entry points on top of the telemetry cache
#[derive(Clone)]
pub struct Dispatcher {
    cache: TelemetryCache,
    faults: Arc<FaultFlags>,
}

impl Dispatcher {
    pub fn new(cache: TelemetryCache) -> Self {
        Self {
            cache,
            faults: Arc::new(FaultFlags::default()),
        }
    }

    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    pub async fn read(&self, metric: Metric) -> Result<MetricReading, SharedError> {
        let service = metric.service();

        let fetched = match self.cache.get_data().await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.faults.set(service, true);
                warn!("Failed to read {}: {}", metric, e);
                return Err(e);
            }
        };

        self.faults.set(service, false);
        let value = self.value_of(metric, &fetched.snapshot);
        info!(
            "Update {}: {} from [{:?}]",
            metric, value, fetched.origin
        );

        Ok(MetricReading {
            metric,
            value,
            origin: fetched.origin,
        })
    }

    /// Every metric at once; the first read's fetch serves the rest.
    pub async fn read_all(&self) -> Vec<(Metric, Result<MetricReading, SharedError>)> {
        let (temperature, water_level, battery_low, battery_level, active) = tokio::join!(
            self.read(Metric::Temperature),
            self.read(Metric::WaterLevel),
            self.read(Metric::BatteryLow),
            self.read(Metric::BatteryLevel),
            self.read(Metric::Active),
        );

        vec![
            (Metric::Temperature, temperature),
            (Metric::WaterLevel, water_level),
            (Metric::BatteryLow, battery_low),
            (Metric::BatteryLevel, battery_level),
            (Metric::Active, active),
        ]
    }

    pub fn fault(&self, service: ServiceKind) -> bool {
        self.faults.get(service)
    }

    pub fn faults(&self) -> Vec<ServiceFault> {
        ServiceKind::ALL
            .into_iter()
            .map(|service| ServiceFault {
                service,
                fault: self.faults.get(service),
            })
            .collect()
    }

    pub fn identify(&self) {
        info!("Identify requested for device {}", self.cache.device().device_id);
    }

    fn value_of(&self, metric: Metric, snapshot: &Snapshot) -> f64 {
        match metric {
            Metric::Temperature => transform::temperature(snapshot.temperature),
            Metric::WaterLevel => transform::water_level(snapshot.water_level_percent),
            Metric::BatteryLow => {
                f64::from(transform::battery_status(snapshot.battery_voltage) as u8)
            }
            Metric::BatteryLevel => f64::from(transform::battery_percent(snapshot.battery_voltage)),
            // Stored at fetch time, not derived per read
            Metric::Active => f64::from(self.cache.liveness().as_value()),
        }
    }
}

//! Single-device telemetry cache that coalesces concurrent fetches.

use crate::clock::{Clock, SystemClock};
use crate::config::DeviceIdentity;
use crate::errors::{Error, Result, SharedError};
use crate::fetcher::{FetchResponse, TelemetryFetcher};
use crate::metrics::{
    BATTERY_VOLTS, CACHE_HITS_TOTAL, COALESCED_READS_TOTAL, FETCH_FAILURES_TOTAL,
    FETCH_LATENCY_SECONDS, FETCH_TOTAL, TEMPERATURE_CELSIUS, WATER_LEVEL_PERCENT,
};
use crate::model::{ProviderResponse, Snapshot};
use crate::transform::{self, Liveness};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Fetch,
    Cache,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub snapshot: Arc<Snapshot>,
    pub origin: Origin,
}

pub type Delivery = std::result::Result<Fetched, SharedError>;

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub fetching: bool,
    pub waiters: usize,
    pub has_snapshot: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub liveness: Liveness,
}

/// True when the cache must be refreshed before serving.
pub fn should_update(
    last_update: Option<DateTime<Utc>>,
    has_cache: bool,
    now: DateTime<Utc>,
    expiry: Duration,
) -> bool {
    match last_update {
        None => true,
        Some(_) if !has_cache => true,
        Some(at) => now - at >= expiry,
    }
}

struct Waiter {
    tx: oneshot::Sender<Delivery>,
    origin: Origin,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<Snapshot>>,
    last_update: Option<DateTime<Utc>>,
    liveness: Liveness,
    // Some exactly while a fetch is in flight
    in_flight: Option<Vec<Waiter>>,
}

struct Inner {
    device: DeviceIdentity,
    expiry: Duration,
    fetcher: Arc<dyn TelemetryFetcher>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

#[derive(Clone)]
pub struct TelemetryCache {
    inner: Arc<Inner>,
}

impl TelemetryCache {
    pub fn new(
        device: DeviceIdentity,
        expiry: Duration,
        fetcher: Arc<dyn TelemetryFetcher>,
    ) -> Self {
        Self::with_clock(device, expiry, fetcher, Arc::new(SystemClock))
    }

    pub fn with_clock(
        device: DeviceIdentity,
        expiry: Duration,
        fetcher: Arc<dyn TelemetryFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                device,
                expiry,
                fetcher,
                clock,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.inner.device
    }

    /// Fresh-or-cached snapshot. Never issues a second call while one is in flight.
    pub async fn get_data(&self) -> Delivery {
        let (rx, leader) = {
            let mut state = self.inner.lock_state();
            let leader = state.in_flight.is_none();

            if leader {
                let now = self.inner.clock.now();
                let stale = should_update(
                    state.last_update,
                    state.snapshot.is_some(),
                    now,
                    self.inner.expiry,
                );
                if let (false, Some(snapshot)) = (stale, state.snapshot.clone()) {
                    CACHE_HITS_TOTAL.inc();
                    debug!("Serving device {} from cache", self.inner.device.device_id);
                    return Ok(Fetched {
                        snapshot,
                        origin: Origin::Cache,
                    });
                }
            } else {
                COALESCED_READS_TOTAL.inc();
                debug!("Fetch in flight, queueing reader");
            }

            let (tx, rx) = oneshot::channel();
            let origin = if leader { Origin::Fetch } else { Origin::Cache };
            state
                .in_flight
                .get_or_insert_with(Vec::new)
                .push(Waiter { tx, origin });
            (rx, leader)
        };

        if leader {
            // Own task, so a cancelled reader cannot strand the queue
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.refresh().await });
        }

        rx.await
            .unwrap_or_else(|_| Err(Arc::new(Error::FetchAborted)))
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.lock_state().snapshot.clone()
    }

    pub fn liveness(&self) -> Liveness {
        self.inner.lock_state().liveness
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.inner.lock_state().last_update
    }

    pub fn status(&self) -> CacheStatus {
        let state = self.inner.lock_state();
        CacheStatus {
            fetching: state.in_flight.is_some(),
            waiters: state.in_flight.as_ref().map_or(0, Vec::len),
            has_snapshot: state.snapshot.is_some(),
            last_update: state.last_update,
            liveness: state.liveness,
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(self: Arc<Self>) {
        FETCH_TOTAL.inc();
        info!("Fetching telemetry for device {}", self.device.device_id);

        let start = Instant::now();
        let result = self
            .fetcher
            .fetch(&self.device.api_url)
            .await
            .and_then(|response| self.extract(response));
        FETCH_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());

        let (waiters, outcome) = {
            let mut state = self.lock_state();
            let outcome = match result {
                Ok(snapshot) => {
                    let now = self.clock.now();
                    let snapshot = Arc::new(snapshot);
                    state.liveness =
                        transform::liveness(snapshot.last_contact, snapshot.reported_active, now);
                    state.last_update = Some(now);
                    state.snapshot = Some(Arc::clone(&snapshot));
                    record_gauges(&snapshot);
                    info!(
                        "Cached telemetry for device {} (liveness: {:?})",
                        snapshot.device_id, state.liveness
                    );
                    Ok(snapshot)
                }
                Err(e) => {
                    FETCH_FAILURES_TOTAL.inc();
                    error!("Telemetry fetch failed, keeping previous snapshot: {}", e);
                    Err(Arc::new(e))
                }
            };
            (state.in_flight.take().unwrap_or_default(), outcome)
        };

        debug!("Delivering fetch outcome to {} readers", waiters.len());
        for waiter in waiters {
            let delivery = outcome.clone().map(|snapshot| Fetched {
                snapshot,
                origin: waiter.origin,
            });
            // A dropped receiver is a reader that gave up; nothing to do
            let _ = waiter.tx.send(delivery);
        }
    }

    fn extract(&self, response: FetchResponse) -> Result<Snapshot> {
        if !response.is_success() {
            return Err(Error::Status(response.status));
        }

        let devices: ProviderResponse = serde_json::from_value(response.body)?;
        match devices.find(&self.device.device_id) {
            Some(location) => {
                info!("Found device {}", location.id);
                Ok(Snapshot::from(location))
            }
            None => Err(Error::DeviceNotFound {
                device_id: self.device.device_id.clone(),
                available: devices.locations.len(),
            }),
        }
    }
}

fn record_gauges(snapshot: &Snapshot) {
    if let Some(t) = snapshot.temperature {
        TEMPERATURE_CELSIUS.set(t);
    }
    if let Some(p) = snapshot.water_level_percent {
        WATER_LEVEL_PERCENT.set(p);
    }
    if let Some(v) = snapshot.battery_voltage {
        BATTERY_VOLTS.set(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{device_record, MockFetcher, MockResponse};

    fn device() -> DeviceIdentity {
        DeviceIdentity::new("user-1", "1001", "http://provider.test").unwrap()
    }

    #[test]
    fn test_should_update() {
        let now = Utc::now();
        let expiry = Duration::minutes(10);

        assert!(should_update(None, false, now, expiry));
        assert!(should_update(None, true, now, expiry));
        assert!(should_update(Some(now), false, now, expiry));
        assert!(!should_update(Some(now), true, now, expiry));
        assert!(!should_update(
            Some(now - Duration::seconds(599)),
            true,
            now,
            expiry
        ));
        assert!(should_update(
            Some(now - Duration::seconds(600)),
            true,
            now,
            expiry
        ));
    }

    #[test]
    fn test_first_read_fetches_then_serves_cache() {
        tokio_test::block_on(async {
            let fetcher = Arc::new(MockFetcher::with_device(device_record(
                "1001",
                14.0,
                55.0,
                6.1,
                Utc::now(),
            )));
            let cache = TelemetryCache::new(device(), Duration::minutes(10), fetcher.clone());

            let first = cache.get_data().await.unwrap();
            assert_eq!(first.origin, Origin::Fetch);
            assert_eq!(first.snapshot.temperature, Some(14.0));

            let second = cache.get_data().await.unwrap();
            assert_eq!(second.origin, Origin::Cache);
            assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));

            assert_eq!(fetcher.calls(), 1);
            assert_eq!(fetcher.urls(), vec!["http://provider.test/api/api.php?id=user-1"]);
            assert_eq!(cache.liveness(), Liveness::Active);
        });
    }

    #[test]
    fn test_non_success_status_is_error() {
        tokio_test::block_on(async {
            let fetcher = Arc::new(MockFetcher::new(MockResponse::status(503)));
            let cache = TelemetryCache::new(device(), Duration::minutes(10), fetcher);

            let err = cache.get_data().await.unwrap_err();
            assert!(matches!(*err, Error::Status(503)));
            assert!(cache.snapshot().is_none());
            assert!(cache.last_update().is_none());
            assert!(!cache.status().fetching);
        });
    }
}

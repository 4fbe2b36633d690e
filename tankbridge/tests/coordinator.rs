use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tankbridge::cache::{Delivery, Origin, TelemetryCache};
use tankbridge::clock::{Clock, ManualClock};
use tankbridge::config::DeviceIdentity;
use tankbridge::errors::Error;
use tankbridge::mock::{device_record, provider_body, MockFetcher, MockResponse};
use tankbridge::transform::Liveness;
use tokio::task::JoinHandle;

const DEVICE_ID: &str = "1001";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn setup(expiry_minutes: i64) -> (TelemetryCache, Arc<MockFetcher>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let fetcher = Arc::new(MockFetcher::with_device(device_record(
        DEVICE_ID,
        11.5,
        64.0,
        6.08,
        start() - Duration::minutes(15),
    )));
    let device = DeviceIdentity::new("42", DEVICE_ID, "http://provider.test").unwrap();
    let cache = TelemetryCache::with_clock(
        device,
        Duration::minutes(expiry_minutes),
        fetcher.clone(),
        clock.clone(),
    );
    (cache, fetcher, clock)
}

/// Spawn readers one at a time so queue order is arrival order.
async fn spawn_readers(cache: &TelemetryCache, n: usize) -> Vec<JoinHandle<Delivery>> {
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let reader = cache.clone();
        handles.push(tokio::spawn(async move { reader.get_data().await }));
        wait_for_waiters(cache, i + 1).await;
    }
    handles
}

async fn wait_for_waiters(cache: &TelemetryCache, n: usize) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while cache.status().waiters < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("readers never queued");
}

async fn collect(handles: Vec<JoinHandle<Delivery>>) -> Vec<Delivery> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test]
async fn test_concurrent_reads_share_one_fetch() {
    let (cache, fetcher, _clock) = setup(10);
    fetcher.hold();

    let handles = spawn_readers(&cache, 8).await;
    assert!(cache.status().fetching);
    assert_eq!(fetcher.calls(), 1);

    fetcher.release();
    let results = collect(handles).await;

    assert_eq!(fetcher.calls(), 1);
    assert!(!cache.status().fetching);
    assert_eq!(cache.status().waiters, 0);

    let fetched: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(fetched[0].origin, Origin::Fetch);
    assert!(fetched[1..].iter().all(|f| f.origin == Origin::Cache));
    assert!(fetched
        .iter()
        .all(|f| Arc::ptr_eq(&f.snapshot, &fetched[0].snapshot)));
    assert_eq!(fetched[0].snapshot.temperature, Some(11.5));
}

#[tokio::test]
async fn test_expiry_one_minute_scenario() {
    let (cache, fetcher, clock) = setup(1);
    fetcher.hold();

    let handles = spawn_readers(&cache, 2).await;
    fetcher.release();
    let results = collect(handles).await;

    let first = results[0].as_ref().unwrap();
    let second = results[1].as_ref().unwrap();
    assert_eq!(first.origin, Origin::Fetch);
    assert_eq!(second.origin, Origin::Cache);
    assert_eq!(first.snapshot, second.snapshot);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.last_update(), Some(clock.now()));

    clock.advance(Duration::seconds(59));
    let cached = cache.get_data().await.unwrap();
    assert_eq!(cached.origin, Origin::Cache);
    assert_eq!(fetcher.calls(), 1);

    clock.advance(Duration::seconds(1));
    let handles = spawn_readers(&cache, 1).await;
    fetcher.release();
    let refreshed = collect(handles).await.remove(0).unwrap();
    assert_eq!(refreshed.origin, Origin::Fetch);
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(cache.last_update(), Some(start() + Duration::minutes(1)));
}

#[tokio::test]
async fn test_transport_error_fans_out_and_keeps_cache() {
    let (cache, fetcher, clock) = setup(10);

    let primed = cache.get_data().await.unwrap();
    let before = cache.snapshot().unwrap();
    let updated_at = cache.last_update();
    assert!(Arc::ptr_eq(&primed.snapshot, &before));

    clock.advance(Duration::minutes(10));
    fetcher.set_fallback(MockResponse::TransportError("connection reset".to_string()));
    fetcher.hold();

    let handles = spawn_readers(&cache, 3).await;
    fetcher.release();
    let results = collect(handles).await;

    let errors: Vec<_> = results.into_iter().map(Result::unwrap_err).collect();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].is_transport());
    assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));

    assert!(Arc::ptr_eq(&cache.snapshot().unwrap(), &before));
    assert_eq!(cache.last_update(), updated_at);
    assert_eq!(fetcher.calls(), 2);
    assert!(!cache.status().fetching);
}

#[tokio::test]
async fn test_failed_fetch_retried_on_next_read() {
    let (cache, fetcher, _clock) = setup(10);
    fetcher.push(MockResponse::status(500));

    let err = cache.get_data().await.unwrap_err();
    assert!(matches!(*err, Error::Status(500)));
    assert!(cache.snapshot().is_none());
    assert!(cache.last_update().is_none());

    let fetched = cache.get_data().await.unwrap();
    assert_eq!(fetched.origin, Origin::Fetch);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_unmatched_device_preserves_previous_snapshot() {
    let (cache, fetcher, clock) = setup(10);

    cache.get_data().await.unwrap();
    let before = cache.snapshot().unwrap();
    let updated_at = cache.last_update();

    clock.advance(Duration::minutes(11));
    fetcher.set_fallback(MockResponse::ok(provider_body(vec![
        device_record("2002", 1.0, 2.0, 3.0, start()),
        device_record("2003", 1.0, 2.0, 3.0, start()),
    ])));

    let err = cache.get_data().await.unwrap_err();
    match &*err {
        Error::DeviceNotFound {
            device_id,
            available,
        } => {
            assert_eq!(device_id, DEVICE_ID);
            assert_eq!(*available, 2);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_data_shape());
    assert!(Arc::ptr_eq(&cache.snapshot().unwrap(), &before));
    assert_eq!(cache.last_update(), updated_at);
}

#[tokio::test]
async fn test_malformed_body_is_error() {
    let (cache, fetcher, _clock) = setup(10);
    fetcher.push(MockResponse::ok(serde_json::json!("maintenance")));

    let err = cache.get_data().await.unwrap_err();
    assert!(matches!(*err, Error::Json(_)));
    assert!(cache.snapshot().is_none());
}

#[tokio::test]
async fn test_liveness_computed_at_fetch_time() {
    let (cache, fetcher, clock) = setup(10);
    fetcher.set_fallback(MockResponse::ok(provider_body(vec![device_record(
        DEVICE_ID,
        9.0,
        40.0,
        6.0,
        start() - Duration::minutes(121),
    )])));

    assert_eq!(cache.liveness(), Liveness::Unknown);
    cache.get_data().await.unwrap();
    assert_eq!(cache.liveness(), Liveness::Inactive);

    // Serving from cache leaves it alone
    clock.advance(Duration::minutes(5));
    fetcher.set_fallback(MockResponse::ok(provider_body(vec![device_record(
        DEVICE_ID,
        9.0,
        40.0,
        6.0,
        clock.now(),
    )])));
    assert_eq!(cache.get_data().await.unwrap().origin, Origin::Cache);
    assert_eq!(cache.liveness(), Liveness::Inactive);

    clock.advance(Duration::minutes(5));
    assert_eq!(cache.get_data().await.unwrap().origin, Origin::Fetch);
    assert_eq!(cache.liveness(), Liveness::Active);
}

#[tokio::test]
async fn test_cancelled_leader_does_not_strand_waiters() {
    let (cache, fetcher, _clock) = setup(10);
    fetcher.hold();

    let handles = spawn_readers(&cache, 2).await;
    handles[0].abort();
    fetcher.release();

    let mut handles = handles.into_iter();
    assert!(handles.next().unwrap().await.is_err());
    let follower = handles.next().unwrap().await.unwrap().unwrap();
    assert_eq!(follower.origin, Origin::Cache);
    assert_eq!(fetcher.calls(), 1);
}

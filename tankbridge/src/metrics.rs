use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref FETCH_TOTAL: Counter = Counter::with_opts(Opts::new(
        "tankbridge_fetch_total",
        "Total outbound calls to the telemetry provider"
    ))
    .unwrap();
    pub static ref FETCH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "tankbridge_fetch_failures_total",
        "Total provider calls that ended in an error"
    ))
    .unwrap();
    pub static ref CACHE_HITS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "tankbridge_cache_hits_total",
        "Total reads served from the cached snapshot"
    ))
    .unwrap();
    pub static ref COALESCED_READS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "tankbridge_coalesced_reads_total",
        "Total reads that joined an in-flight fetch"
    ))
    .unwrap();
    pub static ref FETCH_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tankbridge_fetch_latency_seconds",
            "Time taken by one provider call"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    )
    .unwrap();
    pub static ref TEMPERATURE_CELSIUS: Gauge = Gauge::with_opts(Opts::new(
        "tankbridge_temperature_celsius",
        "Last fetched tank temperature"
    ))
    .unwrap();
    pub static ref WATER_LEVEL_PERCENT: Gauge = Gauge::with_opts(Opts::new(
        "tankbridge_water_level_percent",
        "Last fetched water level"
    ))
    .unwrap();
    pub static ref BATTERY_VOLTS: Gauge = Gauge::with_opts(Opts::new(
        "tankbridge_battery_volts",
        "Last fetched battery voltage"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(FETCH_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FETCH_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHE_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COALESCED_READS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FETCH_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(TEMPERATURE_CELSIUS.clone()))?;
    REGISTRY.register(Box::new(WATER_LEVEL_PERCENT.clone()))?;
    REGISTRY.register(Box::new(BATTERY_VOLTS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

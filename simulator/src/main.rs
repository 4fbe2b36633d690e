mod telemetry;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::Parser;
use rand::Rng;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use telemetry::{DeviceList, Tank};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "simulator", about = "Fake water tank telemetry provider")]
struct Args {
    #[arg(long, env = "SIM_ADDR", default_value = "0.0.0.0:9090")]
    addr: String,

    /// Number of tanks reported for every user
    #[arg(long, env = "DEVICES", default_value_t = 3)]
    devices: usize,

    /// Identifier of the first tank; the rest count up from it
    #[arg(long, env = "FIRST_DEVICE_ID", default_value_t = 1001)]
    first_device_id: u64,

    #[arg(long, env = "LATENCY_MS", default_value_t = 250)]
    latency_ms: u64,

    /// Share of requests answered with 503
    #[arg(long, env = "FAIL_RATE", default_value_t = 0.05)]
    fail_rate: f64,

    /// Chance per poll that a tank misses its report
    #[arg(long, env = "OFFLINE_RATE", default_value_t = 0.01)]
    offline_rate: f64,
}

#[derive(Debug, Deserialize)]
struct ApiQuery {
    id: Option<String>,
}

#[derive(Clone)]
struct AppState {
    tanks: Arc<Mutex<Vec<Tank>>>,
    latency: Duration,
    fail_rate: f64,
    offline_rate: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting tank provider simulator");
    info!(
        "Addr: {}, Devices: {}, Latency: {}ms, Fail rate: {}",
        args.addr, args.devices, args.latency_ms, args.fail_rate
    );

    let mut rng = rand::thread_rng();
    let tanks = (0..args.devices as u64)
        .map(|i| Tank::new(&mut rng, (args.first_device_id + i).to_string()))
        .collect();

    let state = AppState {
        tanks: Arc::new(Mutex::new(tanks)),
        latency: Duration::from_millis(args.latency_ms),
        fail_rate: args.fail_rate.clamp(0.0, 1.0),
        offline_rate: args.offline_rate.clamp(0.0, 1.0),
    };

    let app = Router::new()
        .route("/api/api.php", get(device_list))
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&args.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", args.addr, e);
            std::process::exit(1);
        }
    };

    info!("Serving /api/api.php on {}", args.addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("HTTP server error: {}", e);
    }
}

async fn device_list(State(state): State<AppState>, Query(query): Query<ApiQuery>) -> Response {
    tokio::time::sleep(state.latency).await;

    let Some(user_id) = query.id.filter(|id| !id.is_empty()) else {
        warn!("Request without user id");
        return (StatusCode::BAD_REQUEST, "missing id").into_response();
    };

    let mut rng = rand::thread_rng();
    if rng.gen_bool(state.fail_rate) {
        warn!("Injecting failure for user {}", user_id);
        return (StatusCode::SERVICE_UNAVAILABLE, "try again later").into_response();
    }

    let locations = {
        let mut tanks = state.tanks.lock().unwrap_or_else(PoisonError::into_inner);
        tanks
            .iter_mut()
            .map(|tank| {
                tank.step(&mut rng, state.offline_rate);
                tank.to_location()
            })
            .collect()
    };

    info!("Served device list for user {}", user_id);
    Json(DeviceList { locations }).into_response()
}

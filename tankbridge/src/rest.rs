use crate::cache::{CacheStatus, Origin};
use crate::dispatch::{Dispatcher, Metric, MetricReading, ServiceFault, ServiceKind};
use crate::errors::SharedError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::error;

pub const MANUFACTURER: &str = "Mojdomek.eu";
pub const MODEL: &str = "WaterTankSensor";
pub const SERIAL_NUMBER: &str = "123-456";

#[derive(Clone)]
pub struct AppState {
    pub name: String,
    pub dispatcher: Dispatcher,
}

#[derive(Debug, Serialize)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub serial_number: &'static str,
    pub firmware_revision: Option<String>,
    pub device_id: String,
    pub services: Vec<CharacteristicInfo>,
}

#[derive(Debug, Serialize)]
pub struct CharacteristicInfo {
    pub service: ServiceKind,
    pub characteristic: &'static str,
    pub metric: Metric,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Serialize)]
pub struct MetricEntry {
    pub metric: Metric,
    pub value: Option<f64>,
    pub origin: Option<Origin>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub faults: Vec<ServiceFault>,
    pub cache: CacheStatus,
}

#[derive(Debug, Serialize)]
pub struct IdentifyResponse {
    pub identified: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/accessory", get(get_accessory))
        .route("/api/v1/metrics", get(get_all_metrics))
        .route("/api/v1/metrics/:metric", get(get_metric))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/identify", post(identify))
        .with_state(state)
}

fn characteristics() -> Vec<CharacteristicInfo> {
    let entry = |service, characteristic, metric, min, max| CharacteristicInfo {
        service,
        characteristic,
        metric,
        min,
        max,
    };
    vec![
        entry(ServiceKind::Temperature, "CurrentTemperature", Metric::Temperature, -100.0, 100.0),
        entry(ServiceKind::WaterLevel, "CurrentRelativeHumidity", Metric::WaterLevel, 0.0, 100.0),
        entry(ServiceKind::Battery, "StatusLowBattery", Metric::BatteryLow, 0.0, 1.0),
        entry(ServiceKind::Battery, "BatteryLevel", Metric::BatteryLevel, 0.0, 100.0),
        entry(ServiceKind::Liveness, "StatusActive", Metric::Active, 0.0, 1.0),
    ]
}

async fn get_accessory(State(state): State<AppState>) -> Json<AccessoryInfo> {
    let cache = state.dispatcher.cache();
    Json(AccessoryInfo {
        name: state.name.clone(),
        manufacturer: MANUFACTURER,
        model: MODEL,
        serial_number: SERIAL_NUMBER,
        firmware_revision: cache
            .snapshot()
            .and_then(|snapshot| snapshot.software_revision.clone()),
        device_id: cache.device().device_id.clone(),
        services: characteristics(),
    })
}

async fn get_metric(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MetricReading>, AppError> {
    let metric: Metric = name.parse().map_err(AppError::NotFound)?;

    state
        .dispatcher
        .read(metric)
        .await
        .map(Json)
        .map_err(|source| AppError::Upstream {
            service: metric.service(),
            source,
        })
}

async fn get_all_metrics(State(state): State<AppState>) -> Json<Vec<MetricEntry>> {
    let entries = state
        .dispatcher
        .read_all()
        .await
        .into_iter()
        .map(|(metric, result)| match result {
            Ok(reading) => MetricEntry {
                metric,
                value: Some(reading.value),
                origin: Some(reading.origin),
                error: None,
            },
            Err(e) => MetricEntry {
                metric,
                value: None,
                origin: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    Json(entries)
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        faults: state.dispatcher.faults(),
        cache: state.dispatcher.cache().status(),
    })
}

async fn identify(State(state): State<AppState>) -> Json<IdentifyResponse> {
    state.dispatcher.identify();
    Json(IdentifyResponse { identified: true })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<ServiceKind>,
    fault: bool,
}

enum AppError {
    NotFound(String),
    Upstream {
        service: ServiceKind,
        source: SharedError,
    },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: message,
                    service: None,
                    fault: false,
                },
            ),
            AppError::Upstream { service, source } => {
                error!("API error: {}", source);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody {
                        error: source.to_string(),
                        service: Some(service),
                        fault: true,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

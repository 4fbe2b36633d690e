use crate::errors::{Error, Result};
use chrono::Duration;
use clap::Parser;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_NAME: &str = "WaterTankSensor";
pub const DEFAULT_API_BASE: &str = "https://mojdomek.eu";
pub const DEFAULT_CACHE_EXPIRY_MINUTES: i64 = 10;
/// One week
pub const MAX_CACHE_EXPIRY_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, Parser)]
#[command(name = "tankbridge", version, about = "Water tank telemetry bridge")]
pub struct Args {
    /// JSON accessory config: {"name", "user_id", "device_id", "cacheExpiryTime"}
    #[arg(long, env = "TANK_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TANK_NAME")]
    pub name: Option<String>,

    #[arg(long, env = "TANK_USER_ID")]
    pub user_id: Option<String>,

    #[arg(long, env = "TANK_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Minutes a fetched reading stays fresh
    #[arg(long, env = "TANK_CACHE_EXPIRY_TIME")]
    pub cache_expiry_time: Option<String>,

    #[arg(long, env = "TANK_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    #[arg(long, env = "TANK_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

/// Accessory block as the home-automation host stores it
#[derive(Debug, Default, Deserialize)]
pub struct AccessoryConfig {
    pub name: Option<String>,
    pub user_id: Option<Value>,
    pub device_id: Option<Value>,
    #[serde(rename = "cacheExpiryTime")]
    pub cache_expiry_time: Option<Value>,
    pub api_base: Option<String>,
}

impl AccessoryConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Who we poll for. Both identifiers are required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub user_id: String,
    pub device_id: String,
    pub api_url: String,
}

impl DeviceIdentity {
    pub fn new(user_id: &str, device_id: &str, api_base: &str) -> Result<Self> {
        let user_id = user_id.trim();
        let device_id = device_id.trim();
        if user_id.is_empty() {
            return Err(Error::Config("No 'user_id' config value".to_string()));
        }
        if device_id.is_empty() {
            return Err(Error::Config("No 'device_id' config value".to_string()));
        }

        let endpoint = format!("{}/api/api.php", api_base.trim_end_matches('/'));
        let api_url = Url::parse_with_params(&endpoint, &[("id", user_id)])
            .map_err(|e| Error::Config(format!("Invalid API base {:?}: {}", api_base, e)))?;

        Ok(Self {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            api_url: api_url.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub device: DeviceIdentity,
    pub cache_expiry_minutes: i64,
    pub http_addr: String,
    pub request_timeout: std::time::Duration,
}

impl Config {
    pub fn load(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => {
                info!("Reading accessory config from {}", path.display());
                AccessoryConfig::from_file(path)?
            }
            None => AccessoryConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Command line and environment win over the config file.
    pub fn resolve(args: Args, file: AccessoryConfig) -> Result<Self> {
        let user_id = args
            .user_id
            .or_else(|| file.user_id.as_ref().and_then(value_to_string))
            .unwrap_or_default();
        let device_id = args
            .device_id
            .or_else(|| file.device_id.as_ref().and_then(value_to_string))
            .unwrap_or_default();
        let api_base = args
            .api_base
            .or(file.api_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let device = DeviceIdentity::new(&user_id, &device_id, &api_base)?;

        let raw_expiry = args
            .cache_expiry_time
            .or_else(|| file.cache_expiry_time.as_ref().and_then(value_to_string));
        let cache_expiry_minutes = coerce_cache_expiry(raw_expiry.as_deref());
        info!("cacheExpiryTime set: {} minutes", cache_expiry_minutes);

        Ok(Self {
            name: args
                .name
                .or(file.name)
                .unwrap_or_else(|| DEFAULT_NAME.to_string()),
            device,
            cache_expiry_minutes,
            http_addr: args.http_addr,
            request_timeout: std::time::Duration::from_secs(args.request_timeout_secs),
        })
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::minutes(self.cache_expiry_minutes)
    }
}

/// Whole minutes between 1 and a week. Anything else falls back to the default.
pub fn coerce_cache_expiry(raw: Option<&str>) -> i64 {
    let Some(raw) = raw else {
        return DEFAULT_CACHE_EXPIRY_MINUTES;
    };

    match raw.trim().parse::<f64>() {
        Ok(minutes) if !minutes.is_finite() => {
            warn!("Wrong config 'cacheExpiryTime' parameter {:?}. Set to default.", raw);
            DEFAULT_CACHE_EXPIRY_MINUTES
        }
        Ok(minutes) if minutes < 1.0 => {
            warn!("'cacheExpiryTime' lower than 1. Set to default.");
            DEFAULT_CACHE_EXPIRY_MINUTES
        }
        Ok(minutes) if minutes > MAX_CACHE_EXPIRY_MINUTES as f64 => {
            warn!(
                "'cacheExpiryTime' above {} minutes. Set to default.",
                MAX_CACHE_EXPIRY_MINUTES
            );
            DEFAULT_CACHE_EXPIRY_MINUTES
        }
        Ok(minutes) => {
            let minutes = minutes.floor() as i64;
            match Duration::try_minutes(minutes) {
                Some(_) => minutes,
                None => {
                    warn!("'cacheExpiryTime' out of range. Set to default.");
                    DEFAULT_CACHE_EXPIRY_MINUTES
                }
            }
        }
        Err(_) => {
            warn!("Wrong config 'cacheExpiryTime' parameter {:?}. Set to default.", raw);
            DEFAULT_CACHE_EXPIRY_MINUTES
        }
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

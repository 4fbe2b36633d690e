use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {0}")]
    Status(u16),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Device {device_id} not found among {available} provider records")]
    DeviceNotFound { device_id: String, available: usize },

    #[error("Fetch task ended without delivering a result")]
    FetchAborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The provider could not be reached or answered with a non-success status.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Status(_) | Error::Io(_) | Error::FetchAborted
        )
    }

    /// The provider answered, but not with a usable record for our device.
    pub fn is_data_shape(&self) -> bool {
        matches!(self, Error::Json(_) | Error::DeviceNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error handed to every waiter of a single fetch.
pub type SharedError = Arc<Error>;

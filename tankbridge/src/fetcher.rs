use crate::errors::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const USER_AGENT: &str = concat!("tankbridge/", env!("CARGO_PKG_VERSION"));

/// Status code and JSON body of one provider call
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Value,
}

impl FetchResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }
}

/// Outbound GET capability. Transport failures are `Err`; any HTTP answer is `Ok`.
#[async_trait]
pub trait TelemetryFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TelemetryFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        // Error pages are rarely JSON; the status alone decides failure then
        let body = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            Err(e) if status == StatusCode::OK.as_u16() => return Err(Error::Json(e)),
            Err(_) => Value::Null,
        };

        Ok(FetchResponse { status, body })
    }
}

//! Scriptable provider for tests and offline runs.

use crate::errors::{Error, Result};
use crate::fetcher::{FetchResponse, TelemetryFetcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub enum MockResponse {
    Json { status: u16, body: Value },
    TransportError(String),
}

impl MockResponse {
    pub fn ok(body: Value) -> Self {
        MockResponse::Json { status: 200, body }
    }

    pub fn status(status: u16) -> Self {
        MockResponse::Json {
            status,
            body: Value::Null,
        }
    }

    fn into_result(self) -> Result<FetchResponse> {
        match self {
            MockResponse::Json { status, body } => Ok(FetchResponse { status, body }),
            MockResponse::TransportError(msg) => Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                msg,
            ))),
        }
    }
}

pub struct MockFetcher {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: Mutex<MockResponse>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    held: AtomicBool,
    gate: Semaphore,
}

impl MockFetcher {
    pub fn new(fallback: MockResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    /// Answer with a one-device list until told otherwise
    pub fn with_device(record: Value) -> Self {
        Self::new(MockResponse::ok(provider_body(vec![record])))
    }

    pub fn push(&self, response: MockResponse) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    pub fn set_fallback(&self, response: MockResponse) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subsequent fetches block until [`MockFetcher::release`] is called
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let one held fetch complete
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    fn next_response(&self) -> MockResponse {
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| {
            self.fallback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }
}

#[async_trait]
impl TelemetryFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        if self.held.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        self.next_response().into_result()
    }
}

/// Provider payload wrapping the given device records
pub fn provider_body(records: Vec<Value>) -> Value {
    json!({ "locations": records })
}

/// A provider device record in the wire shape
pub fn device_record(
    id: &str,
    temperature: f64,
    percent: f64,
    volts: f64,
    last_contact: DateTime<Utc>,
) -> Value {
    json!({
        "id": id,
        "active": 1,
        "software": "1.0.3",
        "measurement": {
            "temperature": temperature,
            "percent": percent,
            "volts": volts,
            "datatime": last_contact.to_rfc3339(),
        }
    })
}

//! Vessel sources: the local registry and the cloud nearby-vessels service.
//!
//! Each source normalizes its own JSON shape into strict
//! [`VesselSnapshot`]s at the boundary. Failures are classified but never
//! fatal; the service treats them as "no data this cycle".

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use ais_core::types::{Mmsi, Position, VesselSnapshot};

pub mod cloud;
pub mod local;

pub use cloud::CloudFleet;
pub use local::LocalRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("server error: HTTP {0}")]
    Server(StatusCode),
    #[error("access denied: HTTP {0}")]
    AccessDenied(StatusCode),
    #[error("unexpected response: HTTP {0}")]
    Status(StatusCode),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Coarse label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Server(_) => "server",
            SourceError::AccessDenied(_) => "access_denied",
            SourceError::Status(_) => "status",
            SourceError::Network(_) => "network",
            SourceError::Malformed(_) => "malformed",
        }
    }
}

/// Map a non-success HTTP status to an error.
pub fn classify_status(status: StatusCode) -> Option<SourceError> {
    if status.is_success() {
        None
    } else if status.is_server_error() {
        Some(SourceError::Server(status))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(SourceError::AccessDenied(status))
    } else {
        Some(SourceError::Status(status))
    }
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// What a source may need to know about own ship.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FetchContext {
    pub own_mmsi: Option<Mmsi>,
    pub own_position: Option<Position>,
}

#[async_trait::async_trait]
pub trait VesselSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<VesselSnapshot>, SourceError>;
}

/// GET `request` and parse the body as JSON, classifying failures.
pub(crate) async fn fetch_json(request: reqwest::RequestBuilder) -> Result<Value, SourceError> {
    let response = request.send().await?;
    if let Some(err) = classify_status(response.status()) {
        return Err(err);
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| SourceError::Malformed(e.to_string()))
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Number or numeric string.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|v: &f64| v.is_finite())
}

pub(crate) fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

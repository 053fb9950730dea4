//! Shared JSON-over-HTTP plumbing for REST venues.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;

use crate::error::{GuardError, Result, VenueError};
use crate::exchange::VenueResult;

pub(crate) struct VenueHttp {
    venue: String,
    http: Client,
    bearer: Option<String>,
}

impl VenueHttp {
    pub(crate) fn new(venue: &str, timeout_ms: u64, bearer: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("flatline/0.1")
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| {
                GuardError::Internal(format!("failed to build HTTP client for {}: {}", venue, e))
            })?;

        Ok(Self {
            venue: venue.to_string(),
            http,
            bearer,
        })
    }

    pub(crate) async fn request_json(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> VenueResult<Value> {
        let mut req = self.http.request(method.clone(), url);

        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| VenueError::unavailable(&self.venue, format!("{} {}: {}", method, url, e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| VenueError::unavailable(&self.venue, format!("reading body: {}", e)))?;

        if !status.is_success() {
            let reason = format!("{} {} failed: status={} body={}", method, url, status, text);
            return Err(if is_transient_status(status) {
                VenueError::unavailable(&self.venue, reason)
            } else {
                VenueError::data(&self.venue, reason)
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text)
            .map_err(|e| VenueError::data(&self.venue, format!("invalid JSON response: {}", e)))
    }
}

/// Network-ish statuses. Auth failures count: a rotated key is not bad data.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || matches!(
            status,
            StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
        )
}

pub(crate) fn pick<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| root.get(*key))
}

pub(crate) fn pick_array<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a [Value]> {
    if let Some(items) = root.as_array() {
        return Some(items.as_slice());
    }
    keys.iter()
        .find_map(|key| root.get(*key).and_then(|v| v.as_array()).map(Vec::as_slice))
}

pub(crate) fn pick_str<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a str> {
    pick(root, keys).and_then(|v| v.as_str())
}

/// Decimal from either a JSON string or number
pub(crate) fn parse_decimalish(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.trim().parse::<Decimal>().ok(),
        Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        _ => None,
    }
}

/// Required decimal field; absent or unparsable is a data error
pub(crate) fn require_decimal(
    venue: &str,
    root: &Value,
    keys: &[&str],
) -> VenueResult<Decimal> {
    pick(root, keys)
        .and_then(parse_decimalish)
        .ok_or_else(|| VenueError::data(venue, format!("missing or invalid field {}", keys[0])))
}

//! Per-request deadline: `X-Request-Timeout` header, then the `timeoutSec`
//! query parameter, then the route default. Values are whole seconds;
//! anything else is ignored.

use std::time::Duration;

use axum::http::HeaderMap;
use serde::Deserialize;

pub const TIMEOUT_HEADER: &str = "x-request-timeout";

#[derive(Debug, Default, Deserialize)]
pub struct DeadlineQuery {
    #[serde(rename = "timeoutSec")]
    pub timeout_sec: Option<String>,
}

fn seconds(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => None,
    }
}

pub fn request_deadline(headers: &HeaderMap, query: &DeadlineQuery, default: Duration) -> Duration {
    headers
        .get(TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(seconds)
        .or_else(|| query.timeout_sec.as_deref().and_then(seconds))
        .unwrap_or(default)
}

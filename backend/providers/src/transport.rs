use std::time::Duration;

use lessonkit_core::LlmError;
use reqwest::Client;

/// HTTP settings shared by every adapter. There is no overall request
/// timeout; the caller's deadline bounds each call.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    /// Longest wait for any single read, which also bounds the wait for
    /// response headers.
    pub read_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 100,
        }
    }
}

pub fn build_client(settings: &TransportSettings) -> Result<Client, LlmError> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.read_timeout)
        .pool_idle_timeout(settings.pool_idle_timeout)
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .user_agent(concat!("lessonkit/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LlmError::Internal(format!("failed to build HTTP client: {e}")))
}

/// Map a transport failure to a provider error.
pub(crate) fn send_error(engine: &str, err: reqwest::Error) -> LlmError {
    LlmError::provider(engine, err.status().map(|s| s.as_u16()), &err.to_string())
}

/// Read a response body, turning non-2xx statuses into provider errors.
pub(crate) async fn read_body(engine: &str, response: reqwest::Response) -> Result<String, LlmError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| send_error(engine, e))?;
    if !status.is_success() {
        return Err(LlmError::provider(engine, Some(status.as_u16()), &body));
    }
    Ok(body)
}

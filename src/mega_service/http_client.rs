use anyhow::{Context, Result};
use log::{debug, warn};
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

const API_BASE: &str = "https://g.api.mega.co.nz/cs";

/// Retries for the transient `-3` (try again) API code.
const MAX_RETRIES: u32 = 4;

/// MEGA API error codes returned as bare negative integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("internal server error (-1)")]
    Internal,
    #[error("invalid arguments (-2)")]
    Args,
    #[error("request rate limited (-4)")]
    RateLimit,
    #[error("access denied (-11)")]
    AccessDenied,
    #[error("resource already exists (-12)")]
    Exists,
    #[error("resource does not exist (-9)")]
    NotExist,
    #[error("session expired (-15)")]
    Expired,
    #[error("storage quota exceeded (-17)")]
    OverQuota,
    #[error("API error code {0}")]
    Other(i64),
}

impl From<i64> for ApiError {
    fn from(code: i64) -> Self {
        match code {
            -1 => ApiError::Internal,
            -2 => ApiError::Args,
            -4 => ApiError::RateLimit,
            -9 => ApiError::NotExist,
            -11 => ApiError::AccessDenied,
            -12 => ApiError::Exists,
            -15 => ApiError::Expired,
            -17 => ApiError::OverQuota,
            other => ApiError::Other(other),
        }
    }
}

/// HTTP transport for the MEGA JSON command endpoint.
///
/// Commands are posted as single-element JSON arrays to `/cs` with an
/// increasing sequence id; responses come back as a matching array. Bare
/// negative integers anywhere in the response signal API errors.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    api_base: String,
    sequence: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_base(API_BASE)
    }

    pub fn with_base(api_base: &str) -> Self {
        let seed: u64 = rand::thread_rng().gen_range(0..0x1_0000_0000);
        Self {
            client: Client::new(),
            api_base: api_base.to_string(),
            sequence: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(seed)),
        }
    }

    /// Post a single command, returning its response value.
    ///
    /// The transient `-3` code is retried with linear backoff; every other
    /// negative code is surfaced as [`ApiError`].
    pub async fn command(&self, command: Value, session: Option<&str>) -> Result<Value> {
        let id = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut url = format!("{}?id={}", self.api_base, id);
        if let Some(sid) = session {
            url.push_str(&format!("&sid={}", sid));
        }

        let mut attempt = 0;
        loop {
            debug!("API command: {}", command.get("a").unwrap_or(&Value::Null));

            let response = self
                .client
                .post(&url)
                .json(&json!([command]))
                .send()
                .await
                .context("Failed to post API command")?
                .error_for_status()
                .context("Not a success status")?
                .json::<Value>()
                .await
                .context("Failed to deserialize API response")?;

            match Self::unwrap_response(response) {
                Err(code) if code == -3 && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!("API asked to retry (attempt {}/{})", attempt, MAX_RETRIES);
                    sleep(Duration::from_millis(250 * attempt as u64)).await;
                    continue;
                }
                Err(code) => return Err(ApiError::from(code).into()),
                Ok(value) => return Ok(value),
            }
        }
    }

    /// Fetch raw bytes from a temporary content URL.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch content")?
            .error_for_status()
            .context("Not a success status")?;
        Ok(response.bytes().await.context("Failed to read content body")?.to_vec())
    }

    /// Upload raw bytes to a temporary upload URL, returning the
    /// completion token the API hands back.
    pub async fn put_bytes(&self, url: &str, data: Vec<u8>) -> Result<String> {
        let response = self
            .client
            .post(url)
            .body(data)
            .send()
            .await
            .context("Failed to upload content")?
            .error_for_status()
            .context("Not a success status")?;
        Ok(response.text().await.context("Failed to read upload token")?)
    }

    /// Peel the single-command array wrapper, separating API error codes
    /// from payloads.
    fn unwrap_response(response: Value) -> std::result::Result<Value, i64> {
        // A bare negative integer means the whole batch failed.
        if let Some(code) = response.as_i64() {
            return Err(code);
        }
        match response {
            Value::Array(mut items) if !items.is_empty() => {
                let first = items.remove(0);
                if let Some(code) = first.as_i64() {
                    if code < 0 {
                        return Err(code);
                    }
                }
                Ok(first)
            }
            other => Ok(other),
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_batch_error() {
        assert_eq!(HttpClient::unwrap_response(json!(-2)), Err(-2));
    }

    #[test]
    fn test_unwrap_command_error() {
        assert_eq!(HttpClient::unwrap_response(json!([-9])), Err(-9));
    }

    #[test]
    fn test_unwrap_payload() {
        let value = HttpClient::unwrap_response(json!([{"ok": 1}])).unwrap();
        assert_eq!(value["ok"], 1);
    }

    #[test]
    fn test_api_error_mapping() {
        assert_eq!(ApiError::from(-9), ApiError::NotExist);
        assert_eq!(ApiError::from(-12), ApiError::Exists);
        assert_eq!(ApiError::from(-42), ApiError::Other(-42));
    }
}

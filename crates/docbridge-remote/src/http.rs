//! Throttled REST call layer with uniform response decoding.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, trace};

use docbridge_core::{Error, Result};

use crate::config::RemoteConfig;
use crate::error::to_error;
use crate::rate_limit::{EndpointClass, RateLimiter};
use crate::types::{ApiEnvelope, ErrorBody};

/// HTTP client bound to one remote platform base URL.
pub struct RestClient {
    client: Client,
    config: RemoteConfig,
    limiter: RateLimiter,
}

impl RestClient {
    /// Create a new client with the given configuration.
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, "Initializing remote client");

        let limiter = RateLimiter::from_config(&config);
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Start a request, attaching a bearer token when given.
    pub fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Send a request whose body is a `{code, msg, data}` envelope and decode `data`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        class: EndpointClass,
        req: RequestBuilder,
    ) -> Result<T> {
        let (status, body) = self.send(class, req).await?;
        decode_envelope(status, &body)
    }

    /// Send a request whose body is decoded directly as `T` (no envelope).
    pub async fn execute_raw<T: DeserializeOwned>(
        &self,
        class: EndpointClass,
        req: RequestBuilder,
    ) -> Result<T> {
        let (status, body) = self.send(class, req).await?;
        check_failure(status, &body)?;
        serde_json::from_slice(&body).map_err(|e| Error::Decode(e.to_string()))
    }

    async fn send(&self, class: EndpointClass, req: RequestBuilder) -> Result<(StatusCode, Vec<u8>)> {
        self.limiter.throttle(class).await;

        let response = req
            .send()
            .await
            .map_err(|e| Error::Request(format!("Request failed: {}", e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Request(format!("Failed to read response: {}", e)))?;
        trace!(endpoint = %class, status = status.as_u16(), len = body.len(), "Response received");
        Ok((status, body.to_vec()))
    }
}

/// Fail on HTTP errors or non-zero business codes.
fn check_failure(status: StatusCode, body: &[u8]) -> Result<()> {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let code = parsed.code.unwrap_or(0);
    if code != 0 || !status.is_success() {
        let message = match parsed.message() {
            m if m.is_empty() => String::from_utf8_lossy(body).chars().take(200).collect(),
            m => m,
        };
        debug!(status = status.as_u16(), code, message = %message, "Remote call failed");
        return Err(to_error(status.as_u16(), code, &message));
    }
    Ok(())
}

/// Decode the `data` member of an envelope, failing closed on shape mismatch.
pub fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T> {
    check_failure(status, body)?;
    let envelope: ApiEnvelope<T> =
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?;
    match envelope.data {
        Some(data) => Ok(data),
        None => serde_json::from_value(Value::Object(Default::default()))
            .map_err(|_| Error::Decode("response is missing `data`".to_string())),
    }
}

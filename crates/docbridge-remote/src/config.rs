//! Remote platform connection configuration.

use docbridge_core::defaults;

use crate::rate_limit::{EndpointClass, RateLimit};

/// Configuration for the remote REST client and OAuth flow.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Open-platform REST base URL.
    pub base_url: String,
    /// OAuth authorize page opened during re-authorization.
    pub auth_url: String,
    /// App id (OAuth client id).
    pub app_id: String,
    /// App secret (OAuth client secret).
    pub app_secret: String,
    /// Redirect URI registered for the app.
    pub redirect_uri: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    pub document_rate: RateLimit,
    pub import_rate: RateLimit,
    pub block_rate: RateLimit,
    pub drive_rate: RateLimit,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            auth_url: defaults::AUTH_URL.to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            redirect_uri: defaults::REDIRECT_URI.to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECS,
            document_rate: RateLimit::new(
                defaults::DOCUMENT_RATE_PER_SEC,
                defaults::DOCUMENT_RATE_PER_MIN,
            ),
            import_rate: RateLimit::new(defaults::IMPORT_RATE_PER_SEC, defaults::IMPORT_RATE_PER_MIN),
            block_rate: RateLimit::new(defaults::BLOCK_RATE_PER_SEC, defaults::BLOCK_RATE_PER_MIN),
            drive_rate: RateLimit::new(defaults::DRIVE_RATE_PER_SEC, defaults::DRIVE_RATE_PER_MIN),
        }
    }
}

impl RemoteConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DOCBRIDGE_BASE_URL` | `https://open.feishu.cn/open-apis` |
    /// | `DOCBRIDGE_AUTH_URL` | `https://accounts.feishu.cn/open-apis/authen/v1/authorize` |
    /// | `DOCBRIDGE_APP_ID` | (empty) |
    /// | `DOCBRIDGE_APP_SECRET` | (empty) |
    /// | `DOCBRIDGE_REDIRECT_URI` | `http://localhost:8080/callback` |
    /// | `DOCBRIDGE_TIMEOUT` | `60` |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            base_url: std::env::var("DOCBRIDGE_BASE_URL").unwrap_or(base.base_url),
            auth_url: std::env::var("DOCBRIDGE_AUTH_URL").unwrap_or(base.auth_url),
            app_id: std::env::var("DOCBRIDGE_APP_ID").unwrap_or_default(),
            app_secret: std::env::var("DOCBRIDGE_APP_SECRET").unwrap_or_default(),
            redirect_uri: std::env::var("DOCBRIDGE_REDIRECT_URI").unwrap_or(base.redirect_uri),
            timeout_seconds: std::env::var("DOCBRIDGE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.timeout_seconds),
            ..base
        }
    }

    /// Point the client at a different base URL (e.g. a mock server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set app credentials.
    pub fn with_app(mut self, app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self.app_secret = app_secret.into();
        self
    }

    /// Apply one limit to every endpoint class.
    pub fn with_uniform_rate(mut self, limit: RateLimit) -> Self {
        self.document_rate = limit;
        self.import_rate = limit;
        self.block_rate = limit;
        self.drive_rate = limit;
        self
    }

    /// Limit configured for an endpoint class.
    pub fn rate_for(&self, class: EndpointClass) -> RateLimit {
        match class {
            EndpointClass::DocumentMetadata => self.document_rate,
            EndpointClass::ImportJob => self.import_rate,
            EndpointClass::BlockMutation => self.block_rate,
            EndpointClass::Drive => self.drive_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemoteConfig::default();
        assert_eq!(config.base_url, defaults::BASE_URL);
        assert_eq!(config.timeout_seconds, defaults::REQUEST_TIMEOUT_SECS);
        assert!(config.app_id.is_empty());
        assert_eq!(
            config.rate_for(EndpointClass::BlockMutation).per_second,
            defaults::BLOCK_RATE_PER_SEC
        );
    }

    #[test]
    fn test_builders() {
        let config = RemoteConfig::default()
            .with_base_url("http://127.0.0.1:9999")
            .with_app("cli_x", "secret")
            .with_uniform_rate(RateLimit::unlimited());
        assert_eq!(config.base_url, "http://127.0.0.1:9999");
        assert_eq!(config.app_id, "cli_x");
        assert_eq!(config.rate_for(EndpointClass::ImportJob), RateLimit::unlimited());
    }
}

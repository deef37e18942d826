//! Engine configuration.

use std::time::Duration;

use docbridge_core::{defaults, LinkSharePolicy};
use tracing::warn;

/// Configuration for publishing and updating documents.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Drive folder new documents are imported into. Empty means the root folder.
    pub folder_token: String,
    /// Base of user-facing document links, e.g. `https://feishu.cn/docx`.
    pub doc_base_url: String,
    /// Base of user-facing links to raw uploaded files.
    pub file_base_url: String,
    /// Link-sharing policy applied after publishing.
    pub link_share: LinkSharePolicy,
    /// Whether to touch link sharing at all.
    pub enable_sharing: bool,
    /// Upper bound for waiting on an import job.
    pub import_timeout: Duration,
    /// Upper bound for the interactive re-authorization wait.
    pub reauth_timeout: Duration,
    /// Whether an invalid credential may trigger the interactive wait.
    pub interactive: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            folder_token: String::new(),
            doc_base_url: defaults::DOC_BASE_URL.to_string(),
            file_base_url: defaults::FILE_BASE_URL.to_string(),
            link_share: LinkSharePolicy::default(),
            enable_sharing: true,
            import_timeout: Duration::from_millis(defaults::IMPORT_TIMEOUT_MS),
            reauth_timeout: defaults::REAUTH_TIMEOUT,
            interactive: true,
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DOCBRIDGE_FOLDER_TOKEN` | (root) | Target drive folder |
    /// | `DOCBRIDGE_DOC_BASE_URL` | `https://feishu.cn/docx` | Document link base |
    /// | `DOCBRIDGE_LINK_SHARE` | `tenant_readable` | Link-sharing policy |
    /// | `DOCBRIDGE_ENABLE_SHARING` | `true` | Apply link sharing after publish |
    /// | `DOCBRIDGE_IMPORT_TIMEOUT_MS` | `60000` | Import job wait bound |
    /// | `DOCBRIDGE_REAUTH_TIMEOUT_SECS` | `300` | Re-authorization wait bound |
    /// | `DOCBRIDGE_INTERACTIVE` | `true` | Allow the re-authorization wait |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(folder) = std::env::var("DOCBRIDGE_FOLDER_TOKEN") {
            config.folder_token = folder;
        }

        if let Ok(url) = std::env::var("DOCBRIDGE_DOC_BASE_URL") {
            if !url.is_empty() {
                config.doc_base_url = url.trim_end_matches('/').to_string();
            }
        }

        if let Ok(policy) = std::env::var("DOCBRIDGE_LINK_SHARE") {
            match LinkSharePolicy::parse(&policy) {
                Some(p) => config.link_share = p,
                None => warn!(value = %policy, "Unknown DOCBRIDGE_LINK_SHARE, using default"),
            }
        }

        config.enable_sharing = std::env::var("DOCBRIDGE_ENABLE_SHARING")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        config.interactive = std::env::var("DOCBRIDGE_INTERACTIVE")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        if let Some(ms) = std::env::var("DOCBRIDGE_IMPORT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.import_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = std::env::var("DOCBRIDGE_REAUTH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.reauth_timeout = Duration::from_secs(secs);
        }

        config
    }

    pub fn with_folder(mut self, folder_token: impl Into<String>) -> Self {
        self.folder_token = folder_token.into();
        self
    }

    pub fn with_link_share(mut self, policy: LinkSharePolicy) -> Self {
        self.link_share = policy;
        self
    }

    pub fn with_sharing(mut self, enabled: bool) -> Self {
        self.enable_sharing = enabled;
        self
    }

    pub fn with_import_timeout(mut self, timeout: Duration) -> Self {
        self.import_timeout = timeout;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// User-facing link to a document.
    pub fn document_url(&self, document_id: &str) -> String {
        format!("{}/{}", self.doc_base_url.trim_end_matches('/'), document_id)
    }

    /// User-facing link to a raw uploaded file.
    pub fn file_url(&self, file_token: &str) -> String {
        format!("{}/{}", self.file_base_url.trim_end_matches('/'), file_token)
    }
}

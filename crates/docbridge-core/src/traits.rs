//! Collaborator traits for docbridge.
//!
//! These traits define the boundary between the sync engine and the host
//! application (settings storage, vault access, browser launch, status
//! display), enabling pluggable implementations and testability.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::{Credential, TransformedNote};

// =============================================================================
// CREDENTIAL STORAGE
// =============================================================================

/// Persistent storage for the OAuth token pair.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the currently stored credential (empty if none).
    async fn load(&self) -> Result<Credential>;

    /// Persist a credential, replacing the previous one.
    async fn save(&self, credential: &Credential) -> Result<()>;
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Credential>,
}

impl MemoryCredentialStore {
    pub fn new(credential: Credential) -> Self {
        Self {
            inner: Mutex::new(credential),
        }
    }

    /// Snapshot of the stored value.
    pub fn get(&self) -> Credential {
        self.inner
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Credential> {
        Ok(self.get())
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Internal("credential store lock poisoned".into()))?;
        *guard = credential.clone();
        Ok(())
    }
}

/// Credential store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Poll the file every `interval` and fire `signal` whenever its content
    /// changes, so a host that writes a fresh token pair ends a pending
    /// re-authorization wait.
    pub async fn watch(&self, signal: AuthSignal, interval: Duration) -> JoinHandle<()> {
        let path = self.path.clone();
        let mut last = tokio::fs::read(&path).await.ok();
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let current = tokio::fs::read(&path).await.ok();
                if current.is_some() && current != last {
                    let waiters = signal.notify();
                    debug!(path = %path.display(), waiters, "Credential file changed");
                }
                last = current;
            }
        })
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credential> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No credential file, starting empty");
                Ok(Credential::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(credential)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

// =============================================================================
// CONTENT SOURCE
// =============================================================================

/// Read access to the local vault.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Raw bytes of an attachment.
    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>>;

    /// A linked note, already run through the text transformer.
    async fn load_note(&self, path: &str) -> Result<TransformedNote>;
}

/// Vault on the local file system.
///
/// Notes are returned verbatim with no placeholder extraction; hosts that
/// run a dialect transformer supply their own `ContentSource`.
#[derive(Debug, Clone)]
pub struct FsContentSource {
    root: PathBuf,
}

impl FsContentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = std::path::Path::new(path);
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::InvalidInput(format!(
                "path escapes vault root: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::read(full).await?)
    }

    async fn load_note(&self, path: &str) -> Result<TransformedNote> {
        let full = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&full).await?;
        let title = full
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Ok(TransformedNote {
            title,
            content,
            pending_contents: Vec::new(),
        })
    }
}

// =============================================================================
// INTERACTIVE AUTHORIZATION
// =============================================================================

/// Opens the OAuth authorization page for the user.
pub trait AuthorizationPrompt: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Prompt that only logs the URL (headless hosts).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuthorizationPrompt;

impl AuthorizationPrompt for LogAuthorizationPrompt {
    fn open(&self, url: &str) -> Result<()> {
        info!(url, "Open this URL to authorize access");
        Ok(())
    }
}

/// Payload-free "authorization completed" signal.
///
/// The host's callback handler stores the new credential and then calls
/// [`AuthSignal::notify`]; waiters subscribe before opening the browser.
#[derive(Debug, Clone)]
pub struct AuthSignal {
    tx: broadcast::Sender<()>,
}

impl Default for AuthSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(defaults::AUTH_SIGNAL_CAPACITY);
        Self { tx }
    }

    /// Register a listener. Dropping the receiver deregisters it.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Announce that authorization completed. Returns the number of waiters.
    pub fn notify(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Stage of a publish or update, rendered as a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressStage {
    Authenticating,
    Uploading,
    Converting,
    Attachment { current: usize, total: usize },
    SettingPermissions,
    Replacing,
    CleaningUp,
    Done,
    Failed(String),
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticating => write!(f, "Checking authorization..."),
            Self::Uploading => write!(f, "Uploading document..."),
            Self::Converting => write!(f, "Converting document..."),
            Self::Attachment { current, total } => {
                write!(f, "Processing attachment {} of {}...", current, total)
            }
            Self::SettingPermissions => write!(f, "Setting sharing permissions..."),
            Self::Replacing => write!(f, "Replacing document content..."),
            Self::CleaningUp => write!(f, "Cleaning up temporary files..."),
            Self::Done => write!(f, "Done"),
            Self::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Receives human-readable progress for UI status display.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: ProgressStage);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _stage: ProgressStage) {}
}

/// Logs progress at INFO.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, stage: ProgressStage) {
        info!(stage = %stage, "Progress");
    }
}

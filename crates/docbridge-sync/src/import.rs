//! Import jobs: upload a Markdown source, convert it, wait for the result.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use docbridge_core::{defaults, Error, ImportJob, ImportOutcome, ImportStatus, Result};
use docbridge_remote::{DocumentApi, DriveFileKind, ImportTaskResult};

use crate::config::SyncConfig;
use crate::permissions::discard_file;

/// Classify one status report.
///
/// `attempt` is 1-based. Failure-looking statuses without a document are
/// treated as transient for the first few attempts because the platform
/// sometimes reports them before the document appears.
pub fn classify(result: &ImportTaskResult, attempt: u32) -> ImportJob {
    let document_id = result.document_token().map(str::to_string);
    let status = match result.job_status {
        None => ImportStatus::Pending,
        Some(code) if defaults::IMPORT_PENDING_STATUSES.contains(&code) => ImportStatus::Pending,
        Some(code) if defaults::IMPORT_SUCCESS_STATUSES.contains(&code) => {
            if document_id.is_some() {
                ImportStatus::Succeeded
            } else {
                ImportStatus::Pending
            }
        }
        Some(_) if document_id.is_some() => ImportStatus::Succeeded,
        Some(_) if attempt <= defaults::IMPORT_TRANSIENT_FAILURE_ATTEMPTS => {
            ImportStatus::FailedRecoverable
        }
        Some(_) => ImportStatus::Failed,
    };
    ImportJob {
        ticket: result.ticket.clone(),
        status,
        document_id,
        url: result.url.clone().filter(|u| !u.is_empty()),
        raw_status: result.job_status,
        message: result.job_error_msg.clone().filter(|m| !m.is_empty()),
    }
}

/// Polls an import job until it settles.
pub struct ImportPoller {
    api: Arc<dyn DocumentApi>,
    max_attempts: u32,
}

impl ImportPoller {
    pub fn new(api: Arc<dyn DocumentApi>) -> Self {
        Self {
            api,
            max_attempts: defaults::IMPORT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Wait for `ticket` to produce a document or fail.
    #[instrument(skip(self), fields(ticket = %ticket))]
    pub async fn wait_for_completion(&self, ticket: &str, timeout: Duration) -> ImportOutcome {
        let started = Instant::now();
        let mut last_message: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            if started.elapsed() >= timeout {
                warn!(attempt, "Import wait timed out");
                return ImportOutcome::Failed {
                    reason: format!(
                        "import timed out after {} ms",
                        timeout.as_millis()
                    ),
                };
            }

            match self.api.get_import_task(ticket).await {
                Ok(result) => {
                    let job = classify(&result, attempt);
                    debug!(attempt, raw_status = ?job.raw_status, status = ?job.status, "Import status");
                    match (job.status, job.document_id) {
                        (ImportStatus::Succeeded, Some(document_id)) => {
                            info!(
                                document_id = %document_id,
                                attempt,
                                duration_ms = started.elapsed().as_millis() as u64,
                                "Import completed"
                            );
                            return ImportOutcome::Completed {
                                document_id,
                                url: job.url,
                            };
                        }
                        (ImportStatus::Failed, _) => {
                            let reason = job.message.unwrap_or_else(|| {
                                format!("import failed with status {:?}", job.raw_status)
                            });
                            warn!(attempt, reason = %reason, "Import failed");
                            return ImportOutcome::Failed { reason };
                        }
                        (ImportStatus::FailedRecoverable, _) => {
                            debug!(attempt, "Failure-looking status, still waiting");
                            last_message = job.message;
                        }
                        _ => {}
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Import status check failed");
                }
            }

            sleep(defaults::import_poll_delay(attempt)).await;
        }

        let reason = match last_message {
            Some(msg) => format!("import did not finish after {} checks: {}", self.max_attempts, msg),
            None => format!("import did not finish after {} checks", self.max_attempts),
        };
        warn!(reason = %reason, "Import gave up");
        ImportOutcome::Failed { reason }
    }
}

/// A converted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedDocument {
    pub document_id: String,
    pub url: String,
}

/// Upload + convert pipeline shared by publishing, scratch documents and
/// sub-documents.
pub struct DocumentImporter {
    api: Arc<dyn DocumentApi>,
    poller: ImportPoller,
    config: Arc<SyncConfig>,
}

impl DocumentImporter {
    pub fn new(api: Arc<dyn DocumentApi>, config: Arc<SyncConfig>) -> Self {
        Self {
            poller: ImportPoller::new(api.clone()),
            api,
            config,
        }
    }

    pub fn with_poller(mut self, poller: ImportPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Upload Markdown as an import source. Returns the drive file token.
    pub async fn upload(&self, title: &str, content: &str) -> Result<String> {
        let file_name = format!("{}.md", source_file_stem(title));
        let token = self
            .api
            .upload_source(&file_name, content.as_bytes().to_vec(), "md")
            .await?;
        debug!(file_token = %token, file_name = %file_name, "Uploaded source");
        Ok(token)
    }

    /// Convert an uploaded source into a document.
    pub async fn convert(&self, source_token: &str, title: &str) -> Result<ImportedDocument> {
        let ticket = self
            .api
            .create_import_task(
                source_token,
                &source_file_stem(title),
                "md",
                &self.config.folder_token,
            )
            .await?;
        match self
            .poller
            .wait_for_completion(&ticket, self.config.import_timeout)
            .await
        {
            ImportOutcome::Completed { document_id, url } => Ok(ImportedDocument {
                url: url.unwrap_or_else(|| self.config.document_url(&document_id)),
                document_id,
            }),
            ImportOutcome::Failed { reason } => Err(Error::ImportFailed(reason)),
        }
    }

    /// Upload and convert. The source file is discarded once converted; on
    /// failure it is kept and named by [`Error::Conversion`].
    pub async fn import(&self, title: &str, content: &str) -> Result<ImportedDocument> {
        let source = self.upload(title, content).await?;
        match self.convert(&source, title).await {
            Ok(document) => {
                discard_file(self.api.as_ref(), &source, DriveFileKind::File).await;
                Ok(document)
            }
            Err(e) => {
                warn!(file_token = %source, error = %e, "Conversion failed, keeping source file");
                Err(Error::Conversion {
                    file_token: source,
                    source: Box::new(e),
                })
            }
        }
    }
}

/// Title made safe for use as a drive file name.
pub fn source_file_stem(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "Untitled".to_string()
    } else {
        cleaned
    }
}

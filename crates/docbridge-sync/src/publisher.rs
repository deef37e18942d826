//! Publishing facade.
//!
//! [`Publisher`] wires the importer, the placeholder resolver and the
//! replacement orchestrator together and turns every outcome into a
//! [`PublishResult`]. It never returns an error: failures are reported in the
//! result so a UI can show them as-is.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use docbridge_core::{
    ContentSource, NoProgress, PendingContent, ProgressSink, ProgressStage, PublishResult,
};
use docbridge_remote::{DocumentApi, DriveFileKind, TokenManager};

use crate::config::SyncConfig;
use crate::import::DocumentImporter;
use crate::permissions::{discard_file, set_link_sharing};
use crate::placeholder::PlaceholderResolver;
use crate::replace::ReplaceOrchestrator;

/// Gate checked before any remote work starts.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether a usable access token is available, possibly after refreshing
    /// or (when `interactive`) waiting for the user to re-authorize.
    async fn ensure_valid(&self, interactive: bool) -> bool;
}

#[async_trait]
impl Authenticator for TokenManager {
    async fn ensure_valid(&self, interactive: bool) -> bool {
        TokenManager::ensure_valid(self, interactive).await
    }
}

/// Publishes notes as new documents or into existing ones.
pub struct Publisher {
    api: Arc<dyn DocumentApi>,
    auth: Arc<dyn Authenticator>,
    source: Arc<dyn ContentSource>,
    config: Arc<SyncConfig>,
    progress: Arc<dyn ProgressSink>,
    importer: Arc<DocumentImporter>,
    resolver: Arc<PlaceholderResolver>,
    orchestrator: ReplaceOrchestrator,
}

impl Publisher {
    pub fn new(
        api: Arc<dyn DocumentApi>,
        auth: Arc<dyn Authenticator>,
        source: Arc<dyn ContentSource>,
        config: SyncConfig,
    ) -> Self {
        Self::assemble(api, auth, source, Arc::new(config), Arc::new(NoProgress))
    }

    /// Route stage updates to `progress`.
    pub fn with_progress(self, progress: Arc<dyn ProgressSink>) -> Self {
        Self::assemble(self.api, self.auth, self.source, self.config, progress)
    }

    fn assemble(
        api: Arc<dyn DocumentApi>,
        auth: Arc<dyn Authenticator>,
        source: Arc<dyn ContentSource>,
        config: Arc<SyncConfig>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let importer = Arc::new(DocumentImporter::new(api.clone(), config.clone()));
        let resolver = Arc::new(
            PlaceholderResolver::new(api.clone(), source.clone(), importer.clone(), config.clone())
                .with_progress(progress.clone()),
        );
        let orchestrator = ReplaceOrchestrator::new(api.clone(), importer.clone(), resolver.clone())
            .with_progress(progress.clone());
        Self {
            api,
            auth,
            source,
            config,
            progress,
            importer,
            resolver,
            orchestrator,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn authorize(&self, title: &str) -> Option<PublishResult> {
        self.progress.report(ProgressStage::Authenticating);
        if self.auth.ensure_valid(self.config.interactive).await {
            return None;
        }
        Some(self.fail(
            PublishResult::failed(title, "not authorized: sign in again and retry"),
        ))
    }

    fn fail(&self, result: PublishResult) -> PublishResult {
        let reason = result.error.clone().unwrap_or_default();
        warn!(title = %result.title, error = %reason, "Publish failed");
        self.progress.report(ProgressStage::Failed(reason));
        result
    }

    /// Publish a note as a new document.
    #[instrument(skip(self, content, contents), fields(title = %title, contents = contents.len()))]
    pub async fn publish(
        &self,
        title: &str,
        content: &str,
        contents: &[PendingContent],
    ) -> PublishResult {
        if let Some(denied) = self.authorize(title).await {
            return denied;
        }

        self.progress.report(ProgressStage::Uploading);
        let source = match self.importer.upload(title, content).await {
            Ok(token) => token,
            Err(e) => return self.fail(PublishResult::failed(title, e.to_string())),
        };

        self.progress.report(ProgressStage::Converting);
        let document = match self.importer.convert(&source, title).await {
            Ok(document) => document,
            Err(e) => {
                // The raw upload stays so the user still has the file.
                let fallback = self.config.file_url(&source);
                return self.fail(
                    PublishResult::failed(title, e.to_string()).with_fallback_url(Some(fallback)),
                );
            }
        };

        let resolved = self.resolver.resolve(&document.document_id, contents).await;

        self.progress.report(ProgressStage::SettingPermissions);
        let share = async {
            if self.config.enable_sharing {
                set_link_sharing(self.api.as_ref(), &document.document_id, self.config.link_share)
                    .await;
            }
        };
        let cleanup = discard_file(self.api.as_ref(), &source, DriveFileKind::File);
        tokio::join!(share, cleanup);

        match resolved {
            Ok(report) => {
                info!(
                    document_id = %document.document_id,
                    bound = report.bound,
                    skipped = report.skipped,
                    "Published"
                );
                self.progress.report(ProgressStage::Done);
                PublishResult::succeeded(title, document.document_id, document.url)
            }
            Err(e) => {
                let mut result = PublishResult::failed(title, e.to_string());
                result.url = Some(document.url);
                result.document_id = Some(document.document_id);
                self.fail(result)
            }
        }
    }

    /// Replace the content of the document at `url`, keeping its identity.
    #[instrument(skip(self, content, contents), fields(title = %title, contents = contents.len()))]
    pub async fn update_existing(
        &self,
        url: &str,
        title: &str,
        content: &str,
        contents: &[PendingContent],
    ) -> PublishResult {
        if let Some(denied) = self.authorize(title).await {
            return denied;
        }

        match self.orchestrator.replace(url, title, content, contents).await {
            Ok(outcome) => {
                let link = if url.contains("://") {
                    url.trim().to_string()
                } else {
                    self.config.document_url(&outcome.document_id)
                };
                self.progress.report(ProgressStage::Done);
                PublishResult::succeeded(title, outcome.document_id, link)
            }
            Err(e) => {
                let fallback = e.kept_source().map(|token| self.config.file_url(token));
                self.fail(PublishResult::failed(title, e.to_string()).with_fallback_url(fallback))
            }
        }
    }
}

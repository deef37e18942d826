//! In-place document replacement.
//!
//! The new content is imported into a scratch document, then copied block by
//! block into the target after its old children are removed. The target keeps
//! its id, URL, permissions and comments. If anything between clearing and
//! binding fails, the old content is restored from a snapshot taken first.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, instrument, warn};

use docbridge_core::{
    defaults, BlockType, Error, NoProgress, PendingContent, ProgressSink, ProgressStage, Result,
};
use docbridge_remote::{DocumentApi, DriveFileKind, NewBlock};

use crate::blocks::{fetch_all_blocks, BlockTree};
use crate::copy::{BlockCopier, CopyReport};
use crate::import::DocumentImporter;
use crate::permissions::discard_file;
use crate::placeholder::{PlaceholderResolver, ResolveReport};

static DOCUMENT_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(docx|wiki)/([A-Za-z0-9]+)").expect("valid document URL pattern"));

static BARE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid token pattern"));

/// A document reference parsed from a user-supplied URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentRef {
    Docx(String),
    /// Knowledge-base node; resolves to a document id.
    Wiki(String),
}

/// Parse `https://<tenant>/docx/<id>`, `https://<tenant>/wiki/<token>` or a
/// bare document id.
pub fn parse_document_url(input: &str) -> Result<DocumentRef> {
    let input = input.trim();
    if BARE_TOKEN.is_match(input) {
        return Ok(DocumentRef::Docx(input.to_string()));
    }
    let path = input.split(['?', '#']).next().unwrap_or(input);
    let caps = DOCUMENT_URL
        .captures(path)
        .ok_or_else(|| Error::InvalidInput(format!("not a document URL: {}", input)))?;
    let token = caps[2].to_string();
    match &caps[1] {
        "wiki" => Ok(DocumentRef::Wiki(token)),
        _ => Ok(DocumentRef::Docx(token)),
    }
}

/// Result of a successful replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub document_id: String,
    pub copy: CopyReport,
    pub resolve: ResolveReport,
}

/// What a replacement attempt has done so far.
#[derive(Debug, Default)]
struct Attempt {
    scratch: Option<String>,
    cleared: bool,
}

/// Replaces the content of an existing document.
pub struct ReplaceOrchestrator {
    api: Arc<dyn DocumentApi>,
    importer: Arc<DocumentImporter>,
    resolver: Arc<PlaceholderResolver>,
    copier: BlockCopier,
    progress: Arc<dyn ProgressSink>,
}

impl ReplaceOrchestrator {
    pub fn new(
        api: Arc<dyn DocumentApi>,
        importer: Arc<DocumentImporter>,
        resolver: Arc<PlaceholderResolver>,
    ) -> Self {
        Self {
            copier: BlockCopier::new(api.clone()),
            api,
            importer,
            resolver,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_copier(mut self, copier: BlockCopier) -> Self {
        self.copier = copier;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Document id behind a URL, resolving knowledge-base nodes.
    pub async fn resolve_target(&self, url: &str) -> Result<String> {
        match parse_document_url(url)? {
            DocumentRef::Docx(id) => Ok(id),
            DocumentRef::Wiki(token) => {
                let id = self.api.resolve_wiki_node(&token).await?;
                debug!(wiki_token = %token, document_id = %id, "Resolved wiki node");
                Ok(id)
            }
        }
    }

    /// Replace the document at `url` with `content`.
    #[instrument(skip(self, content, contents), fields(title = %title))]
    pub async fn replace(
        &self,
        url: &str,
        title: &str,
        content: &str,
        contents: &[PendingContent],
    ) -> Result<ReplaceOutcome> {
        let target = self.resolve_target(url).await?;

        let backup = match fetch_all_blocks(self.api.as_ref(), &target)
            .await
            .and_then(BlockTree::new)
        {
            Ok(tree) => {
                debug!(document_id = %target, block_count = tree.len(), "Backed up document");
                Some(tree)
            }
            Err(e) => {
                warn!(document_id = %target, error = %e, "Backup failed, continuing without rollback");
                None
            }
        };

        self.progress.report(ProgressStage::Replacing);
        let mut attempt = Attempt::default();
        let result = self
            .replace_content(&target, title, content, contents, &mut attempt)
            .await;

        if let Some(scratch) = &attempt.scratch {
            self.progress.report(ProgressStage::CleaningUp);
            discard_file(self.api.as_ref(), scratch, DriveFileKind::Docx).await;
        }

        match result {
            Ok(outcome) => {
                info!(
                    document_id = %target,
                    copied = outcome.copy.copied,
                    bound = outcome.resolve.bound,
                    "Document replaced"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(document_id = %target, error = %e, "Replacement failed");
                match &backup {
                    _ if !attempt.cleared => {}
                    Some(backup) => match self.restore(&target, backup).await {
                        Ok(restored) => {
                            info!(document_id = %target, restored, "Original content restored")
                        }
                        Err(restore_err) => {
                            error!(document_id = %target, error = %restore_err, "Rollback failed")
                        }
                    },
                    None => warn!(document_id = %target, "No backup available, document left as is"),
                }
                Err(e)
            }
        }
    }

    async fn replace_content(
        &self,
        target: &str,
        title: &str,
        content: &str,
        contents: &[PendingContent],
        attempt: &mut Attempt,
    ) -> Result<ReplaceOutcome> {
        let imported = self.importer.import(title, content).await?;
        attempt.scratch = Some(imported.document_id.clone());

        attempt.cleared = true;
        self.clear(target).await?;

        let source = BlockTree::new(fetch_all_blocks(self.api.as_ref(), &imported.document_id).await?)?;
        let copy = self.copier.copy_tree(&source, target).await?;
        let resolve = self.resolver.resolve(target, contents).await?;

        Ok(ReplaceOutcome {
            document_id: target.to_string(),
            copy,
            resolve,
        })
    }

    /// Delete every child of the document root, from the end.
    async fn clear(&self, document_id: &str) -> Result<usize> {
        let tree = BlockTree::new(fetch_all_blocks(self.api.as_ref(), document_id).await?)?;
        let root = tree.root().to_string();
        let total = tree.top_level().len();
        let mut end = total;
        while end > 0 {
            let start = end.saturating_sub(defaults::BLOCK_DELETE_BATCH);
            self.api
                .delete_children(document_id, &root, start, end)
                .await?;
            end = start;
        }
        debug!(document_id, removed = total, "Cleared document");
        Ok(total)
    }

    /// Best-effort rebuild from a snapshot: top-level text, dividers,
    /// callouts and quote containers, with one level of text children.
    async fn restore(&self, document_id: &str, backup: &BlockTree) -> Result<usize> {
        self.clear(document_id).await?;

        let top: Vec<_> = backup
            .top_level()
            .into_iter()
            .filter_map(|id| backup.get(id))
            .filter(|b| is_restorable(b.block_type))
            .collect();

        let mut restored = 0;
        let mut index = 0;
        for chunk in top.chunks(defaults::BLOCK_DELETE_BATCH) {
            let templates = chunk.iter().map(|b| NewBlock::from_snapshot(b)).collect();
            let created = self
                .api
                .create_children(document_id, backup.root(), Some(index), templates)
                .await?;
            index += created.len();
            restored += created.len();

            for (source, new) in chunk.iter().zip(&created) {
                let children: Vec<NewBlock> = backup
                    .children(&source.block_id)
                    .into_iter()
                    .filter_map(|id| backup.get(id))
                    .filter(|b| b.block_type.is_text_bearing())
                    .map(NewBlock::from_snapshot)
                    .collect();
                if children.is_empty() {
                    continue;
                }
                let count = children.len();
                match self
                    .api
                    .create_children(document_id, &new.block_id, None, children)
                    .await
                {
                    Ok(_) => restored += count,
                    Err(e) => warn!(block_id = %new.block_id, error = %e, "Failed to restore nested blocks"),
                }
            }
        }
        Ok(restored)
    }
}

fn is_restorable(block_type: BlockType) -> bool {
    block_type.is_text_bearing()
        || matches!(
            block_type,
            BlockType::Divider | BlockType::Callout | BlockType::QuoteContainer
        )
}

//! Deferred-content placeholders.
//!
//! The text transformer leaves tokens such as `__OB_CONTENT_1__` where an
//! image, file, callout or linked note belongs. After import the remote
//! converter may have kept the token verbatim, escaped its underscores, or
//! consumed the outer underscores as emphasis, so three forms are accepted.
//! [`PlaceholderResolver`] finds each token in the block tree, binds the real
//! content next to it, and finally clears whatever token text remains.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, trace, warn};

use docbridge_core::{
    defaults, BlockType, CalloutStyle, ContentKind, ContentSource, Error, NoProgress,
    PendingContent, ProgressSink, ProgressStage, RemoteBlock, Result,
};
use docbridge_remote::{
    text_run, BlockUpdate, BlockUpdateRequest, DocumentApi, MediaKind, NewBlock,
};

use crate::blocks::{fetch_all_blocks, BlockTree};
use crate::config::SyncConfig;
use crate::import::DocumentImporter;
use crate::permissions::set_link_sharing;

// =============================================================================
// MATCHING
// =============================================================================

/// Cheap check run before any pattern matching.
pub fn has_marker(text: &str) -> bool {
    text.contains(defaults::PLACEHOLDER_MARKER) || text.contains(defaults::PLACEHOLDER_MARKER_ESCAPED)
}

/// Matcher for the accepted spellings of one placeholder.
#[derive(Debug, Clone)]
pub struct PlaceholderPattern {
    regex: Regex,
}

impl PlaceholderPattern {
    pub fn new(placeholder: &str) -> Result<Self> {
        let original = placeholder.to_string();
        let escaped = placeholder.replace('_', "\\_");
        let bare = placeholder.trim_matches('_').to_string();
        if bare.is_empty() {
            return Err(Error::InvalidInput(format!(
                "placeholder has no body: {:?}",
                placeholder
            )));
        }
        // Leftmost-first alternation: the longest spelling wins at a position.
        let source = [original, escaped, bare]
            .iter()
            .map(|f| regex::escape(f))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&source)
            .map_err(|e| Error::Internal(format!("placeholder pattern: {}", e)))?;
        Ok(Self { regex })
    }

    /// Byte ranges of every acceptable occurrence in `text`.
    pub fn find_all(&self, text: &str) -> Vec<(usize, usize)> {
        self.regex
            .find_iter(text)
            .filter(|m| {
                !text[m.end()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit())
            })
            .map(|m| (m.start(), m.end()))
            .collect()
    }

    /// First acceptable occurrence.
    pub fn find(&self, text: &str) -> Option<(usize, usize)> {
        self.find_all(text).into_iter().next()
    }

    /// `text` with every occurrence replaced by `with`.
    pub fn replace(&self, text: &str, with: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end) in self.find_all(text) {
            out.push_str(&text[last..start]);
            out.push_str(with);
            last = end;
        }
        out.push_str(&text[last..]);
        out
    }
}

fn run_content(element: &Value) -> Option<&str> {
    element.pointer("/text_run/content").and_then(Value::as_str)
}

fn with_content(element: &Value, content: &str) -> Value {
    let mut element = element.clone();
    if let Some(run) = element.get_mut("text_run") {
        run["content"] = Value::String(content.to_string());
    }
    element
}

fn plain_text(elements: &[Value]) -> String {
    elements.iter().filter_map(run_content).collect()
}

/// Merge all runs into one unstyled run. Used when a placeholder spans runs.
fn collapse(elements: &[Value]) -> Vec<Value> {
    vec![text_run(&plain_text(elements), false, None)]
}

/// Replace every occurrence of the placeholder with `with`.
///
/// Returns `None` when nothing matched.
pub fn replace_in_elements(
    elements: &[Value],
    pattern: &PlaceholderPattern,
    with: &str,
) -> Option<Vec<Value>> {
    if pattern.find(&plain_text(elements)).is_none() {
        return None;
    }
    let mut out = Vec::with_capacity(elements.len());
    for element in elements {
        match run_content(element) {
            Some(content) if pattern.find(content).is_some() => {
                let replaced = pattern.replace(content, with);
                if !replaced.is_empty() {
                    out.push(with_content(element, &replaced));
                }
            }
            _ => out.push(element.clone()),
        }
    }
    if pattern.find(&plain_text(&out)).is_some() {
        let merged = collapse(&out);
        return replace_in_elements(&merged, pattern, with).or(Some(merged));
    }
    Some(out)
}

/// Turn the first occurrence of the placeholder into a hyperlink labelled
/// `label`, keeping the text around it.
pub fn link_in_elements(
    elements: &[Value],
    pattern: &PlaceholderPattern,
    label: &str,
    url: &str,
) -> Option<Vec<Value>> {
    let position = elements
        .iter()
        .position(|e| run_content(e).is_some_and(|c| pattern.find(c).is_some()));
    let Some(position) = position else {
        if pattern.find(&plain_text(elements)).is_some() {
            return link_in_elements(&collapse(elements), pattern, label, url);
        }
        return None;
    };

    let element = &elements[position];
    let content = run_content(element).unwrap_or_default();
    let (start, end) = pattern.find(content)?;

    let mut link = with_content(element, label);
    if let Some(run) = link.get_mut("text_run") {
        let style = run
            .as_object_mut()
            .map(|r| {
                r.entry("text_element_style")
                    .or_insert_with(|| Value::Object(Map::new()))
            });
        if let Some(Value::Object(style)) = style {
            style.insert(
                "link".into(),
                serde_json::json!({ "url": urlencoding::encode(url).into_owned() }),
            );
        }
    }

    let mut out: Vec<Value> = elements[..position].to_vec();
    if start > 0 {
        out.push(with_content(element, &content[..start]));
    }
    out.push(link);
    if end < content.len() {
        out.push(with_content(element, &content[end..]));
    }
    out.extend_from_slice(&elements[position + 1..]);
    Some(out)
}

/// Reject content lists that reuse a placeholder.
pub fn validate_unique(contents: &[PendingContent]) -> Result<()> {
    let mut seen = HashSet::new();
    for content in contents {
        if !seen.insert(content.placeholder.as_str()) {
            return Err(Error::InvalidInput(format!(
                "duplicate placeholder {}",
                content.placeholder
            )));
        }
    }
    Ok(())
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Where a placeholder was found.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderMatch {
    pub block_id: String,
    pub parent_block_id: String,
    /// Position of the block among its parent's children.
    pub block_index: usize,
    /// The spelling found in the document.
    pub placeholder: String,
    pub content: PendingContent,
}

/// Counts from one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Contents bound into the document.
    pub bound: usize,
    /// Contents not found, unreadable or failing to bind.
    pub skipped: usize,
    /// Blocks whose leftover placeholder text was removed.
    pub cleared: usize,
}

/// Binds pending contents into an imported document.
pub struct PlaceholderResolver {
    api: Arc<dyn DocumentApi>,
    source: Arc<dyn ContentSource>,
    importer: Arc<DocumentImporter>,
    config: Arc<SyncConfig>,
    progress: Arc<dyn ProgressSink>,
}

struct Located {
    matches: Vec<PlaceholderMatch>,
    elements: HashMap<String, Vec<Value>>,
}

impl PlaceholderResolver {
    pub fn new(
        api: Arc<dyn DocumentApi>,
        source: Arc<dyn ContentSource>,
        importer: Arc<DocumentImporter>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            api,
            source,
            importer,
            config,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Bind every content into `document_id` and clear leftover tokens.
    #[instrument(skip(self, contents), fields(count = contents.len()))]
    pub async fn resolve(
        &self,
        document_id: &str,
        contents: &[PendingContent],
    ) -> Result<ResolveReport> {
        self.resolve_nested(document_id, contents, 0, Vec::new())
            .await
    }

    fn resolve_nested<'a>(
        &'a self,
        document_id: &'a str,
        contents: &'a [PendingContent],
        depth: usize,
        ancestors: Vec<String>,
    ) -> BoxFuture<'a, Result<ResolveReport>> {
        async move {
            validate_unique(contents)?;
            let mut report = ResolveReport::default();
            if contents.is_empty() {
                return Ok(report);
            }

            let patterns = contents
                .iter()
                .map(|c| PlaceholderPattern::new(&c.placeholder))
                .collect::<Result<Vec<_>>>()?;

            let Located {
                mut matches,
                mut elements,
            } = self.locate(document_id, contents, &patterns).await?;
            let unmatched = contents.len() - matches.len();
            if unmatched > 0 {
                warn!(document_id, unmatched, "Placeholders not found in document");
                report.skipped += unmatched;
            }

            matches.sort_by_key(|m| (m.content.ordinal, m.block_index));
            let mut bytes = self.fetch_attachments(&matches).await;

            // (parent, base index) of every block inserted so far.
            let mut inserted: Vec<(String, usize)> = Vec::new();
            let total = matches.len();
            for (i, m) in matches.iter().enumerate() {
                self.progress.report(ProgressStage::Attachment {
                    current: i + 1,
                    total,
                });
                let offset = inserted
                    .iter()
                    .filter(|(parent, base)| *parent == m.parent_block_id && *base <= m.block_index)
                    .count();
                let index = m.block_index + 1 + offset;

                let result = match &m.content.kind {
                    ContentKind::Image | ContentKind::File => {
                        match bytes.remove(&m.content.placeholder) {
                            Some(data) => self.bind_media(document_id, m, index, data).await,
                            None => {
                                report.skipped += 1;
                                continue;
                            }
                        }
                    }
                    ContentKind::Callout { style, title, body } => {
                        self.bind_callout(document_id, m, index, *style, title, body)
                            .await
                    }
                    ContentKind::SubDocument => {
                        match self
                            .bind_subdocument(document_id, m, &mut elements, depth, &ancestors)
                            .await
                        {
                            Ok(true) => report.bound += 1,
                            Ok(false) => report.skipped += 1,
                            Err(e) => {
                                warn!(placeholder = %m.content.placeholder, error = %e, "Failed to link sub-document");
                                report.skipped += 1;
                            }
                        }
                        continue;
                    }
                };

                match result {
                    Ok(()) => {
                        report.bound += 1;
                        inserted.push((m.parent_block_id.clone(), m.block_index));
                    }
                    Err(e) => {
                        warn!(
                            placeholder = %m.content.placeholder,
                            kind = m.content.kind.label(),
                            error = %e,
                            "Failed to bind content"
                        );
                        report.skipped += 1;
                    }
                }
            }

            report.cleared = self.clear_residual(document_id, &patterns).await?;
            info!(
                document_id,
                bound = report.bound,
                skipped = report.skipped,
                cleared = report.cleared,
                "Placeholders resolved"
            );
            Ok(report)
        }
        .boxed()
    }

    /// Scan the block tree until every placeholder has been seen.
    async fn locate(
        &self,
        document_id: &str,
        contents: &[PendingContent],
        patterns: &[PlaceholderPattern],
    ) -> Result<Located> {
        let mut found = vec![false; contents.len()];
        let mut matches = Vec::new();
        let mut elements = HashMap::new();
        let mut siblings: HashMap<String, Vec<String>> = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .api
                .list_blocks(document_id, page_token.as_deref())
                .await?;
            for block in &page.items {
                siblings.insert(block.block_id.clone(), block.children.clone());
                if !block.block_type.is_text_bearing() {
                    continue;
                }
                let text = block.plain_text();
                if !has_marker(&text) {
                    continue;
                }
                trace!(block_id = %block.block_id, "Block carries a placeholder marker");
                for (i, content) in contents.iter().enumerate() {
                    if found[i] {
                        continue;
                    }
                    let Some((start, end)) = patterns[i].find(&text) else {
                        continue;
                    };
                    let Some(block_index) = siblings
                        .get(&block.parent_id)
                        .and_then(|c| c.iter().position(|id| *id == block.block_id))
                    else {
                        warn!(block_id = %block.block_id, "Placeholder block has no known parent");
                        continue;
                    };
                    found[i] = true;
                    elements
                        .entry(block.block_id.clone())
                        .or_insert_with(|| block.elements().to_vec());
                    matches.push(PlaceholderMatch {
                        block_id: block.block_id.clone(),
                        parent_block_id: block.parent_id.clone(),
                        block_index,
                        placeholder: text[start..end].to_string(),
                        content: content.clone(),
                    });
                }
            }

            if found.iter().all(|f| *f) {
                debug!(document_id, "All placeholders located");
                break;
            }
            match page.page_token {
                Some(next) if page.has_more && !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(Located { matches, elements })
    }

    /// Read attachment bytes with bounded concurrency. Failures are skipped.
    async fn fetch_attachments(&self, matches: &[PlaceholderMatch]) -> HashMap<String, Vec<u8>> {
        let wanted: Vec<(String, String)> = matches
            .iter()
            .map(|m| &m.content)
            .filter(|c| c.kind.needs_bytes())
            .map(|c| (c.placeholder.clone(), c.original_path.clone()))
            .collect();

        let reads: Vec<(String, String, Result<Vec<u8>>)> = stream::iter(wanted)
            .map(|(placeholder, path)| {
                let source = Arc::clone(&self.source);
                async move {
                    let result = source.read_bytes(&path).await;
                    (placeholder, path, result)
                }
            })
            .buffer_unordered(defaults::ATTACHMENT_READ_CONCURRENCY)
            .collect()
            .await;

        reads
            .into_iter()
            .filter_map(|(placeholder, path, result)| match result {
                Ok(bytes) => Some((placeholder, bytes)),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to read attachment");
                    None
                }
            })
            .collect()
    }

    async fn bind_media(
        &self,
        document_id: &str,
        m: &PlaceholderMatch,
        index: usize,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let (template, kind) = match m.content.kind {
            ContentKind::File => (NewBlock::file(), MediaKind::File),
            _ => (NewBlock::image(), MediaKind::Image),
        };
        let created = self
            .api
            .create_children(document_id, &m.parent_block_id, Some(index), vec![template])
            .await?;
        let block = created
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode("no block returned from create".into()))?;
        let slot = media_slot(&block)?;

        let bound = async {
            let token = self
                .api
                .upload_block_media(document_id, &slot, kind, &m.content.display_name, bytes)
                .await?;
            let update = match kind {
                MediaKind::Image => BlockUpdate::ReplaceImage { token },
                MediaKind::File => BlockUpdate::ReplaceFile { token },
            };
            self.api.update_block(document_id, &slot, update).await
        }
        .await;

        if let Err(e) = bound {
            if let Err(cleanup) = self
                .api
                .delete_children(document_id, &m.parent_block_id, index, index + 1)
                .await
            {
                warn!(block_id = %block.block_id, error = %cleanup, "Failed to remove empty media block");
            }
            return Err(e);
        }
        debug!(placeholder = %m.content.placeholder, block_id = %slot, "Media bound");
        Ok(())
    }

    async fn bind_callout(
        &self,
        document_id: &str,
        m: &PlaceholderMatch,
        index: usize,
        style: CalloutStyle,
        title: &str,
        body: &str,
    ) -> Result<()> {
        let created = self
            .api
            .create_children(
                document_id,
                &m.parent_block_id,
                Some(index),
                vec![NewBlock::callout(style)],
            )
            .await?;
        let callout = created
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode("no block returned from create".into()))?;

        let mut elements = Vec::new();
        if !title.is_empty() {
            elements.push(text_run(title, true, None));
        }
        if !body.is_empty() {
            let body = if title.is_empty() {
                body.to_string()
            } else {
                format!("\n{}", body)
            };
            elements.push(text_run(&body, false, None));
        }

        if let Err(e) = self
            .api
            .create_children(document_id, &callout.block_id, None, vec![NewBlock::text(elements)])
            .await
        {
            if let Err(cleanup) = self
                .api
                .delete_children(document_id, &m.parent_block_id, index, index + 1)
                .await
            {
                warn!(block_id = %callout.block_id, error = %cleanup, "Failed to remove empty callout");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Publish the linked note and rewrite the placeholder as a link to it.
    ///
    /// Returns `false` when the note could not be published; the placeholder
    /// is then replaced by the plain display name.
    async fn bind_subdocument(
        &self,
        document_id: &str,
        m: &PlaceholderMatch,
        elements: &mut HashMap<String, Vec<Value>>,
        depth: usize,
        ancestors: &[String],
    ) -> Result<bool> {
        let path = m.content.original_path.clone();
        let url = if depth + 1 > defaults::SUBDOCUMENT_MAX_DEPTH {
            warn!(path = %path, depth, "Sub-document nesting too deep, linking skipped");
            None
        } else if ancestors.contains(&path) {
            warn!(path = %path, "Sub-document cycle detected, linking skipped");
            None
        } else {
            match self.publish_subdocument(&path, depth, ancestors).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to publish sub-document");
                    None
                }
            }
        };

        let current = elements.get(&m.block_id).cloned().unwrap_or_default();
        let pattern = PlaceholderPattern::new(&m.content.placeholder)?;
        let label = if m.content.display_name.is_empty() {
            path.as_str()
        } else {
            m.content.display_name.as_str()
        };
        let rewritten = match &url {
            Some(url) => link_in_elements(&current, &pattern, label, url),
            None => replace_in_elements(&current, &pattern, label),
        };
        if let Some(rewritten) = rewritten {
            self.api
                .update_block(
                    document_id,
                    &m.block_id,
                    BlockUpdate::UpdateTextElements {
                        elements: rewritten.clone(),
                    },
                )
                .await?;
            elements.insert(m.block_id.clone(), rewritten);
        }
        Ok(url.is_some())
    }

    async fn publish_subdocument(
        &self,
        path: &str,
        depth: usize,
        ancestors: &[String],
    ) -> Result<String> {
        let note = self.source.load_note(path).await?;
        let imported = self.importer.import(&note.title, &note.content).await?;
        info!(path, document_id = %imported.document_id, "Sub-document published");

        let mut chain = ancestors.to_vec();
        chain.push(path.to_string());
        if let Err(e) = self
            .resolve_nested(&imported.document_id, &note.pending_contents, depth + 1, chain)
            .await
        {
            warn!(document_id = %imported.document_id, error = %e, "Sub-document contents incomplete");
        }
        if self.config.enable_sharing {
            set_link_sharing(self.api.as_ref(), &imported.document_id, self.config.link_share)
                .await;
        }
        Ok(imported.url)
    }

    /// Remove leftover placeholder text. Blocks holding nothing but a
    /// placeholder are deleted.
    async fn clear_residual(
        &self,
        document_id: &str,
        patterns: &[PlaceholderPattern],
    ) -> Result<usize> {
        let tree = BlockTree::new(fetch_all_blocks(self.api.as_ref(), document_id).await?)?;

        let mut updates: Vec<BlockUpdateRequest> = Vec::new();
        let mut removals: HashMap<String, Vec<(usize, Vec<Value>)>> = HashMap::new();
        let mut stack = vec![tree.root()];
        while let Some(id) = stack.pop() {
            let children = tree.children(id);
            for (index, child) in children.iter().enumerate() {
                let Some(block) = tree.get(child) else { continue };
                stack.push(*child);
                let Some(cleaned) = strip_all(block, patterns) else {
                    continue;
                };
                if block.block_type == BlockType::Text
                    && block.children.is_empty()
                    && plain_text(&cleaned).trim().is_empty()
                {
                    removals
                        .entry(id.to_string())
                        .or_default()
                        .push((index, cleaned));
                } else {
                    updates.push(BlockUpdateRequest {
                        block_id: block.block_id.clone(),
                        update: BlockUpdate::UpdateTextElements { elements: cleaned },
                    });
                }
            }
        }

        let mut cleared = 0;
        for (parent, mut positions) in removals {
            positions.sort_by(|a, b| b.0.cmp(&a.0));
            for (index, cleaned) in positions {
                match self
                    .api
                    .delete_children(document_id, &parent, index, index + 1)
                    .await
                {
                    Ok(()) => cleared += 1,
                    Err(e) => {
                        debug!(error = %e, "Delete of placeholder block failed, clearing text instead");
                        if let Some(child) = tree.children(&parent).get(index) {
                            updates.push(BlockUpdateRequest {
                                block_id: child.to_string(),
                                update: BlockUpdate::UpdateTextElements { elements: cleaned },
                            });
                        }
                    }
                }
            }
        }

        for batch in updates.chunks(defaults::BLOCK_UPDATE_BATCH) {
            match self
                .api
                .batch_update_blocks(document_id, batch.to_vec())
                .await
            {
                Ok(()) => cleared += batch.len(),
                Err(e) => {
                    warn!(error = %e, count = batch.len(), "Batch clear rejected, patching blocks one by one");
                    for request in batch {
                        match self
                            .api
                            .update_block(document_id, &request.block_id, request.update.clone())
                            .await
                        {
                            Ok(()) => cleared += 1,
                            Err(e) => {
                                warn!(block_id = %request.block_id, error = %e, "Failed to clear placeholder")
                            }
                        }
                    }
                }
            }
        }
        Ok(cleared)
    }
}

/// Cleaned elements of a text-bearing block, if any placeholder was present.
fn strip_all(block: &RemoteBlock, patterns: &[PlaceholderPattern]) -> Option<Vec<Value>> {
    if !block.block_type.is_text_bearing() || !has_marker(&block.plain_text()) {
        return None;
    }
    let mut current = block.elements().to_vec();
    let mut changed = false;
    for pattern in patterns {
        if let Some(next) = replace_in_elements(&current, pattern, "") {
            current = next;
            changed = true;
        }
    }
    changed.then_some(current)
}

/// Block that receives the media upload: file blocks come back wrapped in a
/// view block.
fn media_slot(block: &RemoteBlock) -> Result<String> {
    if block.block_type == BlockType::View {
        block
            .children
            .first()
            .cloned()
            .ok_or_else(|| Error::Decode("view block without file child".into()))
    } else {
        Ok(block.block_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryContentSource, MockDocumentApi};
    use docbridge_core::TransformedNote;
    use serde_json::json;

    fn resolver(api: &Arc<MockDocumentApi>, source: MemoryContentSource) -> PlaceholderResolver {
        let config = Arc::new(SyncConfig::default());
        let api: Arc<dyn DocumentApi> = api.clone();
        let importer = Arc::new(DocumentImporter::new(api.clone(), config.clone()));
        PlaceholderResolver::new(api, Arc::new(source), importer, config)
    }

    #[test]
    fn test_three_spellings_match() {
        let p = PlaceholderPattern::new("__OB_CONTENT_1__").unwrap();
        assert_eq!(p.find("a __OB_CONTENT_1__ b"), Some((2, 18)));
        assert!(p.find(r"a \_\_OB\_CONTENT\_1\_\_ b").is_some());
        assert_eq!(p.find("a OB_CONTENT_1 b"), Some((2, 14)));
        assert!(p.find("nothing here").is_none());
    }

    #[test]
    fn test_match_followed_by_digit_is_rejected() {
        let p = PlaceholderPattern::new("__OB_CONTENT_1__").unwrap();
        assert!(p.find("OB_CONTENT_10").is_none());
        assert!(p.find("__OB_CONTENT_12__").is_none());
        assert_eq!(p.find("OB_CONTENT_10 OB_CONTENT_1"), Some((14, 26)));
    }

    #[test]
    fn test_marker_prefilter() {
        assert!(has_marker("x OB_CONTENT_1"));
        assert!(has_marker(r"x OB\_CONTENT"));
        assert!(!has_marker("plain text"));
    }

    #[test]
    fn test_replace_keeps_other_runs() {
        let p = PlaceholderPattern::new("__OB_CONTENT_1__").unwrap();
        let elements = vec![
            text_run("bold ", true, None),
            text_run("x __OB_CONTENT_1__ y", false, None),
        ];
        let out = replace_in_elements(&elements, &p, "").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], elements[0]);
        assert_eq!(plain_text(&out), "bold x  y");
    }

    #[test]
    fn test_replace_across_runs_collapses() {
        let p = PlaceholderPattern::new("__OB_CONTENT_1__").unwrap();
        let elements = vec![
            text_run("a __OB_CON", false, None),
            text_run("TENT_1__ b", true, None),
        ];
        let out = replace_in_elements(&elements, &p, "").unwrap();
        assert_eq!(plain_text(&out), "a  b");
    }

    #[test]
    fn test_link_preserves_surrounding_text() {
        let p = PlaceholderPattern::new("__OB_CONTENT_2__").unwrap();
        let elements = vec![text_run("see __OB_CONTENT_2__ now", false, None)];
        let out = link_in_elements(&elements, &p, "Other", "https://x.test/docx/1").unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(plain_text(&out), "see Other now");
        assert_eq!(
            out[1]["text_run"]["text_element_style"]["link"]["url"],
            json!("https%3A%2F%2Fx.test%2Fdocx%2F1")
        );
        assert!(out[0]["text_run"]["text_element_style"].get("link").is_none());
    }

    #[test]
    fn test_duplicate_placeholders_rejected() {
        let contents = vec![
            PendingContent::image("__OB_CONTENT_1__", "a.png", 1),
            PendingContent::image("__OB_CONTENT_1__", "b.png", 2),
        ];
        assert!(matches!(
            validate_unique(&contents),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_placeholder_bound_and_cleared() {
        let api = Arc::new(MockDocumentApi::new());
        let doc = api.create_document(&[
            "Intro",
            "__OB_CONTENT_1__",
            r"\_\_OB\_CONTENT\_2\_\_",
            "Callout here OB_CONTENT_3",
            "Outro",
        ]);
        let source = MemoryContentSource::new()
            .with_file("img/a.png", b"png-bytes")
            .with_file("docs/report.pdf", b"pdf-bytes");
        let contents = vec![
            PendingContent::image("__OB_CONTENT_1__", "img/a.png", 1),
            PendingContent::file("__OB_CONTENT_2__", "docs/report.pdf", 2),
            PendingContent::callout("__OB_CONTENT_3__", CalloutStyle::Warning, "Heads up", "Mind the gap", 3),
        ];

        let report = resolver(&api, source).resolve(&doc, &contents).await.unwrap();
        assert_eq!(report.bound, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.cleared, 3);

        assert!(api.texts(&doc).iter().all(|t| !t.contains("OB_")));

        let blocks = api.blocks(&doc);
        let image = blocks.iter().find(|b| b.block_type == BlockType::Image).unwrap();
        assert!(image.media_token().is_some());
        let file = blocks.iter().find(|b| b.block_type == BlockType::File).unwrap();
        assert!(file.media_token().is_some());
        let callout = blocks.iter().find(|b| b.block_type == BlockType::Callout).unwrap();
        assert_eq!(callout.children.len(), 1);
        assert_eq!(
            api.texts(&doc),
            vec!["Intro", "Callout here ", "Heads up\nMind the gap", "Outro"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_insertions_follow_authoring_order() {
        let api = Arc::new(MockDocumentApi::new());
        let doc = api.create_document(&["__OB_CONTENT_1__ __OB_CONTENT_2__", "tail __OB_CONTENT_3__"]);
        let source = MemoryContentSource::new()
            .with_file("one.png", b"1")
            .with_file("two.png", b"2")
            .with_file("three.png", b"3");
        let contents = vec![
            PendingContent::image("__OB_CONTENT_3__", "three.png", 3),
            PendingContent::image("__OB_CONTENT_1__", "one.png", 1),
            PendingContent::image("__OB_CONTENT_2__", "two.png", 2),
        ];

        let report = resolver(&api, source).resolve(&doc, &contents).await.unwrap();
        assert_eq!(report.bound, 3);

        let blocks = api.blocks(&doc);
        let order: Vec<String> = api
            .root_children(&doc)
            .iter()
            .filter_map(|id| blocks.iter().find(|b| &b.block_id == id))
            .map(|b| match b.block_type {
                BlockType::Image => format!("image:{}", b.block_id),
                _ => format!("text:{}", b.plain_text()),
            })
            .collect();
        assert_eq!(order.len(), 4);
        assert!(order[0].starts_with("image"));
        assert!(order[1].starts_with("image"));
        assert_eq!(order[2], "text:tail ");
        assert!(order[3].starts_with("image"));

        // Uploads ran in ordinal order and landed in document order.
        let uploads: Vec<String> = api
            .calls("upload_block_media")
            .into_iter()
            .map(|c| c.input)
            .collect();
        assert_eq!(uploads, vec!["one.png", "two.png", "three.png"]);
        let image_ids: Vec<String> = order
            .iter()
            .filter(|o| o.starts_with("image:"))
            .map(|o| o.trim_start_matches("image:").to_string())
            .collect();
        let names = api.upload_names();
        assert!(names.contains(&format!("one.png@{}", image_ids[0])));
        assert!(names.contains(&format!("two.png@{}", image_ids[1])));
        assert!(names.contains(&format!("three.png@{}", image_ids[2])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_binding_order_ignores_block_order() {
        let api = Arc::new(MockDocumentApi::new());
        let doc = api.create_document(&["x __OB_CONTENT_2__", "mid", "y __OB_CONTENT_1__"]);
        let source = MemoryContentSource::new()
            .with_file("one.png", b"1")
            .with_file("two.png", b"2");
        let contents = vec![
            PendingContent::image("__OB_CONTENT_2__", "two.png", 2),
            PendingContent::image("__OB_CONTENT_1__", "one.png", 1),
        ];

        let report = resolver(&api, source).resolve(&doc, &contents).await.unwrap();
        assert_eq!(report.bound, 2);

        let uploads: Vec<String> = api
            .calls("upload_block_media")
            .into_iter()
            .map(|c| c.input)
            .collect();
        assert_eq!(uploads, vec!["one.png", "two.png"]);

        let blocks = api.blocks(&doc);
        let order: Vec<String> = api
            .root_children(&doc)
            .iter()
            .filter_map(|id| blocks.iter().find(|b| &b.block_id == id))
            .map(|b| match b.block_type {
                BlockType::Image => format!("image:{}", b.block_id),
                _ => format!("text:{}", b.plain_text()),
            })
            .collect();
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], "text:x ");
        assert_eq!(order[2], "text:mid");
        assert_eq!(order[3], "text:y ");

        // Each image sits right after its own placeholder block.
        let names = api.upload_names();
        let after_x = order[1].trim_start_matches("image:");
        let after_y = order[4].trim_start_matches("image:");
        assert!(names.contains(&format!("two.png@{}", after_x)), "{:?}", order);
        assert!(names.contains(&format!("one.png@{}", after_y)), "{:?}", order);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_attachment_is_skipped() {
        let api = Arc::new(MockDocumentApi::new());
        let doc = api.create_document(&["__OB_CONTENT_1__"]);
        let contents = vec![PendingContent::image("__OB_CONTENT_1__", "missing.png", 1)];

        let report = resolver(&api, MemoryContentSource::new())
            .resolve(&doc, &contents)
            .await
            .unwrap();
        assert_eq!(report.bound, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.cleared, 1);
        assert_eq!(api.block_count(&doc), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upload_removes_empty_block() {
        let api = Arc::new(MockDocumentApi::new());
        let doc = api.create_document(&["before", "__OB_CONTENT_1__"]);
        api.fail_next("upload_block_media", 1, || Error::Api {
            code: 1061044,
            msg: "parent node not exist".into(),
        });
        let source = MemoryContentSource::new().with_file("a.png", b"x");
        let contents = vec![PendingContent::image("__OB_CONTENT_1__", "a.png", 1)];

        let report = resolver(&api, source).resolve(&doc, &contents).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(api.blocks(&doc).iter().all(|b| b.block_type != BlockType::Image));
        assert_eq!(api.texts(&doc), vec!["before"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_clear_falls_back_to_single_patches() {
        let api = Arc::new(MockDocumentApi::new());
        let doc = api.create_document(&["keep __OB_CONTENT_1__ this"]);
        api.fail_next("batch_update_blocks", 1, || Error::Api {
            code: 1770001,
            msg: "invalid param".into(),
        });
        let contents = vec![PendingContent::image("__OB_CONTENT_1__", "gone.png", 1)];

        let report = resolver(&api, MemoryContentSource::new())
            .resolve(&doc, &contents)
            .await
            .unwrap();
        assert_eq!(report.cleared, 1);
        assert_eq!(api.texts(&doc), vec!["keep  this"]);
        assert_eq!(api.calls("update_block").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_document_becomes_link() {
        let api = Arc::new(MockDocumentApi::new());
        let doc = api.create_document(&["See __OB_CONTENT_1__ for more"]);
        let source = MemoryContentSource::new().with_note(
            "Other.md",
            TransformedNote {
                title: "Other".into(),
                content: "Other body".into(),
                pending_contents: vec![],
            },
        );
        let contents = vec![PendingContent::sub_document("__OB_CONTENT_1__", "Other.md", "Other", 1)];

        let report = resolver(&api, source).resolve(&doc, &contents).await.unwrap();
        assert_eq!(report.bound, 1);
        assert_eq!(api.texts(&doc), vec!["See Other for more"]);

        let block = api
            .blocks(&doc)
            .into_iter()
            .find(|b| b.block_type == BlockType::Text)
            .unwrap();
        let link = block.elements()[1]["text_run"]["text_element_style"]["link"]["url"]
            .as_str()
            .unwrap()
            .to_string();
        let decoded = urlencoding::decode(&link).unwrap().into_owned();
        let sub_id = decoded.rsplit('/').next().unwrap();
        assert!(api.has_document(sub_id));
        assert_eq!(api.texts(sub_id), vec!["Other body"]);
        assert_eq!(api.permissions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_document_cycle_is_cut() {
        let api = Arc::new(MockDocumentApi::new());
        let doc = api.create_document(&["A links __OB_CONTENT_1__"]);
        let b_note = TransformedNote {
            title: "B".into(),
            content: "B links __OB_CONTENT_9__".into(),
            pending_contents: vec![PendingContent::sub_document("__OB_CONTENT_9__", "B.md", "B", 1)],
        };
        let source = MemoryContentSource::new().with_note("B.md", b_note);
        let contents = vec![PendingContent::sub_document("__OB_CONTENT_1__", "B.md", "B", 1)];

        let report = resolver(&api, source).resolve(&doc, &contents).await.unwrap();
        assert_eq!(report.bound, 1);
        // Root document plus exactly one published copy of B.
        assert_eq!(api.document_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pagination_stops_once_everything_is_found() {
        let api = Arc::new(MockDocumentApi::new());
        let mut lines = vec!["__OB_CONTENT_1__".to_string()];
        lines.extend((0..20).map(|i| format!("filler {}", i)));
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let doc = api.create_document(&refs);
        api.set_page_size(5);
        let contents = vec![PendingContent::callout("__OB_CONTENT_1__", CalloutStyle::Tip, "T", "", 1)];

        let r = resolver(&api, MemoryContentSource::new());
        let patterns = vec![PlaceholderPattern::new("__OB_CONTENT_1__").unwrap()];
        let located = r.locate(&doc, &contents, &patterns).await.unwrap();
        assert_eq!(located.matches.len(), 1);
        assert_eq!(located.matches[0].block_index, 0);
        assert_eq!(located.matches[0].placeholder, "__OB_CONTENT_1__");
        assert_eq!(api.calls("list_blocks").len(), 1);
    }
}

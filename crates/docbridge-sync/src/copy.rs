//! Copy a block tree from one document into another.
//!
//! Top-level subtrees are grouped into nested-create calls of at most
//! [`defaults::BLOCK_BATCH_LIMIT`] blocks; a subtree above the limit is
//! created head first with its children chunked below it. A rejected chunk
//! is retried one block at a time so a single bad block does not sink the
//! whole copy.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use docbridge_core::{defaults, BlockType, Error, RemoteBlock, Result};
use docbridge_remote::{CreateDescendantRequest, DocumentApi, NewBlock, RetryPolicy};

use crate::blocks::BlockTree;

/// Counts from one copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: usize,
    pub skipped: usize,
    /// Nested-create calls that succeeded.
    pub chunks: usize,
}

/// A top-level source block with everything below it, parents first.
#[derive(Debug)]
struct Unit {
    root: String,
    blocks: Vec<NewBlock>,
}

impl Unit {
    fn templates(&self) -> HashMap<&str, &NewBlock> {
        self.blocks
            .iter()
            .filter_map(|b| b.block_id.as_deref().map(|id| (id, b)))
            .collect()
    }
}

/// Whether a block can be recreated in another document.
fn is_copyable(block: &RemoteBlock, tree: &BlockTree) -> bool {
    match block.block_type {
        BlockType::Image => block.media_token().is_some(),
        BlockType::TableCell => tree
            .get(&block.parent_id)
            .is_some_and(|p| p.block_type == BlockType::Table),
        BlockType::File | BlockType::View | BlockType::Page | BlockType::Unknown(_) => false,
        _ => true,
    }
}

/// Creation template for a snapshot, keyed by the source block id.
pub(crate) fn template(block: &RemoteBlock) -> NewBlock {
    let mut new = NewBlock::from_snapshot(block).with_id(&block.block_id);
    if block.block_type == BlockType::Table {
        // Cell ids and merge state belong to the source document.
        if let Some(Value::Object(table)) = new.payload.get_mut("table") {
            table.remove("cells");
            if let Some(Value::Object(property)) = table.get_mut("property") {
                property.remove("merge_info");
            }
        }
    }
    new
}

/// Copies block trees with chunked nested creates.
pub struct BlockCopier {
    api: Arc<dyn DocumentApi>,
    retry: RetryPolicy,
    chunk_delay: Duration,
}

/// Insertion point under one parent.
struct Cursor {
    parent: String,
    index: usize,
}

/// Subtrees still to be placed under one parent, in order.
struct Level {
    parent: String,
    units: Vec<Unit>,
}

impl BlockCopier {
    pub fn new(api: Arc<dyn DocumentApi>) -> Self {
        Self {
            api,
            retry: RetryPolicy::default(),
            chunk_delay: defaults::BLOCK_CHUNK_DELAY,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Append every copyable block of `source` under the root of `target`.
    ///
    /// A subtree too large for one nested create is split: its root goes in
    /// alone and its children are chunked under the new root, recursively.
    #[instrument(skip(self, source), fields(source_blocks = source.len()))]
    pub async fn copy_tree(&self, source: &BlockTree, target: &str) -> Result<CopyReport> {
        let mut report = CopyReport::default();
        let units = collect_units(source, &mut report);
        debug!(
            units = units.len(),
            total = units.iter().map(|u| u.blocks.len()).sum::<usize>(),
            "Prepared copy"
        );

        let mut levels = vec![Level {
            parent: target.to_string(),
            units,
        }];
        while let Some(level) = levels.pop() {
            self.place_level(target, level, &mut levels, &mut report)
                .await?;
        }

        info!(
            target_document = target,
            copied = report.copied,
            skipped = report.skipped,
            chunks = report.chunks,
            "Block tree copied"
        );
        Ok(report)
    }

    /// Place one parent's subtrees in order, queueing the children of split
    /// subtrees onto `levels`.
    async fn place_level(
        &self,
        target: &str,
        level: Level,
        levels: &mut Vec<Level>,
        report: &mut CopyReport,
    ) -> Result<()> {
        let mut cursor = Cursor {
            parent: level.parent,
            index: 0,
        };
        let mut pending: Vec<Unit> = Vec::new();
        let mut pending_size = 0usize;

        for unit in level.units {
            let size = unit.blocks.len();
            if size > defaults::BLOCK_BATCH_LIMIT {
                self.send_chunk(target, std::mem::take(&mut pending), &mut cursor, report)
                    .await?;
                pending_size = 0;
                warn!(root = %unit.root, size, "Subtree exceeds batch limit, splitting below its root");
                self.split_unit(target, &unit, &mut cursor, levels, report)
                    .await?;
                continue;
            }
            if pending_size + size > defaults::BLOCK_BATCH_LIMIT {
                self.send_chunk(target, std::mem::take(&mut pending), &mut cursor, report)
                    .await?;
                pending_size = 0;
            }
            pending_size += size;
            pending.push(unit);
        }
        self.send_chunk(target, pending, &mut cursor, report).await
    }

    async fn send_chunk(
        &self,
        target: &str,
        units: Vec<Unit>,
        cursor: &mut Cursor,
        report: &mut CopyReport,
    ) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        self.pace(report).await;

        let request = CreateDescendantRequest {
            children_id: units.iter().map(|u| u.root.clone()).collect(),
            index: cursor.index as i64,
            descendants: units.iter().flat_map(|u| u.blocks.iter().cloned()).collect(),
        };
        let size = request.descendants.len();

        match self.api.create_descendants(target, &cursor.parent, request).await {
            Ok(_) => {
                debug!(size, parent = %cursor.parent, index = cursor.index, "Chunk created");
                cursor.index += units.len();
                report.copied += size;
                report.chunks += 1;
                Ok(())
            }
            Err(e) => {
                warn!(size, error = %e, "Chunk rejected, copying block by block");
                for unit in &units {
                    self.copy_unit_singly(target, unit, cursor, report).await?;
                }
                Ok(())
            }
        }
    }

    /// Space consecutive nested creates apart.
    async fn pace(&self, report: &CopyReport) {
        if report.chunks > 0 {
            sleep(self.chunk_delay).await;
        }
    }

    /// Create the head of an oversized subtree and queue the rest of it.
    async fn split_unit(
        &self,
        target: &str,
        unit: &Unit,
        cursor: &mut Cursor,
        levels: &mut Vec<Level>,
        report: &mut CopyReport,
    ) -> Result<()> {
        let (head, below) = split_off_children(unit);
        if head.is_empty() {
            return Ok(());
        }
        self.pace(report).await;

        let request = CreateDescendantRequest {
            children_id: vec![unit.root.clone()],
            index: cursor.index as i64,
            descendants: head,
        };
        let parent = cursor.parent.clone();
        let created = self
            .retry
            .run_if("copy_subtree_head", Error::is_retryable, || {
                self.api.create_descendants(target, &parent, request.clone())
            })
            .await?;
        cursor.index += 1;
        report.copied += request.descendants.len();
        report.chunks += 1;

        let ids: HashMap<String, String> = created
            .block_id_relations
            .into_iter()
            .map(|r| (r.temporary_block_id, r.block_id))
            .collect();
        for (owner, units) in below {
            match ids.get(&owner) {
                Some(parent) => levels.push(Level {
                    parent: parent.clone(),
                    units,
                }),
                None => {
                    let lost: usize = units.iter().map(|u| u.blocks.len()).sum();
                    warn!(block_id = %owner, lost, "Created block missing from id relations");
                    report.skipped += lost;
                }
            }
        }
        Ok(())
    }

    /// Recreate one subtree with single-block creates, breadth first.
    ///
    /// Tables go in as one nested create since their cells cannot be
    /// created on their own.
    async fn copy_unit_singly(
        &self,
        target: &str,
        unit: &Unit,
        cursor: &mut Cursor,
        report: &mut CopyReport,
    ) -> Result<()> {
        let templates = unit.templates();
        let Some(root) = templates.get(unit.root.as_str()) else {
            return Ok(());
        };

        if root.block_type == BlockType::Table {
            let request = CreateDescendantRequest {
                children_id: vec![unit.root.clone()],
                index: cursor.index as i64,
                descendants: unit.blocks.clone(),
            };
            let parent = cursor.parent.clone();
            self.retry
                .run_if("copy_table", Error::is_retryable, || {
                    self.api.create_descendants(target, &parent, request.clone())
                })
                .await?;
            cursor.index += 1;
            report.copied += unit.blocks.len();
            return Ok(());
        }

        let mut queue: VecDeque<(&str, String, Option<usize>)> = VecDeque::new();
        queue.push_back((unit.root.as_str(), cursor.parent.clone(), Some(cursor.index)));

        while let Some((id, parent, at)) = queue.pop_front() {
            let Some(source) = templates.get(id) else { continue };
            let mut single = (*source).clone();
            single.block_id = None;
            single.children.clear();

            let created = self
                .retry
                .run_if("copy_block", Error::is_retryable, || {
                    self.create_one(target, &parent, at, single.clone())
                })
                .await;

            match created {
                Ok(new_id) => {
                    report.copied += 1;
                    if id == unit.root {
                        cursor.index += 1;
                    }
                    for child in &source.children {
                        queue.push_back((child.as_str(), new_id.clone(), None));
                    }
                }
                Err(e) if source.block_type == BlockType::Image => {
                    warn!(block_id = id, error = %e, "Dropping image that could not be copied");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn create_one(
        &self,
        target: &str,
        parent: &str,
        index: Option<usize>,
        block: NewBlock,
    ) -> Result<String> {
        let created = self
            .api
            .create_children(target, parent, index, vec![block])
            .await?;
        created
            .into_iter()
            .next()
            .map(|b| b.block_id)
            .ok_or_else(|| Error::Decode("no block returned from create".into()))
    }
}

/// Split a subtree into the blocks created up front and the child subtrees
/// queued below them, keyed by the template id of their parent.
///
/// A table keeps its cells in the head, emptied, since cells cannot be
/// created on their own. Cell contents are queued per cell.
fn split_off_children(unit: &Unit) -> (Vec<NewBlock>, Vec<(String, Vec<Unit>)>) {
    let templates = unit.templates();
    let Some(root) = templates.get(unit.root.as_str()).copied() else {
        return (Vec::new(), Vec::new());
    };

    let is_table = root.block_type == BlockType::Table;
    let mut top = root.clone();
    let owners: Vec<&NewBlock> = if is_table {
        root.children
            .iter()
            .filter_map(|id| templates.get(id.as_str()).copied())
            .collect()
    } else {
        top.children.clear();
        vec![root]
    };

    let mut head = vec![top];
    let mut below = Vec::new();
    for owner in owners {
        if is_table {
            let mut cell = owner.clone();
            cell.children.clear();
            head.push(cell);
        }
        let Some(owner_id) = owner.block_id.clone() else { continue };
        let units: Vec<Unit> = owner
            .children
            .iter()
            .map(|child| Unit {
                root: child.clone(),
                blocks: subtree(&templates, child),
            })
            .collect();
        if !units.is_empty() {
            below.push((owner_id, units));
        }
    }
    (head, below)
}

/// Templates of the subtree under `root`, parents first.
fn subtree(templates: &HashMap<&str, &NewBlock>, root: &str) -> Vec<NewBlock> {
    let mut blocks = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Some(block) = templates.get(id) else { continue };
        blocks.push((*block).clone());
        stack.extend(block.children.iter().rev().map(String::as_str));
    }
    blocks
}

fn collect_units(source: &BlockTree, report: &mut CopyReport) -> Vec<Unit> {
    let mut units = Vec::new();
    for top in source.top_level() {
        let Some(block) = source.get(top) else { continue };
        if !is_copyable(block, source) {
            report.skipped += source.subtree_size(top);
            continue;
        }
        let mut blocks = Vec::new();
        let mut stack = vec![block];
        while let Some(block) = stack.pop() {
            let mut new = template(block);
            let mut kept = Vec::new();
            for child in source.children(&block.block_id) {
                match source.get(child) {
                    Some(c) if is_copyable(c, source) => kept.push(c),
                    _ => report.skipped += source.subtree_size(child),
                }
            }
            new.children = kept.iter().map(|c| c.block_id.clone()).collect();
            stack.extend(kept.into_iter().rev());
            blocks.push(new);
        }
        units.push(Unit {
            root: top.to_string(),
            blocks,
        });
    }
    units
}

//! Block tree snapshots.

use std::collections::HashMap;

use tracing::{debug, trace};

use docbridge_core::{BlockType, Error, RemoteBlock, Result};
use docbridge_remote::DocumentApi;

/// Read every block of a document, following pagination.
pub async fn fetch_all_blocks(api: &dyn DocumentApi, document_id: &str) -> Result<Vec<RemoteBlock>> {
    let mut blocks = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = api.list_blocks(document_id, page_token.as_deref()).await?;
        trace!(document_id, items = page.items.len(), "Fetched block page");
        blocks.extend(page.items);
        match page.page_token {
            Some(next) if page.has_more && !next.is_empty() => page_token = Some(next),
            _ => break,
        }
    }
    debug!(document_id, block_count = blocks.len(), "Fetched block tree");
    Ok(blocks)
}

/// Indexed view of a document's blocks.
#[derive(Debug, Clone)]
pub struct BlockTree {
    root: String,
    blocks: HashMap<String, RemoteBlock>,
}

impl BlockTree {
    /// Index a flat block listing. The root is the page block.
    pub fn new(blocks: Vec<RemoteBlock>) -> Result<Self> {
        let root = blocks
            .iter()
            .find(|b| b.block_type == BlockType::Page)
            .or_else(|| blocks.first())
            .map(|b| b.block_id.clone())
            .ok_or_else(|| Error::Decode("document has no blocks".into()))?;
        let blocks = blocks
            .into_iter()
            .map(|b| (b.block_id.clone(), b))
            .collect();
        Ok(Self { root, blocks })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, id: &str) -> Option<&RemoteBlock> {
        self.blocks.get(id)
    }

    /// Child ids of a block, in order, limited to blocks present in the snapshot.
    pub fn children(&self, id: &str) -> Vec<&str> {
        self.blocks
            .get(id)
            .map(|b| {
                b.children
                    .iter()
                    .filter(|c| self.blocks.contains_key(c.as_str()))
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Children of the root.
    pub fn top_level(&self) -> Vec<&str> {
        self.children(&self.root)
    }

    /// Number of blocks in the subtree rooted at `id`, including `id`.
    pub fn subtree_size(&self, id: &str) -> usize {
        let mut count = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.blocks.contains_key(current) {
                count += 1;
                stack.extend(self.children(current));
            }
        }
        count
    }

    /// Number of blocks below the root.
    pub fn len(&self) -> usize {
        self.blocks.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

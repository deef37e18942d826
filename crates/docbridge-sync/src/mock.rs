//! In-memory remote platform for deterministic engine tests.
//!
//! [`MockDocumentApi`] keeps documents as block trees and implements the
//! import pipeline by turning every non-empty line of the uploaded source
//! into a text block. Failures can be injected per operation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let api = MockDocumentApi::new();
//! let doc = api.create_document(&["first", "second"]);
//! api.fail_next("create_descendants", 1, || Error::RateLimited("429".into()));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use docbridge_core::{
    defaults, BlockType, ContentSource, Error, LinkSharePolicy, ProgressSink, ProgressStage,
    RemoteBlock, Result, TransformedNote,
};
use docbridge_remote::types::{BlockIdRelation, ImportTaskResult};
use docbridge_remote::{
    text_run, BlockPage, BlockUpdate, BlockUpdateRequest, CreateDescendantRequest,
    CreatedDescendants, DocumentApi, DriveFileKind, MediaKind, NewBlock,
};

use crate::publisher::Authenticator;

/// Builds the error returned by an injected failure.
pub type FailureFn = fn() -> Error;

/// One recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: &'static str,
    pub input: String,
}

#[derive(Debug, Clone)]
struct Upload {
    name: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    documents: HashMap<String, HashMap<String, RemoteBlock>>,
    uploads: HashMap<String, Upload>,
    imports: HashMap<String, String>,
    import_script: VecDeque<ImportTaskResult>,
    import_failure: Option<i64>,
    failures: HashMap<&'static str, VecDeque<FailureFn>>,
    wiki_nodes: HashMap<String, String>,
    permissions: Vec<(String, LinkSharePolicy)>,
    deleted: Vec<(String, DriveFileKind)>,
    calls: Vec<MockCall>,
    page_size: Option<usize>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:05}", prefix, self.next_id)
    }

    fn document(&mut self, document_id: &str) -> Result<&mut HashMap<String, RemoteBlock>> {
        self.documents
            .get_mut(document_id)
            .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))
    }

    fn new_document(&mut self, lines: &[String]) -> String {
        let document_id = self.id("doxcn");
        let mut blocks = HashMap::new();
        let mut root = RemoteBlock {
            block_id: document_id.clone(),
            block_type: BlockType::Page,
            parent_id: String::new(),
            children: Vec::new(),
            payload: payload(BlockType::Page, json!({"elements": []})),
        };
        for line in lines.iter().filter(|l| !l.trim().is_empty()) {
            let id = self.id("blk");
            let block = RemoteBlock {
                block_id: id.clone(),
                block_type: BlockType::Text,
                parent_id: document_id.clone(),
                children: Vec::new(),
                payload: payload(
                    BlockType::Text,
                    json!({"elements": [text_run(line, false, None)]}),
                ),
            };
            root.children.push(id.clone());
            blocks.insert(id, block);
        }
        blocks.insert(document_id.clone(), root);
        self.documents.insert(document_id.clone(), blocks);
        document_id
    }

    fn take_failure(&mut self, operation: &'static str, input: String) -> Result<()> {
        self.calls.push(MockCall { operation, input });
        if let Some(queue) = self.failures.get_mut(operation) {
            if let Some(make) = queue.pop_front() {
                return Err(make());
            }
        }
        Ok(())
    }
}

fn payload(block_type: BlockType, body: Value) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(key) = block_type.payload_key() {
        map.insert(key, body);
    }
    map
}

fn invalid_index() -> Error {
    Error::Api {
        code: 1770001,
        msg: "invalid param: index".into(),
    }
}

/// Depth-first block order starting at `id`.
fn walk(blocks: &HashMap<String, RemoteBlock>, id: &str, out: &mut Vec<RemoteBlock>) {
    if let Some(block) = blocks.get(id) {
        out.push(block.clone());
        for child in &block.children {
            walk(blocks, child, out);
        }
    }
}

fn remove_subtree(blocks: &mut HashMap<String, RemoteBlock>, id: &str) {
    if let Some(block) = blocks.remove(id) {
        for child in block.children {
            remove_subtree(blocks, &child);
        }
    }
}

/// In-memory [`DocumentApi`].
#[derive(Default, Clone)]
pub struct MockDocumentApi {
    state: Arc<Mutex<State>>,
}

impl MockDocumentApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a document whose root holds one text block per line.
    pub fn create_document(&self, lines: &[&str]) -> String {
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        self.lock().new_document(&lines)
    }

    /// Append a raw block under `parent_id`.
    pub fn push_block(&self, document_id: &str, parent_id: &str, block: NewBlock) -> String {
        let mut state = self.lock();
        let id = state.id("blk");
        if let Some(blocks) = state.documents.get_mut(document_id) {
            blocks.insert(
                id.clone(),
                RemoteBlock {
                    block_id: id.clone(),
                    block_type: block.block_type,
                    parent_id: parent_id.to_string(),
                    children: Vec::new(),
                    payload: block.payload,
                },
            );
            if let Some(parent) = blocks.get_mut(parent_id) {
                parent.children.push(id.clone());
            }
        }
        id
    }

    /// Queue `times` failures for `operation` (the trait method name).
    pub fn fail_next(&self, operation: &'static str, times: usize, make: FailureFn) {
        let mut state = self.lock();
        let queue = state.failures.entry(operation).or_default();
        for _ in 0..times {
            queue.push_back(make);
        }
    }

    /// Responses returned by `get_import_task` before the real result.
    pub fn script_import(&self, results: Vec<ImportTaskResult>) {
        self.lock().import_script.extend(results);
    }

    /// Make every import report `status` with no document.
    pub fn fail_imports(&self, status: i64) {
        self.lock().import_failure = Some(status);
    }

    pub fn add_wiki_node(&self, wiki_token: &str, document_id: &str) {
        self.lock()
            .wiki_nodes
            .insert(wiki_token.to_string(), document_id.to_string());
    }

    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = Some(size.max(1));
    }

    pub fn has_document(&self, document_id: &str) -> bool {
        self.lock().documents.contains_key(document_id)
    }

    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn has_upload(&self, token: &str) -> bool {
        self.lock().uploads.contains_key(token)
    }

    pub fn upload_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().uploads.values().map(|u| u.name.clone()).collect();
        names.sort();
        names
    }

    /// All blocks of a document in depth-first order, root first.
    pub fn blocks(&self, document_id: &str) -> Vec<RemoteBlock> {
        let state = self.lock();
        let mut out = Vec::new();
        if let Some(blocks) = state.documents.get(document_id) {
            walk(blocks, document_id, &mut out);
        }
        out
    }

    /// Number of blocks below the root.
    pub fn block_count(&self, document_id: &str) -> usize {
        self.blocks(document_id).len().saturating_sub(1)
    }

    /// Plain text of every text-bearing block, in document order.
    pub fn texts(&self, document_id: &str) -> Vec<String> {
        self.blocks(document_id)
            .iter()
            .filter(|b| b.block_type.is_text_bearing())
            .map(RemoteBlock::plain_text)
            .collect()
    }

    pub fn root_children(&self, document_id: &str) -> Vec<String> {
        self.blocks(document_id)
            .first()
            .map(|root| root.children.clone())
            .unwrap_or_default()
    }

    pub fn permissions(&self) -> Vec<(String, LinkSharePolicy)> {
        self.lock().permissions.clone()
    }

    pub fn deleted(&self) -> Vec<(String, DriveFileKind)> {
        self.lock().deleted.clone()
    }

    pub fn calls(&self, operation: &str) -> Vec<MockCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DocumentApi for MockDocumentApi {
    async fn upload_source(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        _extension: &str,
    ) -> Result<String> {
        let mut state = self.lock();
        state.take_failure("upload_source", file_name.to_string())?;
        let token = state.id("boxcn");
        state.uploads.insert(
            token.clone(),
            Upload {
                name: file_name.to_string(),
                bytes,
            },
        );
        Ok(token)
    }

    async fn create_import_task(
        &self,
        file_token: &str,
        file_name: &str,
        _extension: &str,
        _folder_token: &str,
    ) -> Result<String> {
        let mut state = self.lock();
        state.take_failure("create_import_task", file_name.to_string())?;
        let upload = state
            .uploads
            .get(file_token)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file {}", file_token)))?;
        let lines: Vec<String> = String::from_utf8_lossy(&upload.bytes)
            .lines()
            .map(str::to_string)
            .collect();
        let document_id = state.new_document(&lines);
        let ticket = state.id("tkt");
        state.imports.insert(ticket.clone(), document_id);
        Ok(ticket)
    }

    async fn get_import_task(&self, ticket: &str) -> Result<ImportTaskResult> {
        let mut state = self.lock();
        state.take_failure("get_import_task", ticket.to_string())?;
        if let Some(mut scripted) = state.import_script.pop_front() {
            scripted.ticket = ticket.to_string();
            return Ok(scripted);
        }
        if let Some(status) = state.import_failure {
            return Ok(ImportTaskResult {
                ticket: ticket.to_string(),
                job_status: Some(status),
                job_error_msg: Some("conversion failed".into()),
                ..Default::default()
            });
        }
        let document_id = state
            .imports
            .get(ticket)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("ticket {}", ticket)))?;
        Ok(ImportTaskResult {
            ticket: ticket.to_string(),
            job_status: Some(0),
            job_error_msg: Some("success".into()),
            url: Some(format!("{}/{}", defaults::DOC_BASE_URL, document_id)),
            token: Some(document_id),
        })
    }

    async fn list_blocks(&self, document_id: &str, page_token: Option<&str>) -> Result<BlockPage> {
        let page_size = {
            let mut state = self.lock();
            state.take_failure("list_blocks", document_id.to_string())?;
            if !state.documents.contains_key(document_id) {
                return Err(Error::NotFound(format!("document {}", document_id)));
            }
            state.page_size.unwrap_or(defaults::BLOCK_PAGE_SIZE as usize)
        };
        let blocks = self.blocks(document_id);
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + page_size).min(blocks.len());
        let has_more = end < blocks.len();
        Ok(BlockPage {
            items: blocks[start.min(end)..end].to_vec(),
            has_more,
            page_token: has_more.then(|| end.to_string()),
        })
    }

    async fn create_children(
        &self,
        document_id: &str,
        parent_id: &str,
        index: Option<usize>,
        children: Vec<NewBlock>,
    ) -> Result<Vec<RemoteBlock>> {
        let mut state = self.lock();
        state.take_failure(
            "create_children",
            format!("{}:{}:{}", parent_id, index.map(|i| i as i64).unwrap_or(-1), children.len()),
        )?;

        let mut created = Vec::new();
        let mut new_ids = Vec::new();
        let mut fresh = Vec::new();
        for child in children {
            let id = state.id("blk");
            if child.block_type == BlockType::File {
                // The platform wraps file blocks in a view block.
                let file_id = state.id("blk");
                fresh.push(RemoteBlock {
                    block_id: file_id.clone(),
                    block_type: BlockType::File,
                    parent_id: id.clone(),
                    children: Vec::new(),
                    payload: child.payload,
                });
                let view = RemoteBlock {
                    block_id: id.clone(),
                    block_type: BlockType::View,
                    parent_id: parent_id.to_string(),
                    children: vec![file_id],
                    payload: payload(BlockType::View, json!({"view_type": 1})),
                };
                created.push(view.clone());
                fresh.push(view);
            } else {
                let block = RemoteBlock {
                    block_id: id.clone(),
                    block_type: child.block_type,
                    parent_id: parent_id.to_string(),
                    children: Vec::new(),
                    payload: child.payload,
                };
                created.push(block.clone());
                fresh.push(block);
            }
            new_ids.push(id);
        }

        let blocks = state.document(document_id)?;
        let parent = blocks
            .get_mut(parent_id)
            .ok_or_else(|| Error::NotFound(format!("block {}", parent_id)))?;
        let at = index.unwrap_or(parent.children.len());
        if at > parent.children.len() {
            return Err(invalid_index());
        }
        parent.children.splice(at..at, new_ids);
        for block in fresh {
            blocks.insert(block.block_id.clone(), block);
        }
        Ok(created)
    }

    async fn create_descendants(
        &self,
        document_id: &str,
        parent_id: &str,
        request: CreateDescendantRequest,
    ) -> Result<CreatedDescendants> {
        let mut state = self.lock();
        state.take_failure("create_descendants", request.descendants.len().to_string())?;
        if request.descendants.len() > defaults::BLOCK_BATCH_LIMIT {
            return Err(Error::Api {
                code: 1770001,
                msg: "too many descendants".into(),
            });
        }

        let templates: HashMap<String, NewBlock> = request
            .descendants
            .iter()
            .filter_map(|b| b.block_id.clone().map(|id| (id, b.clone())))
            .collect();

        let mut relations = Vec::new();
        let mut fresh = Vec::new();
        let mut top_ids = Vec::new();
        let mut stack: Vec<(String, String)> = request
            .children_id
            .iter()
            .map(|temp| (temp.clone(), parent_id.to_string()))
            .collect();
        let mut assigned: HashMap<String, String> = HashMap::new();
        for (temp, _) in &stack {
            let id = state.id("blk");
            assigned.insert(temp.clone(), id.clone());
            top_ids.push(id);
        }
        while let Some((temp, parent)) = stack.pop() {
            let template = templates
                .get(&temp)
                .ok_or_else(|| Error::Api {
                    code: 1770001,
                    msg: format!("unknown block id {}", temp),
                })?;
            let id = match assigned.get(&temp) {
                Some(id) => id.clone(),
                None => {
                    let id = state.id("blk");
                    assigned.insert(temp.clone(), id.clone());
                    id
                }
            };
            let mut child_ids = Vec::new();
            for child in &template.children {
                let child_id = state.id("blk");
                assigned.insert(child.clone(), child_id.clone());
                child_ids.push(child_id);
                stack.push((child.clone(), id.clone()));
            }
            relations.push(BlockIdRelation {
                temporary_block_id: temp.clone(),
                block_id: id.clone(),
            });
            fresh.push(RemoteBlock {
                block_id: id,
                block_type: template.block_type,
                parent_id: parent,
                children: child_ids,
                payload: template.payload.clone(),
            });
        }

        let blocks = state.document(document_id)?;
        let parent = blocks
            .get_mut(parent_id)
            .ok_or_else(|| Error::NotFound(format!("block {}", parent_id)))?;
        let at = usize::try_from(request.index).map_err(|_| invalid_index())?;
        if at > parent.children.len() {
            return Err(invalid_index());
        }
        parent.children.splice(at..at, top_ids);
        for block in fresh {
            blocks.insert(block.block_id.clone(), block);
        }
        Ok(CreatedDescendants {
            block_id_relations: relations,
        })
    }

    async fn delete_children(
        &self,
        document_id: &str,
        parent_id: &str,
        start: usize,
        end: usize,
    ) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("delete_children", format!("{}:{}..{}", parent_id, start, end))?;
        let blocks = state.document(document_id)?;
        let parent = blocks
            .get_mut(parent_id)
            .ok_or_else(|| Error::NotFound(format!("block {}", parent_id)))?;
        if start > end || end > parent.children.len() {
            return Err(invalid_index());
        }
        let removed: Vec<String> = parent.children.drain(start..end).collect();
        for id in removed {
            remove_subtree(blocks, &id);
        }
        Ok(())
    }

    async fn update_block(
        &self,
        document_id: &str,
        block_id: &str,
        update: BlockUpdate,
    ) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("update_block", block_id.to_string())?;
        apply_update(state.document(document_id)?, block_id, update)
    }

    async fn batch_update_blocks(
        &self,
        document_id: &str,
        requests: Vec<BlockUpdateRequest>,
    ) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("batch_update_blocks", requests.len().to_string())?;
        let blocks = state.document(document_id)?;
        for request in requests {
            apply_update(blocks, &request.block_id, request.update)?;
        }
        Ok(())
    }

    async fn upload_block_media(
        &self,
        document_id: &str,
        block_id: &str,
        _kind: MediaKind,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let mut state = self.lock();
        state.take_failure("upload_block_media", file_name.to_string())?;
        state.document(document_id)?;
        let token = state.id("boxcnMEDIA");
        state.uploads.insert(
            token.clone(),
            Upload {
                name: format!("{}@{}", file_name, block_id),
                bytes,
            },
        );
        Ok(token)
    }

    async fn set_public_permission(
        &self,
        document_id: &str,
        policy: LinkSharePolicy,
    ) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("set_public_permission", document_id.to_string())?;
        state.permissions.push((document_id.to_string(), policy));
        Ok(())
    }

    async fn delete_file(&self, token: &str, kind: DriveFileKind) -> Result<()> {
        let mut state = self.lock();
        state.take_failure("delete_file", token.to_string())?;
        match kind {
            DriveFileKind::Docx => {
                state.documents.remove(token);
            }
            DriveFileKind::File => {
                state.uploads.remove(token);
            }
        }
        state.deleted.push((token.to_string(), kind));
        Ok(())
    }

    async fn resolve_wiki_node(&self, token: &str) -> Result<String> {
        let mut state = self.lock();
        state.take_failure("resolve_wiki_node", token.to_string())?;
        state
            .wiki_nodes
            .get(token)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("wiki node {}", token)))
    }
}

fn apply_update(
    blocks: &mut HashMap<String, RemoteBlock>,
    block_id: &str,
    update: BlockUpdate,
) -> Result<()> {
    let block = blocks
        .get_mut(block_id)
        .ok_or_else(|| Error::NotFound(format!("block {}", block_id)))?;
    let key = block
        .block_type
        .payload_key()
        .ok_or_else(|| Error::InvalidInput("block has no payload".into()))?;
    let body = block.payload.entry(key).or_insert_with(|| json!({}));
    match update {
        BlockUpdate::ReplaceImage { token } | BlockUpdate::ReplaceFile { token } => {
            body["token"] = Value::String(token);
        }
        BlockUpdate::UpdateTextElements { elements } => {
            body["elements"] = Value::Array(elements);
        }
    }
    Ok(())
}

/// Vault held in memory.
#[derive(Default)]
pub struct MemoryContentSource {
    files: HashMap<String, Vec<u8>>,
    notes: HashMap<String, TransformedNote>,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, bytes: &[u8]) -> Self {
        self.files.insert(path.to_string(), bytes.to_vec());
        self
    }

    pub fn with_note(mut self, path: &str, note: TransformedNote) -> Self {
        self.notes.insert(path.to_string(), note);
        self
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("vault file {}", path)))
    }

    async fn load_note(&self, path: &str) -> Result<TransformedNote> {
        self.notes
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("vault note {}", path)))
    }
}

/// Progress sink that records every stage.
#[derive(Default)]
pub struct RecordingProgress {
    stages: Mutex<Vec<ProgressStage>>,
}

impl RecordingProgress {
    pub fn stages(&self) -> Vec<ProgressStage> {
        match self.stages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, stage: ProgressStage) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.push(stage);
        }
    }
}

/// Authenticator with a fixed answer.
pub struct StaticAuth(pub bool);

#[async_trait]
impl Authenticator for StaticAuth {
    async fn ensure_valid(&self, _interactive: bool) -> bool {
        self.0
    }
}

//! Request/response types for the remote platform REST API.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use docbridge_core::{BlockType, CalloutStyle, RemoteBlock};

// =============================================================================
// ENVELOPES
// =============================================================================

/// Standard `{code, msg, data}` response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// Lenient view of any response body, used to detect business errors before
/// decoding the typed payload.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ErrorBody {
    pub fn message(&self) -> String {
        self.msg
            .clone()
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_default()
    }
}

/// Payload for endpoints that return no data.
#[derive(Debug, Default, Deserialize)]
pub struct Empty {}

// =============================================================================
// AUTH
// =============================================================================

/// OAuth v2 token endpoint request (refresh grant).
#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub refresh_token: &'a str,
}

/// OAuth v2 token endpoint response (fields at top level).
#[derive(Debug, Deserialize)]
pub struct OAuthTokenResponse {
    #[serde(default)]
    pub code: i64,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Subset of `/authen/v1/user_info` used by the token check.
#[derive(Debug, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub open_id: Option<String>,
}

// =============================================================================
// DRIVE
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UploadData {
    pub file_token: String,
}

/// Where an imported document is mounted.
#[derive(Debug, Serialize)]
pub struct ImportPoint {
    pub mount_type: u8,
    pub mount_key: String,
}

#[derive(Debug, Serialize)]
pub struct ImportTaskRequest {
    pub file_extension: String,
    pub file_token: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub file_name: String,
    pub point: ImportPoint,
}

#[derive(Debug, Deserialize)]
pub struct ImportTaskCreated {
    pub ticket: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportTaskData {
    pub result: ImportTaskResult,
}

/// Raw import task state as reported by the platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportTaskResult {
    #[serde(default)]
    pub ticket: String,
    #[serde(default)]
    pub job_status: Option<i64>,
    #[serde(default)]
    pub job_error_msg: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ImportTaskResult {
    /// Document token, if one is attached.
    pub fn document_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct PublicPermissionRequest {
    pub link_share_entity: String,
}

/// Drive object kinds accepted by the delete endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveFileKind {
    File,
    Docx,
}

impl DriveFileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Docx => "docx",
        }
    }
}

/// Media slots inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    File,
}

impl MediaKind {
    /// `parent_type` for the media upload endpoint.
    pub fn parent_type(&self) -> &'static str {
        match self {
            Self::Image => "docx_image",
            Self::File => "docx_file",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WikiNodeData {
    pub node: WikiNode,
}

#[derive(Debug, Deserialize)]
pub struct WikiNode {
    pub obj_token: String,
    #[serde(default)]
    pub obj_type: String,
}

// =============================================================================
// DOCX BLOCKS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct BlockPage {
    #[serde(default)]
    pub items: Vec<RemoteBlock>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub page_token: Option<String>,
}

/// Block to be created. `block_id` and `children` are only used by the
/// descendant endpoint, where ids are client-chosen temporaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub block_type: BlockType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl NewBlock {
    fn with_payload(block_type: BlockType, body: Value) -> Self {
        let mut payload = Map::new();
        if let Some(key) = block_type.payload_key() {
            payload.insert(key, body);
        }
        Self {
            block_id: None,
            block_type,
            children: Vec::new(),
            payload,
        }
    }

    pub fn text(elements: Vec<Value>) -> Self {
        Self::with_payload(BlockType::Text, json!({ "elements": elements }))
    }

    pub fn image() -> Self {
        Self::with_payload(BlockType::Image, json!({}))
    }

    pub fn file() -> Self {
        Self::with_payload(BlockType::File, json!({ "token": "" }))
    }

    pub fn callout(style: CalloutStyle) -> Self {
        Self::with_payload(
            BlockType::Callout,
            json!({
                "background_color": style.background_color(),
                "border_color": style.border_color(),
                "emoji_id": style.emoji_id(),
            }),
        )
    }

    /// Copy a block snapshot, keeping only its type-specific payload.
    pub fn from_snapshot(block: &RemoteBlock) -> Self {
        let body = block.body().cloned().unwrap_or_else(|| json!({}));
        Self::with_payload(block.block_type, body)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.block_id = Some(id.into());
        self
    }
}

/// Text run element, optionally bold or linked.
pub fn text_run(content: &str, bold: bool, link: Option<&str>) -> Value {
    let mut style = Map::new();
    if bold {
        style.insert("bold".into(), Value::Bool(true));
    }
    if let Some(url) = link {
        style.insert("link".into(), json!({ "url": url }));
    }
    json!({
        "text_run": {
            "content": content,
            "text_element_style": Value::Object(style),
        }
    })
}

#[derive(Debug, Serialize)]
pub struct CreateChildrenRequest {
    pub children: Vec<NewBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreatedChildren {
    #[serde(default)]
    pub children: Vec<RemoteBlock>,
}

/// Nested creation payload: `children_id` are the top-level temporary ids,
/// `descendants` holds every block of the subtree.
#[derive(Debug, Clone, Serialize)]
pub struct CreateDescendantRequest {
    pub children_id: Vec<String>,
    pub index: i64,
    pub descendants: Vec<NewBlock>,
}

#[derive(Debug, Deserialize)]
pub struct BlockIdRelation {
    pub temporary_block_id: String,
    pub block_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreatedDescendants {
    #[serde(default)]
    pub block_id_relations: Vec<BlockIdRelation>,
}

#[derive(Debug, Serialize)]
pub struct BatchDeleteRequest {
    pub start_index: usize,
    pub end_index: usize,
}

/// Single-block mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockUpdate {
    ReplaceImage { token: String },
    ReplaceFile { token: String },
    UpdateTextElements { elements: Vec<Value> },
}

/// One entry of a `batch_update` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockUpdateRequest {
    pub block_id: String,
    #[serde(flatten)]
    pub update: BlockUpdate,
}

#[derive(Debug, Serialize)]
pub struct BatchUpdateRequest {
    pub requests: Vec<BlockUpdateRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_wire_shape() {
        let block = NewBlock::text(vec![text_run("hi", false, None)]);
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["block_type"], 2);
        assert_eq!(v["text"]["elements"][0]["text_run"]["content"], "hi");
        assert!(v.get("block_id").is_none());
        assert!(v.get("children").is_none());
    }

    #[test]
    fn test_image_and_callout_shapes() {
        let v = serde_json::to_value(NewBlock::image()).unwrap();
        assert_eq!(v["block_type"], 27);
        assert!(v["image"].is_object());

        let v = serde_json::to_value(NewBlock::callout(CalloutStyle::Warning)).unwrap();
        assert_eq!(v["block_type"], 19);
        assert_eq!(v["callout"]["emoji_id"], "warning");
    }

    #[test]
    fn test_block_update_shapes() {
        let v = serde_json::to_value(BlockUpdate::ReplaceImage {
            token: "boxcn".into(),
        })
        .unwrap();
        assert_eq!(v, json!({"replace_image": {"token": "boxcn"}}));

        let req = BlockUpdateRequest {
            block_id: "b1".into(),
            update: BlockUpdate::UpdateTextElements { elements: vec![] },
        };
        let v = serde_json::to_value(req).unwrap();
        assert_eq!(v["block_id"], "b1");
        assert!(v["update_text_elements"]["elements"].is_array());
    }

    #[test]
    fn test_text_run_link_style() {
        let v = text_run("Doc", false, Some("https%3A%2F%2Fx"));
        assert_eq!(
            v["text_run"]["text_element_style"]["link"]["url"],
            "https%3A%2F%2Fx"
        );
        assert!(v["text_run"]["text_element_style"].get("bold").is_none());
    }

    #[test]
    fn test_import_result_ignores_empty_token() {
        let r: ImportTaskResult =
            serde_json::from_value(json!({"ticket": "t", "job_status": 2, "token": ""})).unwrap();
        assert!(r.document_token().is_none());
    }

    #[test]
    fn test_error_body_message_fallbacks() {
        let p: ErrorBody =
            serde_json::from_value(json!({"code": 20037, "error_description": "bad grant"}))
                .unwrap();
        assert_eq!(p.message(), "bad grant");
    }
}

//! Data model shared by the remote client and the sync engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// CREDENTIAL
// =============================================================================

/// OAuth token pair for the remote platform.
///
/// Carries no expiry; validity is discovered by calling the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// True when an access token is present and non-empty.
    pub fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// True when a refresh token is present and non-empty.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

// =============================================================================
// PENDING CONTENT
// =============================================================================

/// Visual style of a callout block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalloutStyle {
    #[default]
    Note,
    Info,
    Tip,
    Success,
    Warning,
    Danger,
    Quote,
}

impl CalloutStyle {
    /// Parse an Obsidian-style callout keyword, falling back to `Note`.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.trim().to_lowercase().as_str() {
            "info" | "abstract" | "summary" | "tldr" => Self::Info,
            "tip" | "hint" | "important" => Self::Tip,
            "success" | "check" | "done" => Self::Success,
            "warning" | "caution" | "attention" | "question" | "help" | "faq" => Self::Warning,
            "danger" | "error" | "failure" | "fail" | "missing" | "bug" => Self::Danger,
            "quote" | "cite" | "example" => Self::Quote,
            _ => Self::Note,
        }
    }

    /// Remote `background_color` enum value.
    pub fn background_color(&self) -> u32 {
        match self {
            Self::Note | Self::Info => 5,
            Self::Tip | Self::Success => 4,
            Self::Warning => 3,
            Self::Danger => 1,
            Self::Quote => 14,
        }
    }

    /// Remote `border_color` enum value.
    pub fn border_color(&self) -> u32 {
        match self {
            Self::Note | Self::Info => 5,
            Self::Tip | Self::Success => 4,
            Self::Warning => 3,
            Self::Danger => 1,
            Self::Quote => 7,
        }
    }

    /// Remote emoji id shown in the callout header.
    pub fn emoji_id(&self) -> &'static str {
        match self {
            Self::Note => "memo",
            Self::Info => "information_source",
            Self::Tip => "bulb",
            Self::Success => "white_check_mark",
            Self::Warning => "warning",
            Self::Danger => "x",
            Self::Quote => "speech_balloon",
        }
    }
}

/// What a placeholder stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentKind {
    /// Local image uploaded into an image block.
    Image,
    /// Local file uploaded into a file block.
    File,
    /// Another note, published separately and linked.
    SubDocument,
    /// Callout rendered as a native callout block.
    Callout {
        style: CalloutStyle,
        title: String,
        body: String,
    },
}

impl ContentKind {
    /// Short lowercase label for logs and progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::File => "file",
            Self::SubDocument => "sub-document",
            Self::Callout { .. } => "callout",
        }
    }

    /// Whether binding requires the local file bytes.
    pub fn needs_bytes(&self) -> bool {
        matches!(self, Self::Image | Self::File)
    }
}

/// Deferred content left behind by the text transformer.
///
/// Each instance is consumed exactly once by the placeholder resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingContent {
    /// Token inserted into the text, e.g. `__OB_CONTENT_1__`.
    pub placeholder: String,
    /// Vault-relative path of the referenced file (empty for callouts).
    pub original_path: String,
    /// Name shown to the reader.
    pub display_name: String,
    #[serde(flatten)]
    pub kind: ContentKind,
    /// Position in authoring order.
    pub ordinal: usize,
}

impl PendingContent {
    pub fn image(placeholder: impl Into<String>, path: impl Into<String>, ordinal: usize) -> Self {
        let path = path.into();
        Self {
            placeholder: placeholder.into(),
            display_name: file_name_of(&path),
            original_path: path,
            kind: ContentKind::Image,
            ordinal,
        }
    }

    pub fn file(placeholder: impl Into<String>, path: impl Into<String>, ordinal: usize) -> Self {
        let path = path.into();
        Self {
            placeholder: placeholder.into(),
            display_name: file_name_of(&path),
            original_path: path,
            kind: ContentKind::File,
            ordinal,
        }
    }

    pub fn sub_document(
        placeholder: impl Into<String>,
        path: impl Into<String>,
        display_name: impl Into<String>,
        ordinal: usize,
    ) -> Self {
        Self {
            placeholder: placeholder.into(),
            original_path: path.into(),
            display_name: display_name.into(),
            kind: ContentKind::SubDocument,
            ordinal,
        }
    }

    pub fn callout(
        placeholder: impl Into<String>,
        style: CalloutStyle,
        title: impl Into<String>,
        body: impl Into<String>,
        ordinal: usize,
    ) -> Self {
        let title = title.into();
        Self {
            placeholder: placeholder.into(),
            original_path: String::new(),
            display_name: title.clone(),
            kind: ContentKind::Callout {
                style,
                title,
                body: body.into(),
            },
            ordinal,
        }
    }

    /// The placeholder without its surrounding underscores, e.g. `OB_CONTENT_1`.
    pub fn bare_placeholder(&self) -> &str {
        self.placeholder.trim_matches('_')
    }
}

fn file_name_of(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

/// Output of the upstream text transformer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedNote {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub pending_contents: Vec<PendingContent>,
}

// =============================================================================
// IMPORT JOB
// =============================================================================

/// Classified state of an import job after one status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Pending,
    Succeeded,
    /// Failure-looking status that may still resolve to a document.
    FailedRecoverable,
    Failed,
}

/// Snapshot of an asynchronous import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
    pub ticket: String,
    pub status: ImportStatus,
    pub document_id: Option<String>,
    pub url: Option<String>,
    pub raw_status: Option<i64>,
    pub message: Option<String>,
}

/// Terminal result of waiting for an import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Completed {
        document_id: String,
        url: Option<String>,
    },
    Failed {
        reason: String,
    },
}

impl ImportOutcome {
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::Completed { document_id, .. } => Some(document_id),
            Self::Failed { .. } => None,
        }
    }
}

// =============================================================================
// REMOTE BLOCKS
// =============================================================================

/// Remote block type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum BlockType {
    Page,
    Text,
    /// Heading level 1..=9.
    Heading(u8),
    Bullet,
    Ordered,
    Code,
    Quote,
    Equation,
    Todo,
    Callout,
    Divider,
    File,
    Grid,
    GridColumn,
    Image,
    Table,
    TableCell,
    View,
    QuoteContainer,
    Unknown(u32),
}

impl From<u32> for BlockType {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::Page,
            2 => Self::Text,
            3..=11 => Self::Heading((code - 2) as u8),
            12 => Self::Bullet,
            13 => Self::Ordered,
            14 => Self::Code,
            15 => Self::Quote,
            16 => Self::Equation,
            17 => Self::Todo,
            19 => Self::Callout,
            22 => Self::Divider,
            23 => Self::File,
            24 => Self::Grid,
            25 => Self::GridColumn,
            27 => Self::Image,
            31 => Self::Table,
            32 => Self::TableCell,
            33 => Self::View,
            34 => Self::QuoteContainer,
            other => Self::Unknown(other),
        }
    }
}

impl From<BlockType> for u32 {
    fn from(t: BlockType) -> Self {
        match t {
            BlockType::Page => 1,
            BlockType::Text => 2,
            BlockType::Heading(level) => 2 + u32::from(level.clamp(1, 9)),
            BlockType::Bullet => 12,
            BlockType::Ordered => 13,
            BlockType::Code => 14,
            BlockType::Quote => 15,
            BlockType::Equation => 16,
            BlockType::Todo => 17,
            BlockType::Callout => 19,
            BlockType::Divider => 22,
            BlockType::File => 23,
            BlockType::Grid => 24,
            BlockType::GridColumn => 25,
            BlockType::Image => 27,
            BlockType::Table => 31,
            BlockType::TableCell => 32,
            BlockType::View => 33,
            BlockType::QuoteContainer => 34,
            BlockType::Unknown(code) => code,
        }
    }
}

impl BlockType {
    /// Name of the type-specific payload object in the wire format.
    pub fn payload_key(&self) -> Option<String> {
        let key = match self {
            Self::Page => "page",
            Self::Text => "text",
            Self::Heading(level) => return Some(format!("heading{}", level)),
            Self::Bullet => "bullet",
            Self::Ordered => "ordered",
            Self::Code => "code",
            Self::Quote => "quote",
            Self::Equation => "equation",
            Self::Todo => "todo",
            Self::Callout => "callout",
            Self::Divider => "divider",
            Self::File => "file",
            Self::Grid => "grid",
            Self::GridColumn => "grid_column",
            Self::Image => "image",
            Self::Table => "table",
            Self::TableCell => "table_cell",
            Self::View => "view",
            Self::QuoteContainer => "quote_container",
            Self::Unknown(_) => return None,
        };
        Some(key.to_string())
    }

    /// Whether the payload holds `elements[]` of text runs.
    pub fn is_text_bearing(&self) -> bool {
        matches!(
            self,
            Self::Text
                | Self::Heading(_)
                | Self::Bullet
                | Self::Ordered
                | Self::Code
                | Self::Quote
                | Self::Equation
                | Self::Todo
        )
    }
}

/// Read snapshot of one remote block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBlock {
    pub block_id: String,
    pub block_type: BlockType,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub children: Vec<String>,
    /// Type-named payload objects (`text`, `image`, ...), kept verbatim.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RemoteBlock {
    /// The type-specific payload object, if present.
    pub fn body(&self) -> Option<&Value> {
        self.block_type
            .payload_key()
            .and_then(|key| self.payload.get(&key))
    }

    /// Text elements of a text-bearing block.
    pub fn elements(&self) -> &[Value] {
        self.body()
            .and_then(|b| b.get("elements"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Concatenated `text_run` content of the block.
    pub fn plain_text(&self) -> String {
        self.elements()
            .iter()
            .filter_map(|e| e.pointer("/text_run/content").and_then(Value::as_str))
            .collect()
    }

    /// Media token bound to an image or file block, if any.
    pub fn media_token(&self) -> Option<&str> {
        self.body()
            .and_then(|b| b.get("token"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }
}

// =============================================================================
// PUBLISHING
// =============================================================================

/// Link-sharing policy applied to newly created documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSharePolicy {
    Closed,
    #[default]
    TenantReadable,
    TenantEditable,
    AnyoneReadable,
    AnyoneEditable,
}

impl LinkSharePolicy {
    /// Wire value of `link_share_entity`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::TenantReadable => "tenant_readable",
            Self::TenantEditable => "tenant_editable",
            Self::AnyoneReadable => "anyone_readable",
            Self::AnyoneEditable => "anyone_editable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "closed" => Some(Self::Closed),
            "tenant_readable" => Some(Self::TenantReadable),
            "tenant_editable" => Some(Self::TenantEditable),
            "anyone_readable" => Some(Self::AnyoneReadable),
            "anyone_editable" => Some(Self::AnyoneEditable),
            _ => None,
        }
    }
}

/// Structured result returned by `publish` / `update_existing`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    pub success: bool,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Link to the raw uploaded file when conversion failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<String>,
}

impl PublishResult {
    pub fn succeeded(title: impl Into<String>, document_id: String, url: String) -> Self {
        Self {
            success: true,
            title: title.into(),
            url: Some(url),
            document_id: Some(document_id),
            ..Default::default()
        }
    }

    pub fn failed(title: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            title: title.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_fallback_url(mut self, url: Option<String>) -> Self {
        self.fallback_url = url;
        self
    }
}

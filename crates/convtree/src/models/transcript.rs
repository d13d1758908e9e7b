use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION: &str = "convtree.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum SchemaVersion {
    #[serde(rename = "convtree.v1")]
    #[schemars(rename = "convtree.v1")]
    ConvtreeV1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Unknown,
}

impl Role {
    /// Maps an `author.role` value; `None` means the value is not one of the
    /// roles the app writes.
    #[must_use]
    pub fn from_author_role(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::System,
            Self::User,
            Self::Assistant,
            Self::Tool,
            Self::Unknown,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    MalformedNode,
    DuplicateNodeId,
    IncompletePayload,
    UnrecognizedRole,
    DanglingParent,
    DanglingChild,
    ParentChildMismatch,
    UnreachableCurrentNode,
    AmbiguousPrimaryRoot,
    NoRoot,
    UnreachableNodes,
    TimestampOrder,
    MissingTimestamp,
    TimestampOutOfRange,
    UnknownContentType,
    AlternatesTruncated,
}

impl AnomalyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedNode => "malformed_node",
            Self::DuplicateNodeId => "duplicate_node_id",
            Self::IncompletePayload => "incomplete_payload",
            Self::UnrecognizedRole => "unrecognized_role",
            Self::DanglingParent => "dangling_parent",
            Self::DanglingChild => "dangling_child",
            Self::ParentChildMismatch => "parent_child_mismatch",
            Self::UnreachableCurrentNode => "unreachable_current_node",
            Self::AmbiguousPrimaryRoot => "ambiguous_primary_root",
            Self::NoRoot => "no_root",
            Self::UnreachableNodes => "unreachable_nodes",
            Self::TimestampOrder => "timestamp_order",
            Self::MissingTimestamp => "missing_timestamp",
            Self::TimestampOutOfRange => "timestamp_out_of_range",
            Self::UnknownContentType => "unknown_content_type",
            Self::AlternatesTruncated => "alternates_truncated",
        }
    }

    #[must_use]
    pub const fn all() -> [Self; 16] {
        [
            Self::MalformedNode,
            Self::DuplicateNodeId,
            Self::IncompletePayload,
            Self::UnrecognizedRole,
            Self::DanglingParent,
            Self::DanglingChild,
            Self::ParentChildMismatch,
            Self::UnreachableCurrentNode,
            Self::AmbiguousPrimaryRoot,
            Self::NoRoot,
            Self::UnreachableNodes,
            Self::TimestampOrder,
            Self::MissingTimestamp,
            Self::TimestampOutOfRange,
            Self::UnknownContentType,
            Self::AlternatesTruncated,
        ]
    }
}

/// Non-fatal irregularity found while loading or reconstructing a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Anomaly {
    pub kind: AnomalyKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    pub detail: String,
}

impl Anomaly {
    pub fn new(kind: AnomalyKind, node_id: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: node_id.map(ToString::to_string),
            detail: detail.into(),
        }
    }

    pub fn at(kind: AnomalyKind, node_id: &str, detail: impl Into<String>) -> Self {
        Self::new(kind, Some(node_id), detail)
    }
}

/// Pointer metadata for an image attached to a message. The asset itself is
/// never fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageAsset {
    pub asset_pointer: String,
    pub width: u64,
    pub height: u64,
    pub size_bytes: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedMessage {
    pub sequence_index: u64,
    pub role: Role,

    /// Unix seconds, converted from the Cocoa `createTime`.
    pub timestamp: Option<f64>,
    pub timestamp_utc: Option<String>,

    /// The payload's content tag, verbatim.
    pub content_type: String,
    pub rendered_content: String,
    pub source_node_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<ImageAsset>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transcript {
    pub root_node_id: Option<String>,
    pub leaf_node_id: Option<String>,
    pub messages: Vec<NormalizedMessage>,
}

impl Transcript {
    #[must_use]
    pub fn count_role(&self, role: Role) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role == role)
            .count()
    }
}

/// A root-to-leaf path of the primary tree other than the main branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlternateBranch {
    /// Deepest node the alternate shares with the main branch.
    pub divergence_node_id: String,
    pub transcript: Transcript,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentMetadata {
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<f64>,

    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConversationRecord {
    pub schema_version: SchemaVersion,
    pub conversation_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub source_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,

    pub metadata: DocumentMetadata,
    pub primary: Transcript,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary: Vec<Transcript>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<AlternateBranch>,

    #[serde(default)]
    pub anomalies: Vec<Anomaly>,

    pub message_count: usize,
    pub user_message_count: usize,
    pub assistant_message_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Io,
    InvalidJson,
    MalformedDocument,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::InvalidJson => "invalid_json",
            Self::MalformedDocument => "malformed_document",
        }
    }
}

/// A document that could not be reconstructed. Recorded once; the run
/// continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FailureRecord {
    pub source_path: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[must_use]
pub fn json_schema() -> Value {
    let schema = schemars::schema_for!(ConversationRecord);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated conversation record schema: {error}");
        }
    }
}

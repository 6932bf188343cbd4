use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator used when a [`HeaderContext`] is rendered as a single string.
pub const CONTEXT_SEPARATOR: &str = " > ";

/// Raw text of one fetched documentation page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub url: String,
    pub raw_text: String,
}

/// Heading titles leading to a chunk, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderContext(pub Vec<String>);

impl HeaderContext {
    pub fn titles(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `"Storage Classes > S3 Glacier"`; empty string for top-level text.
    pub fn path(&self) -> String {
        self.0.join(CONTEXT_SEPARATOR)
    }
}

impl fmt::Display for HeaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Atomic retrievable unit produced by the chunker for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_url: String,
    pub context: HeaderContext,
    pub body_text: String,
    /// Context plus body, capped for the embedding provider.
    pub embedding_text: String,
}

/// Payload persisted next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(rename = "context")]
    pub context_path: String,
    #[serde(rename = "text")]
    pub body_text: String,
    #[serde(default)]
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

impl IndexEntry {
    pub fn new(vector: Vec<f32>, payload: ChunkPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector,
            payload,
        }
    }
}

/// Name of an isolated knowledge-base partition, restricted to `[A-Za-z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionName(String);

impl PartitionName {
    /// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
    pub fn new(raw: &str) -> Result<Self, StoreError> {
        if raw.is_empty() {
            return Err(StoreError::Validation(
                "partition name must not be empty".to_string(),
            ));
        }

        let sanitized = raw
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();

        Ok(Self(sanitized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PartitionName {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PartitionName> for String {
    fn from(value: PartitionName) -> Self {
        value.0
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub body_text: String,
    pub context_path: String,
    pub source_url: String,
    pub score: f64,
}

impl SearchResult {
    pub fn from_payload(payload: ChunkPayload, score: f64) -> Self {
        Self {
            body_text: payload.body_text,
            context_path: payload.context_path,
            source_url: payload.source_url,
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Error,
}

/// Outcome of a partition build, shaped for callers that want a status rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub partition: String,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_indexed: Option<usize>,
    /// Chunks whose embedding failed and were left out of the partition.
    #[serde(default)]
    pub chunks_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildIndexRequest {
    pub partition: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    pub service_name: String,
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub context_filters: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

/// One ranked entry of the context handed to the generation provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlockEntry {
    pub index: usize,
    pub source_url: String,
    pub context_path: String,
    pub body_text: String,
}

/// What a combined partition + raw source removal did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteReport {
    pub service: String,
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_name_replaces_disallowed_characters() {
        let name = PartitionName::new("Amazon S3/user.guide").expect("non-empty name");
        assert_eq!(name.as_str(), "Amazon_S3_user_guide");

        let untouched = PartitionName::new("AmazonS3_v2-beta").expect("non-empty name");
        assert_eq!(untouched.as_str(), "AmazonS3_v2-beta");
    }

    #[test]
    fn partition_name_rejects_empty_input() {
        assert!(PartitionName::new("").is_err());
    }

    #[test]
    fn header_context_joins_outer_to_inner() {
        let context = HeaderContext(vec!["Storage Classes".to_string(), "S3 Glacier".to_string()]);
        assert_eq!(context.path(), "Storage Classes > S3 Glacier");
        assert_eq!(HeaderContext::default().path(), "");
    }

    #[test]
    fn payload_uses_compact_wire_keys() {
        let payload = ChunkPayload {
            source_url: "https://docs.aws.amazon.com/AmazonS3/latest/userguide/a.html".to_string(),
            context_path: "Features".to_string(),
            body_text: "body".to_string(),
            service: "AmazonS3".to_string(),
        };
        let value = serde_json::to_value(&payload).expect("payload serializes");
        assert_eq!(value["context"], "Features");
        assert_eq!(value["text"], "body");
        assert_eq!(value["url"], payload.source_url);
    }
}

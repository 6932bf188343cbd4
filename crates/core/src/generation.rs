//! Contracts for the generation collaborator: single-shot text, fragment streams and tool-using steps.

use crate::error::ProviderError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text fragments in arrival order; their concatenation is the full answer.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

pub type EventStream = BoxStream<'static, Result<StreamEvent, ProviderError>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub content: String,
}

/// Event emitted while a model works, decoded once at the provider boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    TextDelta(String),
}

/// Declaration of a tool offered to the model. `parameters` is a JSON schema object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// One entry of an agent transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentTurn {
    User(String),
    Model { text: String, calls: Vec<ToolCall> },
    ToolResults(Vec<ToolResult>),
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    async fn generate_stream(&self, prompt: &str) -> Result<TextStream, ProviderError>;
}

/// A model able to request tool calls. Each step streams text deltas and tool calls;
/// tool results never come from the model.
#[async_trait]
pub trait AgentModel: Send + Sync {
    async fn step(
        &self,
        system_prompt: &str,
        transcript: &[AgentTurn],
        tools: &[ToolSpec],
    ) -> Result<EventStream, ProviderError>;
}

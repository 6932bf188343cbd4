//! Google Gemini over its REST API: embeddings, text generation and function-calling streams.

use crate::config::GeminiConfig;
use crate::embeddings::Embedder;
use crate::error::ProviderError;
use crate::generation::{
    AgentModel, AgentTurn, EventStream, Generator, StreamEvent, TextStream, ToolCall, ToolSpec,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const PROVIDER: &str = "gemini";

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_ok()
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::Configuration("Google API key not configured".to_string()))
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    fn generation_config(&self) -> Value {
        json!({
            "temperature": self.config.temperature,
            "maxOutputTokens": self.config.max_output_tokens,
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Response, ProviderError> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let details = response.text().await.unwrap_or_default();
        Err(ProviderError::Response {
            provider: PROVIDER.to_string(),
            details: format!("{status}: {details}"),
        })
    }

    async fn stream_events(&self, model: &str, body: &Value) -> Result<EventStream, ProviderError> {
        let url = format!("{}?alt=sse", self.model_url(model, "streamGenerateContent"));
        let response = self.post(&url, body).await?;
        Ok(sse_events(response))
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

impl GenerateResponse {
    fn into_events(self) -> Result<Vec<StreamEvent>, ProviderError> {
        if let Some(error) = self.error {
            return Err(ProviderError::Stream(format!(
                "gemini error {}: {}",
                error.code, error.message
            )));
        }

        let parts = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .unwrap_or_default();

        let mut events = Vec::with_capacity(parts.len());
        for part in parts {
            if let Some(call) = part.function_call {
                events.push(StreamEvent::ToolCall(ToolCall {
                    name: call.name,
                    args: call.args,
                }));
            }
            if let Some(text) = part.text.filter(|text| !text.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }
        }
        Ok(events)
    }
}

fn decode_chunk(data: &str) -> Vec<Result<StreamEvent, ProviderError>> {
    if data.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<GenerateResponse>(data).map_err(ProviderError::from) {
        Ok(chunk) => match chunk.into_events() {
            Ok(events) => events.into_iter().map(Ok).collect(),
            Err(error) => vec![Err(error)],
        },
        Err(error) => vec![Err(error)],
    }
}

fn sse_events(response: Response) -> EventStream {
    response
        .bytes_stream()
        .eventsource()
        .flat_map(|event| {
            let items = match event {
                Ok(event) => decode_chunk(&event.data),
                Err(error) => vec![Err(ProviderError::Stream(error.to_string()))],
            };
            stream::iter(items)
        })
        .boxed()
}

fn text_content(role: &str, text: &str) -> Value {
    json!({ "role": role, "parts": [ { "text": text } ] })
}

fn transcript_contents(transcript: &[AgentTurn]) -> Vec<Value> {
    transcript
        .iter()
        .map(|turn| match turn {
            AgentTurn::User(text) => text_content("user", text),
            AgentTurn::Model { text, calls } => {
                let mut parts = Vec::new();
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
                parts.extend(calls.iter().map(|call| {
                    json!({ "functionCall": { "name": call.name, "args": call.args } })
                }));
                json!({ "role": "model", "parts": parts })
            }
            AgentTurn::ToolResults(results) => {
                let parts = results
                    .iter()
                    .map(|result| {
                        json!({
                            "functionResponse": {
                                "name": result.name,
                                "response": { "content": result.content },
                            }
                        })
                    })
                    .collect::<Vec<_>>();
                json!({ "role": "user", "parts": parts })
            }
        })
        .collect()
}

#[async_trait]
impl Embedder for GeminiClient {
    fn name(&self) -> &str {
        &self.config.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let model = &self.config.embedding_model;
        let body = json!({
            "model": format!("models/{model}"),
            "content": { "parts": [ { "text": text } ] },
        });
        let response = self.post(&self.model_url(model, "embedContent"), &body).await?;
        let parsed: EmbedResponse = response.json().await?;

        if parsed.embedding.values.is_empty() {
            return Err(ProviderError::Response {
                provider: PROVIDER.to_string(),
                details: "empty embedding".to_string(),
            });
        }
        Ok(parsed.embedding.values)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "contents": [ text_content("user", prompt) ],
            "generationConfig": self.generation_config(),
        });
        let url = self.model_url(&self.config.rag_model, "generateContent");
        let parsed: GenerateResponse = self.post(&url, &body).await?.json().await?;

        let text = parsed
            .into_events()?
            .into_iter()
            .filter_map(|event| match event {
                StreamEvent::TextDelta(text) => Some(text),
                _ => None,
            })
            .collect::<String>();
        debug!(chars = text.len(), "generated answer");
        Ok(text)
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TextStream, ProviderError> {
        let body = json!({
            "contents": [ text_content("user", prompt) ],
            "generationConfig": self.generation_config(),
        });
        let events = self.stream_events(&self.config.rag_model, &body).await?;

        Ok(events
            .filter_map(|event| async move {
                match event {
                    Ok(StreamEvent::TextDelta(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(error) => Some(Err(error)),
                }
            })
            .boxed())
    }
}

#[async_trait]
impl AgentModel for GeminiClient {
    async fn step(
        &self,
        system_prompt: &str,
        transcript: &[AgentTurn],
        tools: &[ToolSpec],
    ) -> Result<EventStream, ProviderError> {
        let mut body = json!({
            "systemInstruction": { "parts": [ { "text": system_prompt } ] },
            "contents": transcript_contents(transcript),
            "generationConfig": self.generation_config(),
        });
        if !tools.is_empty() {
            let declarations = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect::<Vec<_>>();
            body["tools"] = json!([ { "functionDeclarations": declarations } ]);
        }

        self.stream_events(&self.config.agent_model, &body).await
    }
}

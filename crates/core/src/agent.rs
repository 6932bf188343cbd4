//! Multi-step documentation agent: the model plans, calls retrieval tools and answers.

use crate::answer::NOT_CONFIGURED_MESSAGE;
use crate::config::RagConfig;
use crate::error::{ErrorKind, ProviderError, StoreError};
use crate::generation::{AgentModel, AgentTurn, EventStream, StreamEvent, ToolCall, ToolResult, ToolSpec};
use crate::models::PartitionName;
use crate::retrieval::Retriever;
use crate::traits::VectorIndex;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const AGENT_SYSTEM_PROMPT: &str = r#"You are an expert AWS Documentation Assistant.
Your goal is to help users find information about AWS services by querying the local knowledge base.

Follow this "work loop":
1. Identify the service the user is asking about. If not clear, ask the user and repeat this step.
2. Always explore available services and topics using `list_available_services` and `explore_service_topics` to understand the documentation structure and build a plan to answer the user's question.
3. Use `search_service_documentation` to find specific information about some service or topic from user question.
   - Use `context_filters` if you have identified relevant topics from step 2 to make the search more precise.
4. Synthesize the information found to answer the user's question.
5. Always cite the sources (URLs) provided in the search results.

If you cannot find information on the knowledge base, suggest checking the official AWS website.
"#;

pub const NO_RESULTS_MESSAGE: &str = "No relevant documentation found.";

const LIST_SERVICES: &str = "list_available_services";
const EXPLORE_TOPICS: &str = "explore_service_topics";
const SEARCH_DOCS: &str = "search_service_documentation";

#[derive(Debug, Deserialize)]
struct ExploreArgs {
    service_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    service_name: String,
    query: String,
    #[serde(default)]
    context_filters: Option<Vec<String>>,
}

/// The retrieval operations offered to the agent model.
pub struct DocTools {
    retriever: Arc<Retriever>,
    specs: Vec<ToolSpec>,
}

impl DocTools {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self {
            retriever,
            specs: tool_specs(),
        }
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub async fn list_available_services(&self) -> Result<Vec<String>, StoreError> {
        self.retriever.index().list_partitions().await
    }

    pub async fn explore_service_topics(&self, service: &str) -> Result<Vec<String>, StoreError> {
        let partition = PartitionName::new(service)?;
        let topics = self
            .retriever
            .index()
            .scroll_distinct_contexts(&partition)
            .await?;
        Ok(topics.into_iter().collect())
    }

    pub async fn search_service_documentation(
        &self,
        service: &str,
        query: &str,
        context_filters: Option<&[String]>,
    ) -> Result<String, ProviderError> {
        let results = self.retriever.retrieve(service, query, context_filters).await?;
        if results.is_empty() {
            return Ok(NO_RESULTS_MESSAGE.to_string());
        }

        let mut rendered = String::new();
        for (position, result) in results.iter().enumerate() {
            let _ = write!(
                rendered,
                "--- Result {} ---\nSource: {}\nContext: {}\nContent:\n{}\n\n",
                position + 1,
                result.source_url,
                result.context_path,
                result.body_text
            );
        }
        Ok(rendered)
    }

    /// Runs one tool call. Failures become the tool's output so the model can react to them.
    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let content = match self.dispatch(call).await {
            Ok(content) => content,
            Err(message) => {
                warn!(tool = %call.name, error = %message, "tool call failed");
                format!("Error: {message}")
            }
        };
        ToolResult {
            name: call.name.clone(),
            content,
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<String, String> {
        let args = call.args.clone();
        match call.name.as_str() {
            LIST_SERVICES => {
                let services = self
                    .list_available_services()
                    .await
                    .map_err(|error| error.to_string())?;
                serde_json::to_string(&services).map_err(|error| error.to_string())
            }
            EXPLORE_TOPICS => {
                let args: ExploreArgs = serde_json::from_value(args).map_err(|error| error.to_string())?;
                let topics = self
                    .explore_service_topics(&args.service_name)
                    .await
                    .map_err(|error| error.to_string())?;
                serde_json::to_string(&topics).map_err(|error| error.to_string())
            }
            SEARCH_DOCS => {
                let args: SearchArgs = serde_json::from_value(args).map_err(|error| error.to_string())?;
                self.search_service_documentation(
                    &args.service_name,
                    &args.query,
                    args.context_filters.as_deref(),
                )
                .await
                .map_err(|error| error.to_string())
            }
            other => Err(format!("unknown tool {other}")),
        }
    }
}

fn tool_specs() -> Vec<ToolSpec> {
    let service_name = json!({
        "type": "string",
        "description": "The name of the AWS service (e.g., 'AmazonS3') from `list_available_services`."
    });

    vec![
        ToolSpec {
            name: LIST_SERVICES,
            description: "Lists the AWS services available in the knowledge base documentation. \
                          Returns service names to be used in `explore_service_topics` and `search_service_documentation`.",
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: EXPLORE_TOPICS,
            description: "Lists the topics available for a specific AWS service in the knowledge base documentation. \
                          Use this to understand what information is available for a service before searching.",
            parameters: json!({
                "type": "object",
                "properties": { "service_name": service_name.clone() },
                "required": ["service_name"],
            }),
        },
        ToolSpec {
            name: SEARCH_DOCS,
            description: "Searches the documentation for a specific AWS service. \
                          Returns relevant documentation snippets with sources.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "service_name": service_name,
                    "query": { "type": "string", "description": "The search query." },
                    "context_filters": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional list of context paths (from explore_service_topics) to filter the search."
                    }
                },
                "required": ["service_name", "query"],
            }),
        },
    ]
}

pub struct DocumentationAgent {
    model: Arc<dyn AgentModel>,
    tools: DocTools,
    max_steps: usize,
}

impl DocumentationAgent {
    pub fn new(model: Arc<dyn AgentModel>, retriever: Arc<Retriever>, config: &RagConfig) -> Self {
        Self {
            model,
            tools: DocTools::new(retriever),
            max_steps: config.max_agent_steps.max(1),
        }
    }

    pub fn tools(&self) -> &DocTools {
        &self.tools
    }

    /// Events of one agent run as they happen. The stream ends after the first answer-only
    /// step, after an error, or when the step budget runs out.
    pub fn run_stream<'a>(&'a self, query: &str) -> BoxStream<'a, Result<StreamEvent, ProviderError>> {
        info!(query, "agent run started");
        let run = AgentRun {
            agent: self,
            transcript: vec![AgentTurn::User(query.to_string())],
            step: None,
            text: String::new(),
            calls: Vec::new(),
            steps: 0,
            pending: VecDeque::new(),
            finished: false,
        };

        stream::unfold(run, |mut run| async move {
            let event = run.next_event().await?;
            Some((event, run))
        })
        .boxed()
    }

    /// The concatenated answer text of one run.
    pub async fn run(&self, query: &str) -> Result<String, ProviderError> {
        let mut events = self.run_stream(query);
        let mut answer = String::new();
        while let Some(event) = events.next().await {
            if let StreamEvent::TextDelta(text) = event? {
                answer.push_str(&text);
            }
        }
        Ok(answer)
    }
}

struct AgentRun<'a> {
    agent: &'a DocumentationAgent,
    transcript: Vec<AgentTurn>,
    step: Option<EventStream>,
    text: String,
    calls: Vec<ToolCall>,
    steps: usize,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl AgentRun<'_> {
    async fn next_event(&mut self) -> Option<Result<StreamEvent, ProviderError>> {
        let agent = self.agent;
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }

            if self.step.is_none() {
                if self.steps >= agent.max_steps {
                    self.finished = true;
                    return Some(Err(ProviderError::Stream(format!(
                        "agent stopped after {} steps without a final answer",
                        agent.max_steps
                    ))));
                }

                self.steps += 1;
                debug!(step = self.steps, turns = self.transcript.len(), "agent step");
                match agent
                    .model
                    .step(AGENT_SYSTEM_PROMPT, &self.transcript, agent.tools.specs())
                    .await
                {
                    Ok(events) => self.step = Some(events),
                    Err(error) => {
                        self.finished = true;
                        return Some(Err(error));
                    }
                }
                continue;
            }

            let Some(step) = self.step.as_mut() else {
                continue;
            };
            match step.next().await {
                Some(Ok(event)) => {
                    match &event {
                        StreamEvent::TextDelta(text) => self.text.push_str(text),
                        StreamEvent::ToolCall(call) => self.calls.push(call.clone()),
                        StreamEvent::ToolResult(_) => {}
                    }
                    return Some(Ok(event));
                }
                Some(Err(error)) => {
                    self.finished = true;
                    return Some(Err(error));
                }
                None => {
                    self.step = None;
                    self.complete_step().await;
                }
            }
        }
    }

    /// Records the finished model turn and runs the tools it asked for.
    async fn complete_step(&mut self) {
        let text = std::mem::take(&mut self.text);
        let calls = std::mem::take(&mut self.calls);
        if calls.is_empty() {
            info!(steps = self.steps, "agent answered");
            self.finished = true;
            return;
        }

        let tools = &self.agent.tools;
        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            debug!(tool = %call.name, args = %call.args, "invoking tool");
            let result = tools.invoke(call).await;
            self.pending.push_back(StreamEvent::ToolResult(result.clone()));
            results.push(result);
        }

        self.transcript.push(AgentTurn::Model { text, calls });
        self.transcript.push(AgentTurn::ToolResults(results));
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum NdjsonLine<'a> {
    Thought { content: String },
    Answer { content: &'a str },
    Error { message: String },
}

/// One newline-terminated JSON line for an agent event.
pub fn render_event_ndjson(event: &Result<StreamEvent, ProviderError>) -> Result<String, serde_json::Error> {
    let line = match event {
        Ok(StreamEvent::ToolCall(call)) => NdjsonLine::Thought {
            content: format!("**Action**: Calling `{}`\nInput: `{}`", call.name, call.args),
        },
        Ok(StreamEvent::ToolResult(result)) => NdjsonLine::Thought {
            content: format!("**Observation**: Received result from `{}`.", result.name),
        },
        Ok(StreamEvent::TextDelta(text)) => NdjsonLine::Answer { content: text },
        Err(error) if error.kind() == ErrorKind::Configuration => NdjsonLine::Error {
            message: NOT_CONFIGURED_MESSAGE.to_string(),
        },
        Err(error) => NdjsonLine::Error {
            message: error.to_string(),
        },
    };

    let mut rendered = serde_json::to_string(&line)?;
    rendered.push('\n');
    Ok(rendered)
}

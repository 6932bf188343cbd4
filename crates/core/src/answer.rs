//! Answer synthesis: context block, RAG prompt and the single-shot / streaming answer paths.

use crate::config::RagConfig;
use crate::error::{ErrorKind, ProviderError};
use crate::generation::Generator;
use crate::models::{AskRequest, ChatMessage, ContextBlockEntry, SearchResult};
use crate::retrieval::{recent, render_history, QueryContextualizer, Retriever};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

pub const NOT_CONFIGURED_MESSAGE: &str = "Error: Google API Key not configured.";

pub fn not_found_message(service: &str) -> String {
    format!("I couldn't find any relevant information in the {service} knowledge base.")
}

/// The answer-channel text for a failed generation.
pub fn generation_error_message(error: &ProviderError) -> String {
    match error.kind() {
        ErrorKind::Configuration => NOT_CONFIGURED_MESSAGE.to_string(),
        _ => format!("Error generating answer: {error}"),
    }
}

/// Ranked results as 1-based context entries.
pub fn context_entries(results: &[SearchResult]) -> Vec<ContextBlockEntry> {
    results
        .iter()
        .enumerate()
        .map(|(position, result)| ContextBlockEntry {
            index: position + 1,
            source_url: result.source_url.clone(),
            context_path: result.context_path.clone(),
            body_text: result.body_text.clone(),
        })
        .collect()
}

pub fn render_context_block(entries: &[ContextBlockEntry]) -> String {
    let mut block = String::new();
    for entry in entries {
        let _ = write!(
            block,
            "Source {} ({} - {}):\n{}\n\n",
            entry.index, entry.source_url, entry.context_path, entry.body_text
        );
    }
    block
}

pub fn build_rag_prompt(
    service: &str,
    entries: &[ContextBlockEntry],
    question: &str,
    history: &[ChatMessage],
) -> String {
    let history_section = if history.is_empty() {
        String::new()
    } else {
        format!("Chat History:\n{}\n", render_history(history))
    };

    format!(
        "You are a helpful assistant for AWS {service} documentation. Use the following context to answer the user's question.\n\
         If the answer is not in the context, say you don't know.\n\
         Always cite the source URL when providing information.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         {history_section}\n\
         Question: {question}\n\
         \n\
         Answer:",
        context = render_context_block(entries),
    )
}

enum Prepared {
    Prompt(String),
    /// Final text that replaces generation entirely.
    Reply(String),
}

pub struct AnswerService {
    retriever: Arc<Retriever>,
    contextualizer: QueryContextualizer,
    generator: Arc<dyn Generator>,
    prompt_history_messages: usize,
}

impl AnswerService {
    pub fn new(retriever: Arc<Retriever>, generator: Arc<dyn Generator>, config: &RagConfig) -> Self {
        Self {
            retriever,
            contextualizer: QueryContextualizer::new(generator.clone(), config),
            generator,
            prompt_history_messages: config.prompt_history_messages,
        }
    }

    async fn prepare(&self, request: &AskRequest, search_query: &str) -> Prepared {
        let filters = (!request.context_filters.is_empty()).then_some(request.context_filters.as_slice());
        let results = match self
            .retriever
            .retrieve(&request.service_name, search_query, filters)
            .await
        {
            Ok(results) => results,
            Err(error) => return Prepared::Reply(generation_error_message(&error)),
        };

        if results.is_empty() {
            info!(service = %request.service_name, "no documents retrieved");
            return Prepared::Reply(not_found_message(&request.service_name));
        }

        let entries = context_entries(&results);
        let history = recent(&request.history, self.prompt_history_messages);
        let prompt = build_rag_prompt(&request.service_name, &entries, &request.question, history);
        debug!(service = %request.service_name, sources = entries.len(), prompt_chars = prompt.len(), "rag prompt built");
        Prepared::Prompt(prompt)
    }

    /// Full answer text. Retrieval uses the question as asked.
    pub async fn ask(&self, request: &AskRequest) -> String {
        match self.prepare(request, &request.question).await {
            Prepared::Reply(message) => message,
            Prepared::Prompt(prompt) => match self.generator.generate(&prompt).await {
                Ok(answer) => answer,
                Err(error) => generation_error_message(&error),
            },
        }
    }

    /// Answer fragments in arrival order. With history present the search query is
    /// contextualized first. Nothing runs until the stream is polled, and a failure is
    /// the last fragment produced.
    pub fn ask_stream<'a>(&'a self, request: &'a AskRequest) -> BoxStream<'a, String> {
        let opening = async move {
            let search_query = self
                .contextualizer
                .contextualize(&request.question, &request.history)
                .await;

            match self.prepare(request, &search_query).await {
                Prepared::Reply(message) => stream::once(future::ready(message)).boxed(),
                Prepared::Prompt(prompt) => match self.generator.generate_stream(&prompt).await {
                    Ok(fragments) => fragments
                        .scan(false, |failed, fragment| {
                            if *failed {
                                return future::ready(None);
                            }
                            let text = fragment.unwrap_or_else(|error| {
                                *failed = true;
                                generation_error_message(&error)
                            });
                            future::ready(Some(text))
                        })
                        .boxed(),
                    Err(error) => stream::once(future::ready(generation_error_message(&error))).boxed(),
                },
            }
        };

        stream::once(opening).flatten().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::generation::TextStream;
    use crate::models::{ChunkPayload, IndexEntry, PartitionName};
    use crate::stores::InMemoryVectorStore;
    use crate::traits::VectorIndex;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const REWRITE_MARKER: &str = "Standalone Question:";

    struct ScriptedGenerator {
        fragments: Vec<&'static str>,
        stream_error: Option<&'static str>,
        rewrite: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                stream_error: None,
                rewrite: "",
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
        }

        fn record(&self, prompt: &str) {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            self.record(prompt);
            if prompt.contains(REWRITE_MARKER) {
                return Ok(self.rewrite.to_string());
            }
            Ok(self.fragments.concat())
        }

        async fn generate_stream(&self, prompt: &str) -> Result<TextStream, ProviderError> {
            self.record(prompt);
            let mut items = self
                .fragments
                .iter()
                .map(|fragment| Ok(fragment.to_string()))
                .collect::<Vec<_>>();
            if let Some(error) = self.stream_error {
                items.push(Err(ProviderError::Stream(error.to_string())));
                items.push(Ok("never delivered".to_string()));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    struct Unconfigured;

    #[async_trait]
    impl Generator for Unconfigured {
        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            Err(ProviderError::Configuration("GOOGLE_API_KEY".to_string()))
        }

        async fn generate_stream(&self, _prompt: &str) -> Result<TextStream, ProviderError> {
            Err(ProviderError::Configuration("GOOGLE_API_KEY".to_string()))
        }
    }

    async fn retriever() -> Arc<Retriever> {
        let embedder = CharacterNgramEmbedder::default();
        let store = Arc::new(InMemoryVectorStore::new());
        let docs = [
            ("Server access logging records requests to a bucket.", "Features > Logging"),
            ("Versioning keeps every variant of an object.", "Features > Versioning"),
        ];
        let entries = docs
            .iter()
            .enumerate()
            .map(|(i, (text, context))| {
                IndexEntry::new(
                    embedder.embed_sync(text),
                    ChunkPayload {
                        source_url: format!("https://docs.aws.amazon.com/AmazonS3/page{i}.html"),
                        context_path: context.to_string(),
                        body_text: text.to_string(),
                        service: "AmazonS3".to_string(),
                    },
                )
            })
            .collect();
        store
            .create_or_replace(&PartitionName::new("AmazonS3").expect("name"), entries)
            .await
            .expect("seeded");

        Arc::new(Retriever::new(Arc::new(embedder), store, &RagConfig::default()))
    }

    fn request(question: &str) -> AskRequest {
        AskRequest {
            service_name: "AmazonS3".to_string(),
            question: question.to_string(),
            ..AskRequest::default()
        }
    }

    #[test]
    fn context_block_lists_sources_in_rank_order() {
        let results = vec![
            SearchResult {
                body_text: "first body".to_string(),
                context_path: "A > B".to_string(),
                source_url: "https://a".to_string(),
                score: 0.9,
            },
            SearchResult {
                body_text: "second body".to_string(),
                context_path: String::new(),
                source_url: "https://b".to_string(),
                score: 0.5,
            },
        ];
        let entries = context_entries(&results);
        assert_eq!(entries[1].index, 2);
        assert_eq!(
            render_context_block(&entries),
            "Source 1 (https://a - A > B):\nfirst body\n\nSource 2 (https://b - ):\nsecond body\n\n"
        );
    }

    #[test]
    fn prompt_includes_history_only_when_present() {
        let entries = vec![ContextBlockEntry {
            index: 1,
            source_url: "https://a".to_string(),
            context_path: "Features".to_string(),
            body_text: "body".to_string(),
        }];

        let bare = build_rag_prompt("AmazonS3", &entries, "What?", &[]);
        assert!(bare.starts_with("You are a helpful assistant for AWS AmazonS3 documentation."));
        assert!(!bare.contains("Chat History:"));
        assert!(bare.ends_with("Question: What?\n\nAnswer:"));

        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let with_history = build_rag_prompt("AmazonS3", &entries, "What?", &history);
        assert!(with_history.contains("Chat History:\nuser: hi\nassistant: hello\n"));
        assert!(with_history.contains("Source 1 (https://a - Features):\nbody"));
    }

    #[tokio::test]
    async fn streamed_fragments_concatenate_to_single_shot_answer() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["Enable ", "server access ", "logging."]));
        let service = AnswerService::new(retriever().await, generator, &RagConfig::default());
        let request = request("How do I turn on bucket logging?");

        let full = service.ask(&request).await;
        let streamed = service.ask_stream(&request).collect::<Vec<_>>().await;
        assert_eq!(streamed.len(), 3);
        assert_eq!(streamed.concat(), full);
    }

    #[tokio::test]
    async fn nothing_retrieved_skips_generation() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["unused"]));
        let service = AnswerService::new(retriever().await, generator.clone(), &RagConfig::default());
        let mut request = request("How do I turn on bucket logging?");
        request.context_filters = vec!["No Such Section".to_string()];

        let expected = "I couldn't find any relevant information in the AmazonS3 knowledge base.";
        assert_eq!(service.ask(&request).await, expected);
        assert_eq!(service.ask_stream(&request).collect::<Vec<_>>().await, vec![expected]);
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn stream_stops_after_inline_error() {
        let mut generator = ScriptedGenerator::new(vec!["Partial "]);
        generator.stream_error = Some("connection reset");
        let service = AnswerService::new(retriever().await, Arc::new(generator), &RagConfig::default());

        let fragments = service
            .ask_stream(&request("bucket logging"))
            .collect::<Vec<_>>()
            .await;
        assert_eq!(
            fragments,
            vec![
                "Partial ".to_string(),
                "Error generating answer: stream error: connection reset".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn missing_credential_is_reported_in_the_answer() {
        let service = AnswerService::new(retriever().await, Arc::new(Unconfigured), &RagConfig::default());
        let request = request("bucket logging");

        assert_eq!(service.ask(&request).await, NOT_CONFIGURED_MESSAGE);
        assert_eq!(
            service.ask_stream(&request).collect::<Vec<_>>().await,
            vec![NOT_CONFIGURED_MESSAGE.to_string()]
        );
    }

    #[tokio::test]
    async fn streaming_with_history_searches_with_rewritten_query() {
        let mut generator = ScriptedGenerator::new(vec!["Versioning answer"]);
        generator.rewrite = "How does object versioning work?";
        let generator = Arc::new(generator);
        let service = AnswerService::new(retriever().await, generator.clone(), &RagConfig::default());

        let mut request = request("And how does that work?");
        request.history = vec![
            ChatMessage::user("Tell me about S3 versioning"),
            ChatMessage::assistant("Versioning keeps object variants."),
        ];
        let _ = service.ask_stream(&request).collect::<Vec<_>>().await;

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains(REWRITE_MARKER));
        let rag_prompt = &prompts[1];
        assert!(rag_prompt.contains("Question: And how does that work?"));
        assert!(rag_prompt.contains("Chat History:\nuser: Tell me about S3 versioning\n"));
        assert!(rag_prompt.contains("page1.html - Features > Versioning):\nVersioning keeps"));
    }
}

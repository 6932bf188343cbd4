//! Query side: contextualize, embed, search and deduplicate.

use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::error::{ErrorKind, ProviderError};
use crate::generation::Generator;
use crate::models::{ChatMessage, PartitionName, SearchResult};
use crate::traits::VectorIndex;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Drops results whose body repeats an earlier one. First occurrence wins.
pub fn dedupe_by_body(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::with_capacity(results.len());
    results
        .into_iter()
        .filter(|result| seen.insert(result.body_text.clone()))
        .collect()
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, config: &RagConfig) -> Self {
        Self {
            embedder,
            index,
            top_k: config.top_k,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Top matches for `query` in `service`, without duplicate bodies.
    ///
    /// Transient embedding or search failures read as "nothing found". Only a missing
    /// credential is returned as an error.
    pub async fn retrieve(
        &self,
        service: &str,
        query: &str,
        context_filters: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let partition = match PartitionName::new(service) {
            Ok(partition) => partition,
            Err(error) => {
                warn!(service, error = %error, "invalid partition name");
                return Ok(Vec::new());
            }
        };

        let query_vector = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(error) if error.kind() == ErrorKind::Configuration => return Err(error),
            Err(error) => {
                warn!(partition = %partition, error = %error, "query embedding failed");
                return Ok(Vec::new());
            }
        };

        let results = match self
            .index
            .search(&partition, &query_vector, self.top_k, context_filters)
            .await
        {
            Ok(results) => results,
            Err(error) => {
                warn!(partition = %partition, error = %error, "vector search failed");
                return Ok(Vec::new());
            }
        };

        let results = dedupe_by_body(results);
        debug!(partition = %partition, query, hits = results.len(), "retrieved documents");
        Ok(results)
    }
}

/// Renders `role: content` lines for the given messages.
pub fn render_history(messages: &[ChatMessage]) -> String {
    let mut rendered = String::new();
    for message in messages {
        let _ = writeln!(rendered, "{}: {}", message.role.as_str(), message.content);
    }
    rendered
}

/// The last `window` messages of `history`.
pub fn recent(history: &[ChatMessage], window: usize) -> &[ChatMessage] {
    &history[history.len().saturating_sub(window)..]
}

pub fn build_rewrite_prompt(question: &str, history: &[ChatMessage]) -> String {
    format!(
        "Given the following conversation and a follow-up question, rephrase the follow-up question to be a standalone question.\n\
         Chat History:\n{}\n\
         Follow Up Input: {question}\n\
         Standalone Question:",
        render_history(history)
    )
}

/// Rewrites follow-up questions into standalone ones using recent history.
pub struct QueryContextualizer {
    generator: Arc<dyn Generator>,
    window: usize,
}

impl QueryContextualizer {
    pub fn new(generator: Arc<dyn Generator>, config: &RagConfig) -> Self {
        Self {
            generator,
            window: config.rewrite_history_messages,
        }
    }

    /// Never fails: any problem falls back to `question` unchanged.
    pub async fn contextualize(&self, question: &str, history: &[ChatMessage]) -> String {
        if history.is_empty() {
            return question.to_string();
        }

        let prompt = build_rewrite_prompt(question, recent(history, self.window));
        match self.generator.generate(&prompt).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                let rewritten = rewritten.trim().to_string();
                debug!(original = question, rewritten = %rewritten, "query contextualized");
                rewritten
            }
            Ok(_) => question.to_string(),
            Err(error) => {
                warn!(error = %error, "query rewrite failed, using original question");
                question.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::StoreError;
    use crate::generation::TextStream;
    use crate::models::{ChunkPayload, IndexEntry};
    use crate::stores::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    fn payload(text: &str, context: &str) -> ChunkPayload {
        ChunkPayload {
            source_url: format!("https://docs.aws.amazon.com/AmazonS3/{}", text.len()),
            context_path: context.to_string(),
            body_text: text.to_string(),
            service: "AmazonS3".to_string(),
        }
    }

    async fn seeded_store(texts: &[(&str, &str)]) -> Arc<InMemoryVectorStore> {
        let embedder = CharacterNgramEmbedder::default();
        let store = Arc::new(InMemoryVectorStore::new());
        let entries = texts
            .iter()
            .map(|(text, context)| IndexEntry::new(embedder.embed_sync(text), payload(text, context)))
            .collect();
        store
            .create_or_replace(&PartitionName::new("AmazonS3").expect("name"), entries)
            .await
            .expect("seeded");
        store
    }

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let make = |text: &str, score: f64| SearchResult {
            body_text: text.to_string(),
            context_path: String::new(),
            source_url: String::new(),
            score,
        };
        let deduped = dedupe_by_body(vec![make("a", 0.9), make("b", 0.8), make("a", 0.7), make("c", 0.6)]);
        let bodies = deduped.iter().map(|r| r.body_text.as_str()).collect::<Vec<_>>();
        assert_eq!(bodies, vec!["a", "b", "c"]);
        assert_eq!(deduped[0].score, 0.9);
    }

    #[tokio::test]
    async fn retrieve_never_returns_duplicate_bodies() {
        let store = seeded_store(&[
            ("Enable bucket logging in the console.", "Features"),
            ("Enable bucket logging in the console.", "Logging"),
            ("Versioning keeps object history.", "Versioning"),
        ])
        .await;
        let retriever = Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            store,
            &RagConfig::default(),
        );

        let results = retriever
            .retrieve("AmazonS3", "bucket logging", None)
            .await
            .expect("retrieve");
        let unique = results.iter().map(|r| &r.body_text).collect::<BTreeSet<_>>();
        assert_eq!(unique.len(), results.len());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].body_text, "Enable bucket logging in the console.");
    }

    #[tokio::test]
    async fn context_filters_restrict_to_exact_paths() {
        let store = seeded_store(&[
            ("Bucket logging delivers access logs.", "Features"),
            ("Bucket logging pricing.", "Features > Pricing"),
            ("Bucket logging is a feature.", "Overview"),
        ])
        .await;
        let retriever = Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            store,
            &RagConfig::default(),
        )
        .with_top_k(3);

        let filters = vec!["Features".to_string()];
        let results = retriever
            .retrieve("AmazonS3", "bucket logging", Some(&filters))
            .await
            .expect("retrieve");
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.context_path == "Features"));
    }

    #[tokio::test]
    async fn absent_partition_yields_nothing() {
        let retriever = Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
            &RagConfig::default(),
        );
        let results = retriever.retrieve("lambda", "handler", None).await.expect("retrieve");
        assert!(results.is_empty());
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn create_or_replace(&self, _: &PartitionName, _: Vec<IndexEntry>) -> Result<usize, StoreError> {
            Err(StoreError::Validation("read only".to_string()))
        }
        async fn exists(&self, _: &PartitionName) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn delete(&self, _: &PartitionName) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn list_partitions(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        async fn scroll_distinct_contexts(&self, _: &PartitionName) -> Result<BTreeSet<String>, StoreError> {
            Ok(BTreeSet::new())
        }
        async fn search(
            &self,
            _: &PartitionName,
            _: &[f32],
            _: usize,
            _: Option<&[String]>,
        ) -> Result<Vec<SearchResult>, StoreError> {
            Err(StoreError::BackendResponse {
                backend: "broken".to_string(),
                details: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn search_failure_degrades_to_empty() {
        let retriever = Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(BrokenIndex),
            &RagConfig::default(),
        );
        let results = retriever.retrieve("AmazonS3", "anything", None).await.expect("degrades");
        assert!(results.is_empty());
    }

    /// Records prompts and answers from a fixed script.
    struct ScriptedGenerator {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            self.reply.clone().map_err(ProviderError::Stream)
        }

        async fn generate_stream(&self, _prompt: &str) -> Result<TextStream, ProviderError> {
            Err(ProviderError::Stream("not scripted".to_string()))
        }
    }

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("second"),
            ChatMessage::user("What is S3 versioning?"),
            ChatMessage::assistant("It keeps object history."),
        ]
    }

    #[tokio::test]
    async fn rewrite_uses_last_three_messages() {
        let generator = Arc::new(ScriptedGenerator {
            reply: Ok("  How do I enable S3 versioning?\n".to_string()),
            prompts: Mutex::new(Vec::new()),
        });
        let contextualizer = QueryContextualizer::new(generator.clone(), &RagConfig::default());

        let rewritten = contextualizer.contextualize("How do I enable it?", &history()).await;
        assert_eq!(rewritten, "How do I enable S3 versioning?");

        let prompts = generator.prompts.lock().expect("lock").clone();
        assert_eq!(prompts.len(), 1);
        assert!(!prompts[0].contains("user: first"));
        assert!(prompts[0].contains("assistant: second\nuser: What is S3 versioning?"));
        assert!(prompts[0].ends_with("Follow Up Input: How do I enable it?\nStandalone Question:"));
    }

    #[tokio::test]
    async fn rewrite_failure_falls_back_to_question() {
        let generator = Arc::new(ScriptedGenerator {
            reply: Err("quota".to_string()),
            prompts: Mutex::new(Vec::new()),
        });
        let contextualizer = QueryContextualizer::new(generator, &RagConfig::default());
        assert_eq!(
            contextualizer.contextualize("How do I enable it?", &history()).await,
            "How do I enable it?"
        );
    }

    #[tokio::test]
    async fn no_history_skips_the_rewrite() {
        let generator = Arc::new(ScriptedGenerator {
            reply: Ok("unused".to_string()),
            prompts: Mutex::new(Vec::new()),
        });
        let contextualizer = QueryContextualizer::new(generator.clone(), &RagConfig::default());
        assert_eq!(contextualizer.contextualize("q", &[]).await, "q");
        assert!(generator.prompts.lock().expect("lock").is_empty());
    }
}

//! Explicit configuration handed to component constructors at process start.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_EMBEDDING_CHARS: usize = 2_000;
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 100;
pub const DEFAULT_SCROLL_PAGE_SIZE: usize = 100;
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
pub const DEFAULT_SITEMAP_INDEX_URL: &str = "https://docs.aws.amazon.com/sitemap_index.xml";

/// Tunables of the indexing and query pipelines.
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub top_k: usize,
    /// History messages fed to the standalone-query rewrite.
    pub rewrite_history_messages: usize,
    /// History messages rendered into the answer prompt.
    pub prompt_history_messages: usize,
    pub max_embedding_chars: usize,
    /// Concurrent embedding calls per partition build. `1` keeps them sequential.
    pub embed_concurrency: usize,
    pub max_agent_steps: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            rewrite_history_messages: 3,
            prompt_history_messages: 10,
            max_embedding_chars: DEFAULT_MAX_EMBEDDING_CHARS,
            embed_concurrency: 1,
            max_agent_steps: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub rag_model: String,
    pub agent_model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            embedding_model: "text-embedding-004".to_string(),
            rag_model: "gemini-2.0-flash".to_string(),
            agent_model: "gemini-2.0-flash".to_string(),
            temperature: 0.0,
            max_output_tokens: 8_192,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub upsert_batch_size: usize,
    pub scroll_page_size: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_QDRANT_URL.to_string(),
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            scroll_page_size: DEFAULT_SCROLL_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub raw_data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            raw_data_dir: PathBuf::from("data").join("raw"),
        }
    }
}

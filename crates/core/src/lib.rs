pub mod agent;
pub mod answer;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod providers;
pub mod retrieval;
pub mod sitemap;
pub mod source;
pub mod store;
pub mod stores;
pub mod traits;

pub use agent::{render_event_ndjson, DocTools, DocumentationAgent};
pub use answer::{build_rag_prompt, context_entries, not_found_message, AnswerService};
pub use chunking::{build_embedding_text, ChunkingConfig, HierarchicalChunker};
pub use config::{GeminiConfig, QdrantConfig, RagConfig, StorageConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ErrorKind, IngestError, ProviderError, StoreError};
pub use generation::{AgentModel, Generator, StreamEvent, ToolCall, ToolResult};
pub use ingest::{delete_service, IndexBuilder, IndexSummary};
pub use models::{
    AskRequest, BuildIndexRequest, BuildReport, BuildStatus, ChatMessage, Chunk, DeleteReport,
    Document, HeaderContext, PartitionName, Role, SearchResult,
};
pub use providers::GeminiClient;
pub use retrieval::{QueryContextualizer, Retriever};
pub use sitemap::{SitemapClient, SitemapParser};
pub use source::RawSourceStore;
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use traits::{DocumentSource, VectorIndex};

//! Indexing pipeline: raw source -> hierarchical chunks -> embeddings -> partition rebuild.

use crate::chunking::{ChunkingConfig, HierarchicalChunker};
use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::error::{ErrorKind, IngestError, ProviderError};
use crate::models::{
    BuildIndexRequest, BuildReport, BuildStatus, Chunk, ChunkPayload, DeleteReport, IndexEntry,
    PartitionName,
};
use crate::source::RawSourceStore;
use crate::traits::{DocumentSource, VectorIndex};
use chrono::Utc;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub partition: PartitionName,
    pub documents_indexed: usize,
    pub chunks_skipped: usize,
}

pub struct IndexBuilder {
    source: Arc<dyn DocumentSource>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: HierarchicalChunker,
    embed_concurrency: usize,
}

impl IndexBuilder {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: &RagConfig,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            source,
            embedder,
            index,
            chunker: HierarchicalChunker::new(ChunkingConfig::from(config))?,
            embed_concurrency: config.embed_concurrency.max(1),
        })
    }

    /// Rebuilds the partition for `service` from its raw source, replacing all prior contents.
    pub async fn build_index(&self, service: &str) -> Result<IndexSummary, IngestError> {
        let partition = PartitionName::new(service)?;
        let documents = self
            .source
            .load(service)
            .await?
            .ok_or_else(|| IngestError::NotFound(service.to_string()))?;

        let chunks = documents
            .iter()
            .flat_map(|document| self.chunker.chunk_document(document))
            .collect::<Vec<_>>();
        if chunks.is_empty() {
            return Err(IngestError::EmptyResult(partition.to_string()));
        }

        let attempted = chunks.len();
        info!(
            partition = %partition,
            pages = documents.len(),
            chunks = attempted,
            embedder = self.embedder.name(),
            "embedding chunks"
        );

        let entries = self.embed_chunks(&partition, chunks).await?;
        if entries.is_empty() {
            return Err(IngestError::EmbeddingFailure {
                partition: partition.to_string(),
                attempted,
            });
        }

        let chunks_skipped = attempted - entries.len();
        let documents_indexed = self.index.create_or_replace(&partition, entries).await?;
        info!(partition = %partition, documents_indexed, chunks_skipped, "partition rebuilt");

        Ok(IndexSummary {
            partition,
            documents_indexed,
            chunks_skipped,
        })
    }

    /// Chunks that fail to embed are dropped; a missing credential aborts the build.
    async fn embed_chunks(
        &self,
        partition: &PartitionName,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<IndexEntry>, ProviderError> {
        let service = partition.as_str();

        stream::iter(chunks)
            .map(|chunk| async move {
                match self.embedder.embed(&chunk.embedding_text).await {
                    Ok(vector) => Ok(Some(IndexEntry::new(
                        vector,
                        ChunkPayload {
                            source_url: chunk.source_url,
                            context_path: chunk.context.path(),
                            body_text: chunk.body_text,
                            service: service.to_string(),
                        },
                    ))),
                    Err(error) if error.kind() == ErrorKind::Configuration => Err(error),
                    Err(error) => {
                        warn!(
                            partition = service,
                            url = %chunk.source_url,
                            context = %chunk.context,
                            error = %error,
                            "chunk embedding failed, skipping"
                        );
                        Ok(None)
                    }
                }
            })
            .buffer_unordered(self.embed_concurrency)
            .try_filter_map(|entry| future::ready(Ok(entry)))
            .try_collect()
            .await
    }

    /// Same as [`IndexBuilder::build_index`], with failures folded into the report.
    pub async fn build_report(&self, request: &BuildIndexRequest) -> BuildReport {
        match self.build_index(&request.partition).await {
            Ok(summary) => BuildReport {
                partition: summary.partition.to_string(),
                status: BuildStatus::Success,
                documents_indexed: Some(summary.documents_indexed),
                chunks_skipped: summary.chunks_skipped,
                error_message: None,
                finished_at: Utc::now(),
            },
            Err(error) => {
                warn!(partition = %request.partition, kind = ?error.kind(), error = %error, "index build failed");
                BuildReport {
                    partition: request.partition.clone(),
                    status: BuildStatus::Error,
                    documents_indexed: None,
                    chunks_skipped: 0,
                    error_message: Some(error.to_string()),
                    finished_at: Utc::now(),
                }
            }
        }
    }
}

/// Deletes the vector partition and the raw source of `service`. A failing step is
/// reported and does not stop the other one.
pub async fn delete_service(
    index: &dyn VectorIndex,
    raw_sources: &RawSourceStore,
    service: &str,
) -> DeleteReport {
    let mut report = DeleteReport {
        service: service.to_string(),
        ..DeleteReport::default()
    };

    match PartitionName::new(service) {
        Ok(partition) => match index.delete(&partition).await {
            Ok(true) => report
                .actions
                .push(format!("deleted vector partition {partition}")),
            Ok(false) => report
                .actions
                .push(format!("vector partition {partition} not present")),
            Err(error) => report
                .errors
                .push(format!("vector partition {partition}: {error}")),
        },
        Err(error) => report.errors.push(format!("vector partition: {error}")),
    }

    match raw_sources.remove(service).await {
        Ok(Some(path)) => report
            .actions
            .push(format!("removed raw source {}", path.display())),
        Ok(None) => report.actions.push("no raw source present".to_string()),
        Err(error) => report.errors.push(format!("raw source: {error}")),
    }

    debug!(service, actions = ?report.actions, errors = ?report.errors, "service deleted");
    report
}

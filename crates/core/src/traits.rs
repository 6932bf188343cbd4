use crate::error::{IngestError, StoreError};
use crate::models::{Document, IndexEntry, PartitionName, SearchResult};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Per-partition store of embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replaces the partition with `entries`. Readers see the old contents or the new ones, never a mix.
    async fn create_or_replace(
        &self,
        partition: &PartitionName,
        entries: Vec<IndexEntry>,
    ) -> Result<usize, StoreError>;

    async fn exists(&self, partition: &PartitionName) -> Result<bool, StoreError>;

    /// Returns whether anything was removed. Deleting an absent partition is not an error.
    async fn delete(&self, partition: &PartitionName) -> Result<bool, StoreError>;

    async fn list_partitions(&self) -> Result<Vec<String>, StoreError>;

    /// Distinct context paths across the partition. Empty when the partition is absent.
    async fn scroll_distinct_contexts(
        &self,
        partition: &PartitionName,
    ) -> Result<BTreeSet<String>, StoreError>;

    /// At most `k` results by descending score; `context_filters` match whole context paths.
    async fn search(
        &self,
        partition: &PartitionName,
        query_vector: &[f32],
        k: usize,
        context_filters: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, StoreError>;
}

/// Supplies the fetched pages of one documentation source.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// `Ok(None)` when nothing was ever fetched for `service`.
    async fn load(&self, service: &str) -> Result<Option<Vec<Document>>, IngestError>;
}

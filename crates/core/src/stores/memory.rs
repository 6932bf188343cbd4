//! Process-local [`VectorIndex`] with brute-force cosine search.

use crate::error::StoreError;
use crate::models::{IndexEntry, PartitionName, SearchResult};
use crate::store::{active_filters, cosine_similarity, validate_entries};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

struct Partition {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore").finish_non_exhaustive()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::BackendResponse {
        backend: "memory".to_string(),
        details: "partition lock poisoned".to_string(),
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorStore {
    async fn create_or_replace(
        &self,
        partition: &PartitionName,
        entries: Vec<IndexEntry>,
    ) -> Result<usize, StoreError> {
        let dimension = validate_entries(&entries)?;
        let count = entries.len();
        // Fully built before it is swapped in under the write lock.
        let staged = Partition { dimension, entries };

        self.partitions
            .write()
            .map_err(poisoned)?
            .insert(partition.as_str().to_string(), staged);
        Ok(count)
    }

    async fn exists(&self, partition: &PartitionName) -> Result<bool, StoreError> {
        Ok(self
            .partitions
            .read()
            .map_err(poisoned)?
            .contains_key(partition.as_str()))
    }

    async fn delete(&self, partition: &PartitionName) -> Result<bool, StoreError> {
        Ok(self
            .partitions
            .write()
            .map_err(poisoned)?
            .remove(partition.as_str())
            .is_some())
    }

    async fn list_partitions(&self) -> Result<Vec<String>, StoreError> {
        let mut names = self
            .partitions
            .read()
            .map_err(poisoned)?
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort_unstable();
        Ok(names)
    }

    async fn scroll_distinct_contexts(
        &self,
        partition: &PartitionName,
    ) -> Result<BTreeSet<String>, StoreError> {
        let partitions = self.partitions.read().map_err(poisoned)?;
        Ok(partitions
            .get(partition.as_str())
            .map(|stored| {
                stored
                    .entries
                    .iter()
                    .map(|entry| entry.payload.context_path.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn search(
        &self,
        partition: &PartitionName,
        query_vector: &[f32],
        k: usize,
        context_filters: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let partitions = self.partitions.read().map_err(poisoned)?;
        let Some(stored) = partitions.get(partition.as_str()) else {
            return Ok(Vec::new());
        };

        if query_vector.len() != stored.dimension {
            return Err(StoreError::Validation(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                stored.dimension
            )));
        }

        let allowed = active_filters(context_filters)
            .map(|filters| filters.iter().map(String::as_str).collect::<HashSet<_>>());

        let mut scored = stored
            .entries
            .iter()
            .filter(|entry| {
                allowed
                    .as_ref()
                    .map_or(true, |set| set.contains(entry.payload.context_path.as_str()))
            })
            .map(|entry| {
                let score = f64::from(cosine_similarity(query_vector, &entry.vector));
                (score, entry)
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.0.total_cmp(&left.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| SearchResult::from_payload(entry.payload.clone(), score))
            .collect())
    }
}

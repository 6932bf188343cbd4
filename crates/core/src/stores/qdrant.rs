use crate::config::QdrantConfig;
use crate::error::StoreError;
use crate::models::{ChunkPayload, IndexEntry, PartitionName, SearchResult};
use crate::store::{active_filters, validate_entries};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Marks the backing collections that partitions (Qdrant aliases) point to.
const GENERATION_MARKER: &str = "__gen_";

/// Qdrant over its REST API. A partition is an alias; every rebuild fills a fresh collection
/// and swaps the alias onto it in one request.
///
/// Alias changes made through one store are serialized, so concurrent rebuilds of a partition
/// each drop the generation they replaced. Separate processes rebuilding the same partition
/// are not coordinated.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
    batch_size: usize,
    scroll_page_size: usize,
    alias_lock: Mutex<()>,
}

impl QdrantStore {
    pub fn new(config: &QdrantConfig) -> Result<Self, StoreError> {
        let parsed = Url::parse(&config.url)?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            client: Client::new(),
            batch_size: config.upsert_batch_size.max(1),
            scroll_page_size: config.scroll_page_size.max(1),
            alias_lock: Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .aliases()
            .await?
            .into_iter()
            .find(|(name, _)| name == alias)
            .map(|(_, collection)| collection))
    }

    async fn aliases(&self) -> Result<Vec<(String, String)>, StoreError> {
        let response = self.client.get(self.url("/aliases")).send().await?;
        let parsed: Value = expect_success(response, "list aliases").await?.json().await?;

        Ok(parsed
            .pointer("/result/aliases")
            .and_then(Value::as_array)
            .map(|aliases| {
                aliases
                    .iter()
                    .filter_map(|alias| {
                        let name = alias.pointer("/alias_name").and_then(Value::as_str)?;
                        let collection = alias.pointer("/collection_name").and_then(Value::as_str)?;
                        Some((name.to_string(), collection.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.url(&format!("/collections/{name}")))
            .json(&json!({
                "vectors": { "size": dimension, "distance": "Cosine" }
            }))
            .send()
            .await?;
        expect_success(response, "create collection").await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.url(&format!("/collections/{name}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response, "delete collection").await?;
        Ok(())
    }

    async fn upsert_all(&self, collection: &str, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let total_batches = entries.len().div_ceil(self.batch_size);
        for (batch_index, batch) in entries.chunks(self.batch_size).enumerate() {
            info!(
                collection,
                batch = batch_index + 1,
                total_batches,
                points = batch.len(),
                "upserting batch"
            );

            let points = batch
                .iter()
                .map(|entry| {
                    Ok(json!({
                        "id": entry.id.to_string(),
                        "vector": entry.vector,
                        "payload": serde_json::to_value(&entry.payload)?,
                    }))
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            let response = self
                .client
                .put(self.url(&format!("/collections/{collection}/points?wait=true")))
                .json(&json!({ "points": points }))
                .send()
                .await?;
            expect_success(response, "upsert points").await?;
        }
        Ok(())
    }

    /// Points `partition` at `generation` and returns the collection it pointed at before.
    async fn swap_alias(
        &self,
        partition: &PartitionName,
        generation: &str,
    ) -> Result<Option<String>, StoreError> {
        let _guard = self.alias_lock.lock().await;
        let previous = self.resolve_alias(partition.as_str()).await?;
        let mut actions = Vec::new();
        if previous.is_some() {
            actions.push(json!({ "delete_alias": { "alias_name": partition.as_str() } }));
        }
        actions.push(json!({
            "create_alias": { "collection_name": generation, "alias_name": partition.as_str() }
        }));
        self.update_aliases(actions).await?;
        Ok(previous)
    }

    async fn update_aliases(&self, actions: Vec<Value>) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.url("/collections/aliases"))
            .json(&json!({ "actions": actions }))
            .send()
            .await?;
        expect_success(response, "update aliases").await?;
        Ok(())
    }
}

async fn expect_success(response: Response, action: &str) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!("{action} failed with {status}: {body}"),
    })
}

fn context_filter(filters: &[String]) -> Value {
    let should = filters
        .iter()
        .map(|context| json!({ "key": "context", "match": { "value": context } }))
        .collect::<Vec<_>>();
    json!({ "should": should })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn create_or_replace(
        &self,
        partition: &PartitionName,
        entries: Vec<IndexEntry>,
    ) -> Result<usize, StoreError> {
        let dimension = validate_entries(&entries)?;
        let generation = format!("{}{}{}", partition, GENERATION_MARKER, Uuid::new_v4().simple());

        self.create_collection(&generation, dimension).await?;
        if let Err(error) = self.upsert_all(&generation, &entries).await {
            warn!(%partition, %generation, %error, "rebuild failed, dropping staged collection");
            if let Err(cleanup) = self.drop_collection(&generation).await {
                warn!(%generation, error = %cleanup, "staged collection left behind");
            }
            return Err(error);
        }

        let previous = match self.swap_alias(partition, &generation).await {
            Ok(previous) => previous,
            Err(error) => {
                warn!(%partition, %generation, %error, "alias swap failed, dropping staged collection");
                if let Err(cleanup) = self.drop_collection(&generation).await {
                    warn!(%generation, error = %cleanup, "staged collection left behind");
                }
                return Err(error);
            }
        };
        info!(%partition, %generation, points = entries.len(), "partition swapped");

        if let Some(previous) = previous {
            if let Err(error) = self.drop_collection(&previous).await {
                warn!(%partition, collection = %previous, %error, "old generation not dropped");
            }
        }

        Ok(entries.len())
    }

    async fn exists(&self, partition: &PartitionName) -> Result<bool, StoreError> {
        Ok(self.resolve_alias(partition.as_str()).await?.is_some())
    }

    async fn delete(&self, partition: &PartitionName) -> Result<bool, StoreError> {
        let _guard = self.alias_lock.lock().await;
        let Some(collection) = self.resolve_alias(partition.as_str()).await? else {
            return Ok(false);
        };

        self.update_aliases(vec![
            json!({ "delete_alias": { "alias_name": partition.as_str() } }),
        ])
        .await?;
        self.drop_collection(&collection).await?;
        info!(%partition, %collection, "partition deleted");
        Ok(true)
    }

    async fn list_partitions(&self) -> Result<Vec<String>, StoreError> {
        let mut names = self
            .aliases()
            .await?
            .into_iter()
            .filter(|(_, collection)| collection.contains(GENERATION_MARKER))
            .map(|(name, _)| name)
            .collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();
        Ok(names)
    }

    async fn scroll_distinct_contexts(
        &self,
        partition: &PartitionName,
    ) -> Result<BTreeSet<String>, StoreError> {
        let mut contexts = BTreeSet::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": self.scroll_page_size,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(offset) = &offset {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.url(&format!("/collections/{partition}/points/scroll")))
                .json(&body)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(contexts);
            }
            let parsed: Value = expect_success(response, "scroll points").await?.json().await?;

            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in &points {
                if let Some(context) = point.pointer("/payload/context").and_then(Value::as_str) {
                    contexts.insert(context.to_string());
                }
            }

            let next = parsed
                .pointer("/result/next_page_offset")
                .filter(|value| !value.is_null())
                .cloned();
            // An empty page or a repeated cursor would otherwise loop forever.
            if points.is_empty() || next.is_none() || next == offset {
                break;
            }
            offset = next;
        }

        debug!(%partition, contexts = contexts.len(), "scrolled contexts");
        Ok(contexts)
    }

    async fn search(
        &self,
        partition: &PartitionName,
        query_vector: &[f32],
        k: usize,
        context_filters: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let mut body = json!({
            "vector": query_vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filters) = active_filters(context_filters) {
            body["filter"] = context_filter(filters);
        }

        let response = self
            .client
            .post(self.url(&format!("/collections/{partition}/points/search")))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let parsed: Value = expect_success(response, "search points").await?.json().await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for mut hit in hits {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let payload = hit.get_mut("payload").map(Value::take).unwrap_or(Value::Null);
            let payload: ChunkPayload = serde_json::from_value(payload)?;
            results.push(SearchResult::from_payload(payload, score));
        }

        results.sort_by(|left, right| right.score.total_cmp(&left.score));
        results.truncate(k);
        Ok(results)
    }
}

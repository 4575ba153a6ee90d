//! In-process vector store backed by [`HnswGraph`] indexes.
//!
//! [`HnswVectorStore`] keeps every collection in memory behind a
//! `tokio::sync::RwLock`. Each collection owns a row table whose keys are the
//! graph node ids, so a search hit maps straight back to its chunk.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::graph::{HnswGraph, HnswParams};
use crate::config::{MetricType, VectorStoreConfig, VectorStoreKind};
use crate::document::{
    Document, DocumentChunk, DocumentChunkWithScore, QueryResult, QueryWithEmbedding,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, VectorDbError};
use crate::filter::DocumentMetadataFilter;
use crate::retrieval::{QueryEngine, RetrievalQuery, check_query};
use crate::vectorstore::{
    ActiveCollection, CollectionHandle, CollectionOptions, CollectionState, VectorStore,
    validate_chunk, validate_collection_name,
};

const BACKEND: &str = "hnsw";

/// Tombstones tolerated before a collection is considered for compaction.
const COMPACT_MIN_TOMBSTONES: usize = 64;

/// One collection: schema, lifecycle state, rows and index.
#[derive(Debug)]
struct CollectionEntry {
    name: String,
    dimension: usize,
    metric: MetricType,
    state: CollectionState,
    index: Option<HnswGraph>,
    /// Row table keyed by graph node id; `None` once deleted.
    rows: Vec<Option<DocumentChunk>>,
    by_document: HashMap<String, Vec<u32>>,
}

impl CollectionEntry {
    fn handle(&self) -> CollectionHandle {
        CollectionHandle {
            name: self.name.clone(),
            dimension: self.dimension,
            metric: self.metric,
            state: self.state,
        }
    }

    /// Remove every row of `document_id`. Returns the number of rows removed.
    fn remove_document(&mut self, document_id: &str) -> usize {
        let Some(ids) = self.by_document.remove(document_id) else {
            return 0;
        };
        let mut removed = 0;
        for id in ids {
            if self.rows[id as usize].take().is_some() {
                removed += 1;
            }
            if let Some(index) = self.index.as_mut() {
                index.mark_deleted(id);
            }
        }
        removed
    }

    /// Rebuild the row table and index from live rows once tombstones reach
    /// [`COMPACT_MIN_TOMBSTONES`] and outnumber live nodes.
    ///
    /// Node ids are reassigned in insertion order. Returns the number of
    /// tombstones dropped.
    fn compact_if_sparse(&mut self) -> usize {
        let Some(index) = self.index.as_ref() else {
            return 0;
        };
        let tombstones = index.tombstones();
        if tombstones < COMPACT_MIN_TOMBSTONES || tombstones <= index.len() {
            return 0;
        }

        let mut graph = HnswGraph::new(self.dimension, self.metric, index.params().clone());
        let mut rows = Vec::with_capacity(index.len());
        let mut by_document: HashMap<String, Vec<u32>> = HashMap::new();
        for chunk in std::mem::take(&mut self.rows).into_iter().flatten() {
            let id = graph.insert(&chunk.vectors);
            by_document.entry(chunk.document_id.clone()).or_default().push(id);
            rows.push(Some(chunk));
        }

        self.index = Some(graph);
        self.rows = rows;
        self.by_document = by_document;
        debug!(
            collection = %self.name,
            tombstones,
            live = self.rows.len(),
            "compacted collection"
        );
        tombstones
    }
}

/// A [`VectorStore`] that keeps collections in memory with one HNSW graph each.
///
/// Scores follow the configured metric: `IP` returns the dot product and
/// `COSINE` the cosine similarity (higher is better), `L2` the squared
/// Euclidean distance (lower is better). Inserts are committed in batches of
/// [`VectorStoreConfig::batch_size`] chunks; a failing batch leaves earlier
/// batches in place.
///
/// # Example
///
/// ```rust,ignore
/// use adk_vectordb::{CollectionOptions, HnswVectorStore, VectorStore, VectorStoreConfig};
///
/// let store = HnswVectorStore::new(VectorStoreConfig::default())?;
/// store.create_collection("docs", 384, CollectionOptions::default()).await?;
/// ```
#[derive(Debug)]
pub struct HnswVectorStore {
    config: VectorStoreConfig,
    engine: QueryEngine,
    collections: RwLock<HashMap<String, CollectionEntry>>,
    active: ActiveCollection,
    seed: Option<u64>,
}

impl HnswVectorStore {
    /// Create a store from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`VectorDbError::Configuration`] if the configuration is invalid
    /// or names an index type other than `HNSW`.
    pub fn new(config: VectorStoreConfig) -> Result<Self> {
        config.validate()?;
        if !config.index_params.index_type.eq_ignore_ascii_case("HNSW") {
            return Err(VectorDbError::Configuration(format!(
                "index type '{}' is not supported by the in-process store, expected HNSW",
                config.index_params.index_type
            )));
        }
        Ok(Self {
            engine: QueryEngine::new(config.search_params.clone()),
            active: ActiveCollection::new(config.default_collection.clone()),
            collections: RwLock::new(HashMap::new()),
            config,
            seed: None,
        })
    }

    /// Attach the provider used to embed text queries.
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.engine = self.engine.with_embedding_provider(provider);
        self
    }

    /// Replace the query engine.
    pub fn with_engine(mut self, engine: QueryEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Build every graph from a fixed seed so results are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    /// Describe a collection, or `None` if it does not exist.
    pub async fn collection_info(&self, name: &str) -> Option<CollectionHandle> {
        self.collections.read().await.get(name).map(CollectionEntry::handle)
    }

    /// Returns `true` if `name` exists and its index has been built.
    pub async fn has_index(&self, name: &str) -> bool {
        self.collections.read().await.get(name).is_some_and(|entry| entry.index.is_some())
    }

    /// Number of graph nodes held for `name`, tombstones included.
    pub async fn node_count(&self, name: &str) -> usize {
        self.collections
            .read()
            .await
            .get(name)
            .map_or(0, |entry| entry.index.as_ref().map_or(0, HnswGraph::node_count))
    }

    /// Number of live chunks stored in `name`.
    pub async fn chunk_count(&self, name: &str) -> usize {
        self.collections
            .read()
            .await
            .get(name)
            .map_or(0, |entry| entry.index.as_ref().map_or(0, HnswGraph::len))
    }

    fn register_schema(&self, name: &str, dimension: usize) -> Result<CollectionEntry> {
        validate_collection_name(name)?;
        if dimension == 0 {
            return Err(VectorDbError::Configuration(format!(
                "collection '{name}' needs a non-zero embedding dimension"
            )));
        }
        Ok(CollectionEntry {
            name: name.to_string(),
            dimension,
            metric: self.config.metric(),
            state: CollectionState::Creating,
            index: None,
            rows: Vec::new(),
            by_document: HashMap::new(),
        })
    }

    /// Build the collection's index unless one already exists.
    fn build_index(&self, entry: &mut CollectionEntry) {
        if entry.index.is_some() {
            debug!(collection = %entry.name, "index already exists, skipping build");
            return;
        }
        let mut params = HnswParams::from_index(&self.config.index_params.params);
        if let Some(seed) = self.seed {
            params = params.with_seed(seed);
        }
        debug!(
            collection = %entry.name,
            metric = %entry.metric,
            m = params.m,
            ef_construction = params.ef_construction,
            "building hnsw index"
        );
        entry.index = Some(HnswGraph::new(entry.dimension, entry.metric, params));
    }
}

fn not_found(collection: &str) -> VectorDbError {
    error!(collection, "collection not found");
    VectorDbError::CollectionNotFound(collection.to_string())
}

#[async_trait]
impl VectorStore for HnswVectorStore {
    fn kind(&self) -> VectorStoreKind {
        VectorStoreKind::Hnsw
    }

    async fn create_collection(
        &self,
        name: &str,
        embedding_dim: usize,
        options: CollectionOptions,
    ) -> Result<CollectionHandle> {
        let mut collections = self.collections.write().await;

        if let Some(existing) = collections.get_mut(name) {
            if !options.create_new {
                if existing.dimension != embedding_dim {
                    error!(
                        collection = name,
                        expected = embedding_dim,
                        actual = existing.dimension,
                        "existing collection has a different embedding dimension"
                    );
                    return Err(VectorDbError::SchemaConflict {
                        collection: name.to_string(),
                        expected: embedding_dim,
                        actual: existing.dimension,
                    });
                }
                self.build_index(existing);
                existing.state = CollectionState::Loaded;
                let handle = existing.handle();
                drop(collections);
                self.active.set(name).await;
                info!(collection = name, "loaded existing collection");
                return Ok(handle);
            }
            collections.remove(name);
            info!(collection = name, "dropped existing collection");
        }

        let mut entry = self.register_schema(name, embedding_dim).inspect_err(|e| {
            error!(collection = name, error = %e, "schema registration failed");
        })?;
        entry.state = CollectionState::Indexed;
        self.build_index(&mut entry);
        entry.state = CollectionState::Loaded;

        let handle = entry.handle();
        collections.insert(name.to_string(), entry);
        drop(collections);

        self.active.set(name).await;
        info!(
            collection = name,
            dimension = embedding_dim,
            metric = %handle.metric,
            "created collection"
        );
        Ok(handle)
    }

    async fn add_documents(&self, collection: &str, documents: &[Document]) -> Result<Vec<String>> {
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;

        let chunks: Vec<DocumentChunk> = documents
            .iter()
            .flat_map(|doc| {
                doc.chunks.iter().map(|chunk| DocumentChunk {
                    document_id: doc.document_id.clone(),
                    ..chunk.clone()
                })
            })
            .collect();

        let mut replaced: HashSet<String> = HashSet::new();
        for (batch_no, batch) in chunks.chunks(self.config.batch_size).enumerate() {
            for chunk in batch {
                validate_chunk(chunk, entry.dimension).inspect_err(|e| {
                    error!(
                        collection,
                        chunk_id = %chunk.chunk_id,
                        document_id = %chunk.document_id,
                        batch = batch_no,
                        error = %e,
                        "rejected chunk"
                    );
                })?;
            }

            for chunk in batch {
                if replaced.insert(chunk.document_id.clone()) {
                    let removed = entry.remove_document(&chunk.document_id);
                    if removed > 0 {
                        debug!(
                            collection,
                            document_id = %chunk.document_id,
                            removed,
                            "replacing document"
                        );
                    }
                }
            }

            let index = entry.index.as_mut().ok_or_else(|| {
                error!(collection, "collection has no index");
                VectorDbError::operation(
                    BACKEND,
                    "insert",
                    format!("collection '{collection}' has no index"),
                )
            })?;
            for chunk in batch {
                let id = index.insert(&chunk.vectors);
                entry.rows.push(Some(chunk.clone()));
                entry.by_document.entry(chunk.document_id.clone()).or_default().push(id);
            }
            debug!(collection, batch = batch_no, count = batch.len(), "inserted batch");
        }

        entry.compact_if_sparse();
        entry.state = CollectionState::Loaded;
        info!(collection, documents = documents.len(), chunks = chunks.len(), "added documents");
        Ok(documents.iter().map(|doc| doc.document_id.clone()).collect())
    }

    async fn retrieve_documents(
        &self,
        query: RetrievalQuery,
        collection: Option<&str>,
        limit: usize,
    ) -> Result<QueryResult> {
        let name = self.active.resolve(collection).await;
        let dimension = self
            .collections
            .read()
            .await
            .get(&name)
            .map(|entry| entry.dimension)
            .ok_or_else(|| not_found(&name))?;

        let query = self.engine.resolve(query, dimension).await?;
        self.query(&name, &query, limit, None).await
    }

    async fn query(
        &self,
        collection: &str,
        query: &QueryWithEmbedding,
        number_of_results: usize,
        filter: Option<&DocumentMetadataFilter>,
    ) -> Result<QueryResult> {
        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| not_found(collection))?;

        check_query(query, entry.dimension)?;
        let index = entry.index.as_ref().ok_or_else(|| {
            error!(collection, "collection has no index");
            VectorDbError::operation(
                BACKEND,
                "search",
                format!("collection '{collection}' has no index"),
            )
        })?;

        let filter = filter.filter(|f| !f.is_empty());
        let accept = |id: u32| {
            entry.rows[id as usize]
                .as_ref()
                .is_some_and(|chunk| filter.is_none_or(|f| f.matches(chunk)))
        };
        let ef = self.engine.ef_for(number_of_results);
        let hits = index.search(&query.vectors, number_of_results, ef, &accept);

        let group: Vec<DocumentChunkWithScore> = hits
            .into_iter()
            .filter_map(|hit| {
                entry.rows[hit.id as usize]
                    .clone()
                    .map(|chunk| DocumentChunkWithScore { chunk, score: hit.score })
            })
            .collect();

        debug!(
            collection,
            hits = group.len(),
            limit = number_of_results,
            ef,
            "searched collection"
        );
        Ok(self.engine.normalize(vec![group], entry.metric, filter, number_of_results))
    }

    async fn delete_documents(
        &self,
        document_ids: &[&str],
        collection: Option<&str>,
    ) -> Result<usize> {
        let name = self.active.resolve(collection).await;
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(&name)
            .ok_or_else(|| not_found(&name))?;

        let removed: usize = document_ids.iter().map(|id| entry.remove_document(id)).sum();
        entry.compact_if_sparse();
        debug!(
            collection = %name,
            documents = document_ids.len(),
            chunks = removed,
            "deleted documents"
        );
        Ok(document_ids.len())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let removed = self.collections.write().await.remove(name);
        self.active.clear_if(name).await;
        match removed {
            Some(_) => info!(collection = name, "deleted collection"),
            None => debug!(collection = name, "collection does not exist, nothing to delete"),
        }
        Ok(())
    }

    async fn get_document(
        &self,
        document_id: &str,
        collection: Option<&str>,
    ) -> Result<Option<Document>> {
        let name = self.active.resolve(collection).await;
        let collections = self.collections.read().await;
        let entry = collections
            .get(&name)
            .ok_or_else(|| not_found(&name))?;

        let chunks: Vec<DocumentChunk> = entry
            .by_document
            .get(document_id)
            .into_iter()
            .flatten()
            .filter_map(|&id| entry.rows[id as usize].clone())
            .collect();

        if chunks.is_empty() {
            debug!(collection = %name, document_id, "document not found");
            return Ok(None);
        }
        Ok(Some(Document::with_id(document_id, document_id, chunks)))
    }

    async fn close(&self) -> Result<()> {
        let mut collections = self.collections.write().await;
        let count = collections.len();
        collections.clear();
        info!(collections = count, "closed hnsw store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentChunkMetadata, Source};

    fn store() -> HnswVectorStore {
        let config = VectorStoreConfig::builder().embedding_dim(3).batch_size(2).build().unwrap();
        HnswVectorStore::new(config).unwrap().with_seed(1)
    }

    fn chunk(id: &str, vectors: Vec<f32>) -> DocumentChunk {
        DocumentChunk::new(id, format!("text of {id}"), vectors)
    }

    #[tokio::test]
    async fn lifecycle_reaches_loaded_with_index() {
        let store = store();
        let handle =
            store.create_collection("docs", 3, CollectionOptions::default()).await.unwrap();
        assert_eq!(handle.state, CollectionState::Loaded);
        assert_eq!(handle.metric, MetricType::Ip);
        assert!(store.has_index("docs").await);
        assert!(!store.has_index("missing").await);
    }

    #[tokio::test]
    async fn reload_keeps_rows_and_rejects_other_dimensions() {
        let store = store();
        store.create_collection("docs", 3, CollectionOptions::default()).await.unwrap();
        let doc = Document::with_id("d1", "d1", vec![chunk("c1", vec![1.0, 0.0, 0.0])]);
        store.add_documents("docs", &[doc]).await.unwrap();

        store.create_collection("docs", 3, CollectionOptions::default()).await.unwrap();
        assert_eq!(store.chunk_count("docs").await, 1);

        let err =
            store.create_collection("docs", 4, CollectionOptions::default()).await.unwrap_err();
        assert!(matches!(err, VectorDbError::SchemaConflict { expected: 4, actual: 3, .. }));
    }

    #[tokio::test]
    async fn invalid_names_fail_registration() {
        let store = store();
        let err = store.create_collection("bad name", 3, CollectionOptions::default()).await;
        assert!(matches!(err, Err(VectorDbError::Configuration(_))));
        assert!(store.collection_info("bad name").await.is_none());
    }

    #[tokio::test]
    async fn failing_batch_keeps_earlier_batches() {
        let store = store();
        store.create_collection("docs", 3, CollectionOptions::default()).await.unwrap();
        let doc = Document::with_id(
            "d1",
            "d1",
            vec![
                chunk("c1", vec![1.0, 0.0, 0.0]),
                chunk("c2", vec![0.0, 1.0, 0.0]),
                chunk("c3", vec![0.0, 0.0]),
            ],
        );
        let err = store.add_documents("docs", &[doc]).await.unwrap_err();
        assert!(matches!(
            err,
            VectorDbError::InvalidChunk { ref chunk_id, .. } if chunk_id == "c3"
        ));
        assert_eq!(store.chunk_count("docs").await, 2);
    }

    #[tokio::test]
    async fn reinsert_replaces_previous_chunks() {
        let store = store();
        store.create_collection("docs", 3, CollectionOptions::default()).await.unwrap();
        let first = Document::with_id(
            "d1",
            "d1",
            vec![chunk("old1", vec![1.0, 0.0, 0.0]), chunk("old2", vec![0.0, 1.0, 0.0])],
        );
        store.add_documents("docs", &[first]).await.unwrap();

        let second = Document::with_id("d1", "d1", vec![chunk("new", vec![0.0, 0.0, 1.0])]);
        store.add_documents("docs", &[second]).await.unwrap();

        let doc = store.get_document("d1", Some("docs")).await.unwrap().unwrap();
        let ids: Vec<&str> = doc.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["new"]);
        assert_eq!(doc.name, "d1");
    }

    #[tokio::test]
    async fn optional_collection_falls_back_to_active() {
        let store = store();
        store.create_collection("docs", 3, CollectionOptions::default()).await.unwrap();
        let doc = Document::with_id(
            "d1",
            "d1",
            vec![chunk("c1", vec![1.0, 0.0, 0.0]).with_metadata(DocumentChunkMetadata {
                source: Source::Web,
                ..Default::default()
            })],
        );
        store.add_documents("docs", &[doc]).await.unwrap();

        let result = store
            .retrieve_documents(QueryWithEmbedding::new(vec![1.0, 0.0, 0.0]).into(), None, 5)
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["c1"]);
        assert_eq!(result.data[0].chunk.document_id, "d1");

        store.delete_collection("docs").await.unwrap();
        let err = store.get_document("d1", None).await.unwrap_err();
        assert!(matches!(
            err,
            VectorDbError::CollectionNotFound(ref name) if name == "DocumentChunk"
        ));
    }

    #[tokio::test]
    async fn repeated_reinsert_keeps_storage_bounded() {
        let store = store();
        store.create_collection("docs", 3, CollectionOptions::default()).await.unwrap();
        for round in 0..1000 {
            let vectors = vec![1.0, (round % 7) as f32, 0.5];
            let doc = Document::with_id("d1", "d1", vec![chunk("c1", vectors)]);
            store.add_documents("docs", &[doc]).await.unwrap();
            assert!(store.node_count("docs").await <= COMPACT_MIN_TOMBSTONES + 1);
        }
        assert_eq!(store.chunk_count("docs").await, 1);

        let result = store
            .query("docs", &QueryWithEmbedding::new(vec![1.0, 6.0, 0.5]), 5, None)
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["c1"]);

        store.delete_documents(&["d1"], Some("docs")).await.unwrap();
        assert_eq!(store.chunk_count("docs").await, 0);
        assert!(store.node_count("docs").await <= COMPACT_MIN_TOMBSTONES);
    }

    #[tokio::test]
    async fn compaction_remaps_documents_and_search() {
        let store = store();
        store.create_collection("docs", 3, CollectionOptions::default()).await.unwrap();
        let docs: Vec<Document> = (0..100)
            .map(|i| {
                let angle = i as f32 * 0.05;
                let chunks = vec![
                    chunk(&format!("c{i}a"), vec![angle.cos(), angle.sin(), 0.0]),
                    chunk(&format!("c{i}b"), vec![0.0, angle.cos(), angle.sin()]),
                ];
                Document::with_id(format!("d{i}"), format!("d{i}"), chunks)
            })
            .collect();
        store.add_documents("docs", &docs).await.unwrap();
        assert_eq!(store.node_count("docs").await, 200);

        let doomed: Vec<String> = (0..80).map(|i| format!("d{i}")).collect();
        let doomed: Vec<&str> = doomed.iter().map(String::as_str).collect();
        store.delete_documents(&doomed, Some("docs")).await.unwrap();
        assert_eq!(store.node_count("docs").await, 40);
        assert_eq!(store.chunk_count("docs").await, 40);

        let kept = store.get_document("d90", Some("docs")).await.unwrap().unwrap();
        let ids: Vec<&str> = kept.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c90a", "c90b"]);
        assert!(store.get_document("d10", Some("docs")).await.unwrap().is_none());

        let angle = 90.0f32 * 0.05;
        let query = QueryWithEmbedding::new(vec![angle.cos(), angle.sin(), 0.0]);
        let result = store.query("docs", &query, 1, None).await.unwrap();
        assert_eq!(result.ids, vec!["c90a"]);
        assert_eq!(result.data[0].chunk.document_id, "d90");
    }

    #[test]
    fn rejects_non_hnsw_index_types() {
        let mut config = VectorStoreConfig::default();
        config.index_params.index_type = "IVF_FLAT".into();
        assert!(matches!(HnswVectorStore::new(config), Err(VectorDbError::Configuration(_))));
    }
}

//! Vector store trait: the contract every backend driver satisfies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::{MetricType, VectorStoreKind};
use crate::document::{Document, DocumentChunk, QueryResult, QueryWithEmbedding};
use crate::error::{Result, VectorDbError};
use crate::filter::DocumentMetadataFilter;
use crate::retrieval::RetrievalQuery;

/// Options for [`VectorStore::create_collection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Drop and rebuild the collection if it already exists.
    pub create_new: bool,
}

impl CollectionOptions {
    /// Options that destroy any existing collection of the same name.
    pub fn recreate() -> Self {
        Self { create_new: true }
    }
}

/// Lifecycle of a collection inside a driver.
///
/// `Absent` collections have no handle at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    /// Schema registration in progress.
    Creating,
    /// Schema registered and index built, not yet queryable.
    Indexed,
    /// Queryable.
    Loaded,
}

/// Describes a collection returned by [`VectorStore::create_collection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHandle {
    /// Collection name.
    pub name: String,
    /// Fixed embedding dimension.
    pub dimension: usize,
    /// Metric used to score hits in this collection.
    pub metric: MetricType,
    /// Current lifecycle state.
    pub state: CollectionState,
}

/// A storage backend for document chunks with similarity search.
///
/// Implementations manage named, schema-fixed collections. Calls may suspend
/// on network round-trips but are not designed for concurrent mutation of
/// the same collection: callers serialize `create_collection` for a given
/// name, and never race `add_documents` against `delete_collection`.
///
/// # Example
///
/// ```rust,ignore
/// use adk_vectordb::{CollectionOptions, VectorStore};
///
/// store.create_collection("docs", 384, CollectionOptions::default()).await?;
/// store.add_documents("docs", &documents).await?;
/// let results = store.retrieve_documents("what is HNSW?".into(), Some("docs"), 5).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The backend this driver talks to.
    fn kind(&self) -> VectorStoreKind;

    /// Create or load a collection and make it the store's active collection.
    ///
    /// With `options.create_new`, an existing collection of that name is
    /// destroyed and rebuilt with a fresh schema. Otherwise an existing
    /// collection is loaded as-is, and fails with
    /// [`SchemaConflict`](crate::VectorDbError::SchemaConflict) if its
    /// dimension differs from `embedding_dim`.
    async fn create_collection(
        &self,
        name: &str,
        embedding_dim: usize,
        options: CollectionOptions,
    ) -> Result<CollectionHandle>;

    /// Insert every chunk of every document in batches, then make them
    /// visible to searches. Returns the document ids in input order.
    ///
    /// Re-inserting a document replaces its previous chunks. Batches already
    /// committed stay committed if a later batch fails.
    async fn add_documents(&self, collection: &str, documents: &[Document]) -> Result<Vec<String>>;

    /// Search with free text (embedded once) or a pre-embedded query.
    ///
    /// `collection` defaults to the active collection.
    async fn retrieve_documents(
        &self,
        query: RetrievalQuery,
        collection: Option<&str>,
        limit: usize,
    ) -> Result<QueryResult>;

    /// Search with an embedded query, restricted to chunks accepted by `filter`.
    async fn query(
        &self,
        collection: &str,
        query: &QueryWithEmbedding,
        number_of_results: usize,
        filter: Option<&DocumentMetadataFilter>,
    ) -> Result<QueryResult>;

    /// Delete every chunk whose `document_id` is in `document_ids`.
    ///
    /// Returns the number of document ids processed, not the number of
    /// chunk rows removed.
    async fn delete_documents(
        &self,
        document_ids: &[&str],
        collection: Option<&str>,
    ) -> Result<usize>;

    /// Drop a collection. Dropping an absent collection is a no-op.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Rebuild a document from all chunks sharing `document_id`.
    ///
    /// Returns `Ok(None)` when no chunk matches.
    async fn get_document(
        &self,
        document_id: &str,
        collection: Option<&str>,
    ) -> Result<Option<Document>>;

    /// Release backend resources. The store must not be used afterwards.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Check a collection name before registering a schema for it.
///
/// Names start with a letter or underscore and contain only ASCII letters,
/// digits and underscores, at most 255 characters.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name.len() > 255 {
        return Err(VectorDbError::Configuration(format!("invalid collection name '{name}'")));
    }
    Ok(())
}

/// Reject chunks that cannot be indexed in a collection of `dimension`.
pub(crate) fn validate_chunk(chunk: &DocumentChunk, dimension: usize) -> Result<()> {
    let reason = if chunk.vectors.is_empty() {
        "embedding is empty".to_string()
    } else if chunk.vectors.len() != dimension {
        format!("embedding has dimension {}, collection expects {dimension}", chunk.vectors.len())
    } else if chunk.vectors.iter().any(|v| !v.is_finite()) {
        "embedding contains non-finite values".to_string()
    } else {
        return Ok(());
    };
    Err(VectorDbError::InvalidChunk { chunk_id: chunk.chunk_id.clone(), reason })
}

/// The single active collection of a driver instance.
#[derive(Debug)]
pub(crate) struct ActiveCollection {
    fallback: String,
    current: RwLock<Option<String>>,
}

impl ActiveCollection {
    pub(crate) fn new(fallback: impl Into<String>) -> Self {
        Self { fallback: fallback.into(), current: RwLock::new(None) }
    }

    pub(crate) async fn set(&self, name: &str) {
        *self.current.write().await = Some(name.to_string());
    }

    pub(crate) async fn clear_if(&self, name: &str) {
        let mut current = self.current.write().await;
        if current.as_deref() == Some(name) {
            *current = None;
        }
    }

    /// The requested name, else the active collection, else the configured default.
    pub(crate) async fn resolve(&self, requested: Option<&str>) -> String {
        if let Some(name) = requested {
            return name.to_string();
        }
        self.current.read().await.clone().unwrap_or_else(|| self.fallback.clone())
    }
}

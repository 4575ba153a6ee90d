//! Milvus vector store backend.
//!
//! Provides [`MilvusVectorStore`], which implements [`VectorStore`] over the
//! Milvus REST API (`/v2/vectordb/...`) with `reqwest`. This module is only
//! available when the `milvus` feature is enabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_vectordb::milvus::MilvusVectorStore;
//! use adk_vectordb::{CollectionOptions, VectorStore, VectorStoreConfig};
//!
//! let store = MilvusVectorStore::new(VectorStoreConfig::from_env()?)?;
//! store.create_collection("docs", 384, CollectionOptions::default()).await?;
//! let results = store.query("docs", &query, 5, None).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::{IndexParams, VectorStoreConfig, VectorStoreKind};
use crate::document::{
    Document, DocumentChunk, DocumentChunkMetadata, DocumentChunkWithScore, QueryResult,
    QueryWithEmbedding, Source,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, VectorDbError};
use crate::filter::{DocumentMetadataFilter, quote};
use crate::retrieval::{QueryEngine, RetrievalQuery, check_query};
use crate::vectorstore::{
    ActiveCollection, CollectionHandle, CollectionOptions, CollectionState, VectorStore,
    validate_chunk, validate_collection_name,
};

const BACKEND: &str = "milvus";

/// Name of the vector field.
const VECTOR_FIELD: &str = "embedding";

/// Maximum length of every VARCHAR field.
const VARCHAR_MAX_LENGTH: u32 = 65535;

/// Row cap for `entities/query` when rebuilding a document.
const QUERY_LIMIT: usize = 16384;

/// Consistency level used when none is configured, so inserts are visible to
/// the next search.
const DEFAULT_CONSISTENCY: &str = "Strong";

const TEXT_FIELDS: [&str; 8] =
    ["document_id", "text", "chunk_id", "source_id", "source", "url", "created_at", "author"];

const OUTPUT_FIELDS: [&str; 9] = [
    "chunk_id",
    "text",
    "document_id",
    "embedding",
    "source",
    "source_id",
    "url",
    "created_at",
    "author",
];

/// A [`VectorStore`] backed by a Milvus server.
///
/// Every collection uses an auto-generated `INT64` primary key, the vector
/// field `embedding`, and one VARCHAR field per chunk attribute. Scores are
/// returned as Milvus reports them for the configured metric.
pub struct MilvusVectorStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    config: VectorStoreConfig,
    engine: QueryEngine,
    active: ActiveCollection,
    dimensions: RwLock<HashMap<String, usize>>,
}

impl std::fmt::Debug for MilvusVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MilvusVectorStore")
            .field("base_url", &self.base_url)
            .field("secure", &self.token.is_some())
            .field("engine", &self.engine)
            .finish()
    }
}

impl MilvusVectorStore {
    /// Create a store for the host and port in `config`.
    ///
    /// No request is sent until the first operation. With a password
    /// configured the store uses `https` and bearer `user:password` auth.
    pub fn new(config: VectorStoreConfig) -> Result<Self> {
        config.validate()?;
        if config.host.trim().is_empty() {
            return Err(VectorDbError::Configuration("milvus host must not be empty".into()));
        }
        let scheme = if config.use_security() { "https" } else { "http" };
        let base_url = format!("{scheme}://{}:{}", config.host, config.port);
        let token = config.password.as_ref().map(|password| {
            format!("{}:{password}", config.user.as_deref().unwrap_or_default())
        });
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VectorDbError::Configuration(format!("invalid HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
            engine: QueryEngine::new(config.search_params.clone()),
            active: ActiveCollection::new(config.default_collection.clone()),
            dimensions: RwLock::new(HashMap::new()),
            config,
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

    /// The server base URL, e.g. `http://127.0.0.1:19530`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn consistency_level(&self) -> &str {
        self.config.consistency_level.as_deref().unwrap_or(DEFAULT_CONSISTENCY)
    }

    async fn post(&self, path: &str, operation: &str, body: Value) -> Result<Value> {
        let url = format!("{}/v2/vectordb/{path}", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!(backend = BACKEND, operation, error = %e, "request failed");
            VectorDbError::BackendUnavailable { backend: BACKEND.into(), message: e.to_string() }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(backend = BACKEND, operation, %status, "http error");
            return Err(VectorDbError::operation(
                BACKEND,
                operation,
                format!("HTTP {status}: {text}"),
            ));
        }

        let body: Value = response.json().await.map_err(|e| {
            error!(backend = BACKEND, operation, error = %e, "failed to parse response");
            VectorDbError::operation(BACKEND, operation, format!("failed to parse response: {e}"))
        })?;
        check_response(operation, body).inspect_err(|e| {
            error!(backend = BACKEND, operation, error = %e, "milvus rejected request");
        })
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let body = json!({ "collectionName": name });
        let data = self.post("collections/has", "has_collection", body).await?;
        Ok(data.get("has").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn describe_dimension(&self, name: &str) -> Result<usize> {
        let data = self
            .post("collections/describe", "describe_collection", json!({ "collectionName": name }))
            .await?;
        parse_dimension(&data).ok_or_else(|| {
            VectorDbError::operation(
                BACKEND,
                "describe_collection",
                format!("collection '{name}' has no '{VECTOR_FIELD}' dimension"),
            )
        })
    }

    async fn ensure_index(&self, name: &str) -> Result<()> {
        let body = json!({ "collectionName": name });
        let data = self.post("indexes/list", "list_indexes", body).await?;
        if data.as_array().is_some_and(|indexes| !indexes.is_empty()) {
            debug!(collection = name, "index already exists, skipping build");
            return Ok(());
        }
        self.post("indexes/create", "create_index", index_request(name, &self.config.index_params))
            .await?;
        info!(
            collection = name,
            index_type = %self.config.index_params.index_type,
            metric = %self.config.index_params.metric_type,
            "created index"
        );
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<()> {
        self.post("collections/load", "load_collection", json!({ "collectionName": name })).await?;
        debug!(collection = name, "loaded collection");
        Ok(())
    }

    /// Dimension of `name`, from cache or the server.
    async fn dimension_of(&self, name: &str) -> Result<usize> {
        if let Some(&dimension) = self.dimensions.read().await.get(name) {
            return Ok(dimension);
        }
        if !self.has_collection(name).await? {
            error!(collection = name, "collection not found");
            return Err(VectorDbError::CollectionNotFound(name.to_string()));
        }
        let dimension = self.describe_dimension(name).await?;
        self.dimensions.write().await.insert(name.to_string(), dimension);
        Ok(dimension)
    }

    async fn delete_where(&self, collection: &str, filter: String) -> Result<()> {
        self.post(
            "entities/delete",
            "delete",
            json!({ "collectionName": collection, "filter": filter }),
        )
        .await?;
        Ok(())
    }
}

/// Unwrap a REST v2 envelope `{"code": 0, "data": ...}`.
fn check_response(operation: &str, mut body: Value) -> Result<Value> {
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = body.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(VectorDbError::operation(BACKEND, operation, format!("code {code}: {message}")));
    }
    Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}

/// Collection schema: auto-id primary key, vector field, VARCHAR attributes.
fn collection_schema(dimension: usize) -> Value {
    let mut fields = vec![
        json!({ "fieldName": "id", "dataType": "Int64", "isPrimary": true }),
        json!({
            "fieldName": VECTOR_FIELD,
            "dataType": "FloatVector",
            "elementTypeParams": { "dim": dimension.to_string() }
        }),
    ];
    fields.extend(TEXT_FIELDS.iter().map(|name| {
        json!({
            "fieldName": name,
            "dataType": "VarChar",
            "elementTypeParams": { "max_length": VARCHAR_MAX_LENGTH }
        })
    }));
    json!({ "autoId": true, "enableDynamicField": false, "fields": fields })
}

fn index_request(collection: &str, params: &IndexParams) -> Value {
    json!({
        "collectionName": collection,
        "indexParams": [{
            "fieldName": VECTOR_FIELD,
            "indexName": VECTOR_FIELD,
            "metricType": params.metric_type.as_str(),
            "indexType": params.index_type,
            "params": params.params,
        }]
    })
}

/// Read the vector dimension from a `collections/describe` payload.
fn parse_dimension(data: &Value) -> Option<usize> {
    let field = data
        .get("fields")?
        .as_array()?
        .iter()
        .find(|f| f.get("name").and_then(Value::as_str) == Some(VECTOR_FIELD))?;
    let dim = field
        .get("params")?
        .as_array()?
        .iter()
        .find(|p| p.get("key").and_then(Value::as_str) == Some("dim"))?
        .get("value")?;
    match dim {
        Value::String(s) => s.parse().ok(),
        other => other.as_u64().map(|n| n as usize),
    }
}

fn chunk_row(chunk: &DocumentChunk) -> Value {
    json!({
        "document_id": chunk.document_id,
        "embedding": chunk.vectors,
        "text": chunk.text,
        "chunk_id": chunk.chunk_id,
        "source_id": chunk.metadata.source_id,
        "source": chunk.metadata.source.as_str(),
        "url": chunk.metadata.url,
        "created_at": chunk.metadata.created_at,
        "author": chunk.metadata.author,
    })
}

/// Rebuild a chunk from a returned row; missing fields become empty strings
/// and a missing or unknown source becomes [`Source::Other`].
fn parse_chunk(row: &Value) -> DocumentChunk {
    let row = row.get("entity").unwrap_or(row);
    let text = |field: &str| row.get(field).and_then(Value::as_str).unwrap_or_default().to_string();
    let vectors = row
        .get(VECTOR_FIELD)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_f64).map(|v| v as f32).collect())
        .unwrap_or_default();

    DocumentChunk {
        chunk_id: text("chunk_id"),
        text: text("text"),
        vectors,
        document_id: text("document_id"),
        metadata: DocumentChunkMetadata {
            source: Source::parse(&text("source")),
            source_id: text("source_id"),
            url: text("url"),
            created_at: text("created_at"),
            author: text("author"),
        },
    }
}

/// Split an `entities/search` payload into one hit group per query vector.
fn parse_hits(data: &Value) -> Vec<Vec<DocumentChunkWithScore>> {
    let Some(rows) = data.as_array() else {
        return Vec::new();
    };
    let hit = |row: &Value| DocumentChunkWithScore {
        chunk: parse_chunk(row),
        score: row.get("distance").and_then(Value::as_f64).unwrap_or_default() as f32,
    };
    if rows.iter().all(Value::is_array) && !rows.is_empty() {
        rows.iter().map(|group| group.as_array().into_iter().flatten().map(hit).collect()).collect()
    } else {
        vec![rows.iter().map(hit).collect()]
    }
}

fn document_id_filter(document_ids: &[&str]) -> String {
    let quoted: Vec<String> = document_ids.iter().map(|id| quote(id)).collect();
    format!("document_id in [{}]", quoted.join(", "))
}

#[async_trait]
impl VectorStore for MilvusVectorStore {
    fn kind(&self) -> VectorStoreKind {
        VectorStoreKind::Milvus
    }

    async fn create_collection(
        &self,
        name: &str,
        embedding_dim: usize,
        options: CollectionOptions,
    ) -> Result<CollectionHandle> {
        let mut exists = self.has_collection(name).await?;
        if exists && options.create_new {
            self.post("collections/drop", "drop_collection", json!({ "collectionName": name }))
                .await?;
            self.dimensions.write().await.remove(name);
            info!(collection = name, "dropped existing collection");
            exists = false;
        }

        if exists {
            let actual = self.describe_dimension(name).await?;
            if actual != embedding_dim {
                error!(
                    collection = name,
                    expected = embedding_dim,
                    actual,
                    "existing collection has a different embedding dimension"
                );
                return Err(VectorDbError::SchemaConflict {
                    collection: name.to_string(),
                    expected: embedding_dim,
                    actual,
                });
            }
        } else {
            validate_collection_name(name)?;
            let body = json!({
                "collectionName": name,
                "schema": collection_schema(embedding_dim),
            });
            self.post("collections/create", "create_collection", body).await?;
            info!(collection = name, dimension = embedding_dim, "created collection");
        }

        self.ensure_index(name).await?;
        self.load(name).await?;
        self.dimensions.write().await.insert(name.to_string(), embedding_dim);
        self.active.set(name).await;

        Ok(CollectionHandle {
            name: name.to_string(),
            dimension: embedding_dim,
            metric: self.config.metric(),
            state: CollectionState::Loaded,
        })
    }

    async fn add_documents(&self, collection: &str, documents: &[Document]) -> Result<Vec<String>> {
        let dimension = self.dimension_of(collection).await?;
        let chunks: Vec<DocumentChunk> = documents
            .iter()
            .flat_map(|doc| {
                doc.chunks.iter().map(|chunk| DocumentChunk {
                    document_id: doc.document_id.clone(),
                    ..chunk.clone()
                })
            })
            .collect();

        let mut replaced: HashSet<&str> = HashSet::new();
        for (batch_no, batch) in chunks.chunks(self.config.batch_size).enumerate() {
            for chunk in batch {
                validate_chunk(chunk, dimension).inspect_err(|e| {
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

            let fresh: Vec<&str> = batch
                .iter()
                .map(|chunk| chunk.document_id.as_str())
                .filter(|id| replaced.insert(*id))
                .collect();
            if !fresh.is_empty() {
                self.delete_where(collection, document_id_filter(&fresh)).await?;
            }

            let rows: Vec<Value> = batch.iter().map(chunk_row).collect();
            let body = json!({ "collectionName": collection, "data": rows });
            self.post("entities/insert", "insert", body).await?;
            debug!(collection, batch = batch_no, count = batch.len(), "inserted batch");
        }

        self.load(collection).await?;
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
        let dimension = self.dimension_of(&name).await?;
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
        let dimension = self.dimension_of(collection).await?;
        check_query(query, dimension)?;
        let metric = self.engine.search_params().metric_type;
        if number_of_results == 0 {
            return Ok(QueryResult::empty(metric));
        }

        let mut search_params = self.engine.search_params().params.clone();
        search_params.ef = self.engine.ef_for(number_of_results);
        let mut body = json!({
            "collectionName": collection,
            "data": [query.vectors],
            "annsField": VECTOR_FIELD,
            "limit": number_of_results,
            "outputFields": OUTPUT_FIELDS,
            "searchParams": { "metricType": metric.as_str(), "params": search_params },
            "consistencyLevel": self.consistency_level(),
        });
        if let Some(expr) = filter.and_then(DocumentMetadataFilter::to_expression) {
            body["filter"] = Value::String(expr);
        }

        let data = self.post("entities/search", "search", body).await?;
        let groups = parse_hits(&data);
        debug!(collection, groups = groups.len(), limit = number_of_results, "searched collection");
        Ok(self.engine.normalize(groups, metric, filter, number_of_results))
    }

    async fn delete_documents(
        &self,
        document_ids: &[&str],
        collection: Option<&str>,
    ) -> Result<usize> {
        let name = self.active.resolve(collection).await;
        if document_ids.is_empty() {
            return Ok(0);
        }
        self.delete_where(&name, document_id_filter(document_ids)).await?;
        debug!(collection = %name, documents = document_ids.len(), "deleted documents");
        Ok(document_ids.len())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let exists = self.has_collection(name).await?;
        if exists {
            self.post("collections/drop", "drop_collection", json!({ "collectionName": name }))
                .await?;
        }
        self.active.clear_if(name).await;
        self.dimensions.write().await.remove(name);
        if exists {
            info!(collection = name, "deleted collection");
        } else {
            debug!(collection = name, "collection does not exist, nothing to delete");
        }
        Ok(())
    }

    async fn get_document(
        &self,
        document_id: &str,
        collection: Option<&str>,
    ) -> Result<Option<Document>> {
        let name = self.active.resolve(collection).await;
        let body = json!({
            "collectionName": name,
            "filter": format!("document_id == {}", quote(document_id)),
            "outputFields": OUTPUT_FIELDS,
            "limit": QUERY_LIMIT,
            "consistencyLevel": self.consistency_level(),
        });
        let data = self.post("entities/query", "query", body).await?;
        let chunks: Vec<DocumentChunk> =
            data.as_array().into_iter().flatten().map(parse_chunk).collect();

        if chunks.is_empty() {
            debug!(collection = %name, document_id, "document not found");
            return Ok(None);
        }
        Ok(Some(Document::with_id(document_id, document_id, chunks)))
    }

    async fn close(&self) -> Result<()> {
        self.dimensions.write().await.clear();
        info!(base_url = %self.base_url, "closed milvus store");
        Ok(())
    }
}

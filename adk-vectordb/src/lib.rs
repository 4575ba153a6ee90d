//! # adk-vectordb
//!
//! Vector store abstraction and retrieval engine for ADK-Rust RAG backends.
//!
//! ## Overview
//!
//! This crate hides approximate-nearest-neighbor backends behind one
//! [`VectorStore`] contract over a shared document model:
//!
//! - [`Document`], [`DocumentChunk`] and [`DocumentChunkMetadata`] - what is stored
//! - [`QueryWithEmbedding`], [`DocumentMetadataFilter`] - what is asked
//! - [`QueryResult`] - what comes back, tagged with its [`MetricType`]
//!
//! Backends:
//!
//! - [`HnswVectorStore`] - in-process HNSW index per collection (always available)
//! - `MilvusVectorStore` - Milvus over its REST API (feature `milvus`)
//!
//! [`create_vector_store`] builds the backend named by
//! [`VectorStoreConfig::kind`]. Text queries are embedded once through an
//! [`EmbeddingProvider`]; `OpenAiEmbeddingProvider` (feature `openai`) talks
//! to any OpenAI-compatible embeddings endpoint.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use adk_vectordb::{
//!     CollectionOptions, Document, DocumentChunk, QueryWithEmbedding, VectorStoreConfig,
//!     create_vector_store,
//! };
//!
//! let config = VectorStoreConfig::builder().embedding_dim(3).build()?;
//! let store = create_vector_store(&config, None).await?;
//!
//! store.create_collection("docs", 3, CollectionOptions::default()).await?;
//! let doc = Document::new("intro", vec![DocumentChunk::new("c1", "hello", vec![1.0, 0.0, 0.0])]);
//! store.add_documents("docs", &[doc]).await?;
//!
//! let query = QueryWithEmbedding::new(vec![1.0, 0.0, 0.0]);
//! let result = store.query("docs", &query, 1, None).await?;
//! assert_eq!(result.ids, vec!["c1"]);
//! ```
//!
//! ## Scores
//!
//! Scores are backend-native and never rescaled. For `IP` and `COSINE`
//! higher is better; for `L2` the score is a distance and lower is better.
//! Use [`MetricType::higher_is_better`] to interpret them.
//!
//! ## Features
//!
//! - `openai` - OpenAI-compatible embedding provider
//! - `milvus` - Milvus backend
//! - `full` - everything

pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod factory;
pub mod filter;
pub mod health;
pub mod hnsw;
pub mod retrieval;
pub mod vectorstore;

#[cfg(feature = "milvus")]
pub mod milvus;
#[cfg(feature = "openai")]
pub mod openai;

pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIM, IndexBuildParams, IndexParams,
    MetricType, SearchParams, SearchTuning, VectorStoreConfig, VectorStoreConfigBuilder,
    VectorStoreKind,
};
pub use document::{
    Document, DocumentChunk, DocumentChunkMetadata, DocumentChunkWithScore, QueryResult,
    QueryWithEmbedding, Source,
};
pub use embedding::{EmbeddingFileFormat, EmbeddingProvider, save_embeddings};
pub use error::{Result, VectorDbError};
pub use factory::{create_vector_store, create_vector_store_for};
pub use filter::{DocumentMetadataFilter, parse_timestamp};
pub use health::{
    EmbeddingProbe, FileSystemProbe, HealthProbe, HealthReport, HealthStatus, VectorStoreProbe,
    check_health,
};
pub use hnsw::HnswVectorStore;
#[cfg(feature = "milvus")]
pub use milvus::MilvusVectorStore;
#[cfg(feature = "openai")]
pub use openai::OpenAiEmbeddingProvider;
pub use retrieval::{QueryEngine, RetrievalQuery};
pub use vectorstore::{
    CollectionHandle, CollectionOptions, CollectionState, VectorStore, validate_collection_name,
};

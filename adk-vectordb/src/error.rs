//! Error types for the `adk-vectordb` crate.

use thiserror::Error;

/// Errors that can occur in vector store and retrieval operations.
#[derive(Debug, Error)]
pub enum VectorDbError {
    /// Bad backend kind, connection parameters, or index/search parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backend could not be reached (connection refused, timeout, ...).
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable {
        /// The backend that could not be reached.
        backend: String,
        /// A description of the transport failure.
        message: String,
    },

    /// An existing collection does not match the requested schema.
    #[error(
        "Schema conflict in collection '{collection}': expected dimension {expected}, found {actual}"
    )]
    SchemaConflict {
        /// The collection whose schema conflicts.
        collection: String,
        /// The requested embedding dimension.
        expected: usize,
        /// The embedding dimension of the existing collection.
        actual: usize,
    },

    /// A chunk cannot be inserted because its embedding is missing or malformed.
    #[error("Invalid chunk '{chunk_id}': {reason}")]
    InvalidChunk {
        /// The offending chunk.
        chunk_id: String,
        /// Why the chunk was rejected.
        reason: String,
    },

    /// Text could not be turned into a query vector.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingResolution {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A lower-level failure from the ANN engine (index build, search, delete).
    #[error("Vector store error ({backend}, {operation}): {message}")]
    BackendOperation {
        /// The backend that produced the error.
        backend: String,
        /// The operation that failed.
        operation: String,
        /// A description of the failure.
        message: String,
    },

    /// The addressed collection was never created or loaded.
    #[error("Collection '{0}' is not loaded")]
    CollectionNotFound(String),

    /// Filesystem failure (embedding export, filesystem probe).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VectorDbError {
    pub(crate) fn operation(
        backend: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BackendOperation {
            backend: backend.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// A convenience result type for vector store operations.
pub type Result<T> = std::result::Result<T, VectorDbError>;

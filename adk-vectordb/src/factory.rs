//! Construction of a configured [`VectorStore`] from a backend kind.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{VectorStoreConfig, VectorStoreKind};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, VectorDbError};
use crate::hnsw::HnswVectorStore;
use crate::vectorstore::VectorStore;

/// Build the driver selected by `config.kind`.
///
/// The configuration is validated before any connection parameter is used;
/// malformed index or search parameters fail here, not on first use. When
/// `embedding_provider` is given, text queries passed to
/// [`VectorStore::retrieve_documents`] are embedded with it.
///
/// # Errors
///
/// Returns [`VectorDbError::Configuration`] for invalid configuration, or for
/// a backend whose cargo feature is not enabled.
///
/// # Example
///
/// ```rust,ignore
/// use adk_vectordb::{VectorStoreConfig, create_vector_store};
///
/// let store = create_vector_store(&VectorStoreConfig::from_env()?, Some(embedder)).await?;
/// ```
pub async fn create_vector_store(
    config: &VectorStoreConfig,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Arc<dyn VectorStore>> {
    config.validate().inspect_err(|e| {
        error!(kind = %config.kind, error = %e, "invalid vector store configuration");
    })?;
    if let Some(provider) = &embedding_provider {
        if provider.dimensions() != config.embedding_dim {
            return Err(VectorDbError::Configuration(format!(
                "embedding provider '{}' produces dimension {}, store expects {}",
                provider.name(),
                provider.dimensions(),
                config.embedding_dim
            )));
        }
    }

    let store: Arc<dyn VectorStore> = match config.kind {
        VectorStoreKind::Hnsw => {
            let mut store = HnswVectorStore::new(config.clone())?;
            if let Some(provider) = embedding_provider {
                store = store.with_embedding_provider(provider);
            }
            Arc::new(store)
        }
        VectorStoreKind::Milvus => milvus_store(config, embedding_provider)?,
    };

    info!(kind = %config.kind, dimension = config.embedding_dim, "created vector store");
    Ok(store)
}

/// Build a store for a backend named by string, e.g. the `VECTOR_DB` value.
///
/// # Errors
///
/// Returns [`VectorDbError::Configuration`] for an unknown kind.
pub async fn create_vector_store_for(
    kind: &str,
    config: &VectorStoreConfig,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Arc<dyn VectorStore>> {
    let config = VectorStoreConfig { kind: kind.parse()?, ..config.clone() };
    create_vector_store(&config, embedding_provider).await
}

#[cfg(feature = "milvus")]
fn milvus_store(
    config: &VectorStoreConfig,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Arc<dyn VectorStore>> {
    let mut store = crate::milvus::MilvusVectorStore::new(config.clone())?;
    if let Some(provider) = embedding_provider {
        store = store.with_embedding_provider(provider);
    }
    Ok(Arc::new(store))
}

#[cfg(not(feature = "milvus"))]
fn milvus_store(
    _config: &VectorStoreConfig,
    _embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Arc<dyn VectorStore>> {
    Err(VectorDbError::Configuration(
        "the milvus backend requires the `milvus` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_hnsw_by_default() {
        let store = create_vector_store(&VectorStoreConfig::default(), None).await.unwrap();
        assert_eq!(store.kind(), VectorStoreKind::Hnsw);
    }

    #[tokio::test]
    async fn unknown_kinds_are_configuration_errors() {
        let err = create_vector_store_for("chroma", &VectorStoreConfig::default(), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VectorDbError::Configuration(_)));

        let store = create_vector_store_for("memory", &VectorStoreConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(store.kind(), VectorStoreKind::Hnsw);
    }

    #[tokio::test]
    async fn malformed_index_params_fail_fast() {
        let mut config = VectorStoreConfig::default();
        config.index_params.params.m = 0;
        assert!(matches!(
            create_vector_store(&config, None).await,
            Err(VectorDbError::Configuration(_))
        ));
    }

    #[cfg(not(feature = "milvus"))]
    #[tokio::test]
    async fn milvus_needs_its_feature() {
        let err = create_vector_store_for("milvus", &VectorStoreConfig::default(), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VectorDbError::Configuration(_)));
    }
}

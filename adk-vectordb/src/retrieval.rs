//! Retrieval engine shared by all backend drivers.
//!
//! [`QueryEngine`] sits between the [`VectorStore`](crate::VectorStore)
//! contract and a driver's raw search. It resolves text queries through the
//! [`EmbeddingProvider`], picks search parameters, and normalizes grouped
//! driver hits into a [`QueryResult`].

use std::sync::Arc;

use tracing::{debug, error};

use crate::config::{MetricType, SearchParams};
use crate::document::{DocumentChunkWithScore, QueryResult, QueryWithEmbedding};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, VectorDbError};
use crate::filter::DocumentMetadataFilter;

/// A query as supplied by a caller: raw text or an already embedded vector.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalQuery {
    /// Free text, embedded by the configured provider.
    Text(String),
    /// A query whose vector is already known.
    Embedded(QueryWithEmbedding),
}

impl From<&str> for RetrievalQuery {
    fn from(text: &str) -> Self {
        RetrievalQuery::Text(text.to_string())
    }
}

impl From<String> for RetrievalQuery {
    fn from(text: String) -> Self {
        RetrievalQuery::Text(text)
    }
}

impl From<QueryWithEmbedding> for RetrievalQuery {
    fn from(query: QueryWithEmbedding) -> Self {
        RetrievalQuery::Embedded(query)
    }
}

/// Embedding resolution, search-parameter selection and result normalization.
#[derive(Clone)]
pub struct QueryEngine {
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    search_params: SearchParams,
    similarity_threshold: Option<f32>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("embedding_provider", &self.embedding_provider.as_ref().map(|p| p.name()))
            .field("search_params", &self.search_params)
            .field("similarity_threshold", &self.similarity_threshold)
            .finish()
    }
}

impl QueryEngine {
    /// Create an engine without an embedding provider.
    pub fn new(search_params: SearchParams) -> Self {
        Self { embedding_provider: None, search_params, similarity_threshold: None }
    }

    /// Attach the provider used to embed text queries.
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Drop hits less relevant than `threshold` (direction follows the metric).
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    /// The search parameters handed to drivers.
    pub fn search_params(&self) -> &SearchParams {
        &self.search_params
    }

    /// The configured embedding provider, if any.
    pub fn embedding_provider(&self) -> Option<&Arc<dyn EmbeddingProvider>> {
        self.embedding_provider.as_ref()
    }

    /// Candidate-list breadth for a search returning `limit` hits.
    pub fn ef_for(&self, limit: usize) -> usize {
        self.search_params.params.ef.max(limit)
    }

    /// Turn a caller query into an embedded query of the given dimension.
    ///
    /// Text is embedded exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`VectorDbError::EmbeddingResolution`] if no provider is
    /// configured, the provider fails, or the vector is empty or of the wrong
    /// dimension.
    pub async fn resolve(
        &self,
        query: RetrievalQuery,
        dimension: usize,
    ) -> Result<QueryWithEmbedding> {
        let resolved = match query {
            RetrievalQuery::Embedded(query) => query,
            RetrievalQuery::Text(text) => {
                let provider = self.embedding_provider.as_ref().ok_or_else(|| {
                    VectorDbError::EmbeddingResolution {
                        provider: "none".to_string(),
                        message: "no embedding provider configured for text queries".to_string(),
                    }
                })?;
                let vectors = provider.embed(&text).await.map_err(|e| {
                    error!(provider = provider.name(), error = %e, "query embedding failed");
                    match e {
                        VectorDbError::EmbeddingResolution { .. } => e,
                        other => VectorDbError::EmbeddingResolution {
                            provider: provider.name().to_string(),
                            message: other.to_string(),
                        },
                    }
                })?;
                debug!(provider = provider.name(), text_len = text.len(), "embedded query text");
                QueryWithEmbedding::with_text(text, vectors)
            }
        };
        check_query(&resolved, dimension)?;
        Ok(resolved)
    }

    /// Flatten per-search hit groups into a [`QueryResult`].
    ///
    /// Each group is ordered by relevance for `metric`, filtered, thresholded
    /// and truncated to `limit`. Groups are concatenated without re-ranking.
    pub fn normalize(
        &self,
        groups: Vec<Vec<DocumentChunkWithScore>>,
        metric: MetricType,
        filter: Option<&DocumentMetadataFilter>,
        limit: usize,
    ) -> QueryResult {
        if groups.is_empty() {
            return QueryResult::empty(metric);
        }

        let mut result = QueryResult {
            data: Vec::new(),
            similarities: Vec::with_capacity(groups.len()),
            ids: Vec::new(),
            metric,
        };
        for mut group in groups {
            group.retain(|hit| {
                filter.is_none_or(|f| f.matches(&hit.chunk))
                    && self.similarity_threshold.is_none_or(|t| !metric.is_better(t, hit.score))
            });
            group.sort_by(|a, b| metric.relevance_order(a.score, b.score));
            group.truncate(limit);

            result.similarities.push(group.iter().map(|hit| hit.score).collect());
            for hit in group {
                result.ids.push(hit.chunk.chunk_id.clone());
                result.data.push(hit);
            }
        }
        result
    }
}

/// Check that an embedded query can be searched against `dimension`.
pub(crate) fn check_query(query: &QueryWithEmbedding, dimension: usize) -> Result<()> {
    if query.vectors.is_empty() {
        return Err(VectorDbError::EmbeddingResolution {
            provider: "query".to_string(),
            message: "query has no vector".to_string(),
        });
    }
    if query.vectors.len() != dimension {
        return Err(VectorDbError::EmbeddingResolution {
            provider: "query".to_string(),
            message: format!(
                "query vector has dimension {}, collection expects {dimension}",
                query.vectors.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::document::{DocumentChunk, DocumentChunkMetadata, Source};

    struct CountingProvider {
        calls: AtomicUsize,
        output: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }

        fn dimensions(&self) -> usize {
            self.output.len()
        }
    }

    fn hit(id: &str, score: f32, source: Source) -> DocumentChunkWithScore {
        let chunk = DocumentChunk::new(id, "t", vec![0.0; 2])
            .with_metadata(DocumentChunkMetadata { source, ..Default::default() });
        DocumentChunkWithScore { chunk, score }
    }

    #[tokio::test]
    async fn text_is_embedded_once() {
        let provider =
            Arc::new(CountingProvider { calls: AtomicUsize::new(0), output: vec![1.0, 0.0] });
        let engine =
            QueryEngine::new(SearchParams::default()).with_embedding_provider(provider.clone());

        let query = engine.resolve("hello".into(), 2).await.unwrap();
        assert_eq!(query.text.as_deref(), Some("hello"));
        assert_eq!(query.vectors, vec![1.0, 0.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_or_mismatched_vectors_fail_resolution() {
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0), output: vec![] });
        let engine = QueryEngine::new(SearchParams::default()).with_embedding_provider(provider);
        assert!(matches!(
            engine.resolve("hello".into(), 2).await,
            Err(VectorDbError::EmbeddingResolution { .. })
        ));

        let embedded = RetrievalQuery::from(QueryWithEmbedding::new(vec![1.0, 2.0, 3.0]));
        assert!(matches!(
            engine.resolve(embedded, 2).await,
            Err(VectorDbError::EmbeddingResolution { .. })
        ));
    }

    #[tokio::test]
    async fn text_without_provider_fails() {
        let engine = QueryEngine::new(SearchParams::default());
        assert!(matches!(
            engine.resolve("hello".into(), 2).await,
            Err(VectorDbError::EmbeddingResolution { .. })
        ));
    }

    #[test]
    fn normalize_orders_each_group_without_merging() {
        let engine = QueryEngine::new(SearchParams::default());
        let groups = vec![
            vec![hit("a", 0.1, Source::Web), hit("b", 0.9, Source::Web)],
            vec![hit("c", 0.5, Source::Web)],
        ];
        let result = engine.normalize(groups, MetricType::Ip, None, 10);
        assert_eq!(result.ids, vec!["b", "a", "c"]);
        assert_eq!(result.similarities, vec![vec![0.9, 0.1], vec![0.5]]);
        assert_eq!(result.data.len(), result.ids.len());
    }

    #[test]
    fn normalize_respects_distance_metrics() {
        let engine = QueryEngine::new(SearchParams::default());
        let groups = vec![vec![hit("far", 4.0, Source::Web), hit("near", 0.5, Source::Web)]];
        let result = engine.normalize(groups, MetricType::L2, None, 1);
        assert_eq!(result.ids, vec!["near"]);
    }

    #[test]
    fn normalize_filters_and_thresholds() {
        let engine = QueryEngine::new(SearchParams::default()).with_similarity_threshold(0.3);
        let filter = DocumentMetadataFilter::new().source(Source::Web);
        let groups = vec![vec![
            hit("web", 0.8, Source::Web),
            hit("other", 0.9, Source::Other),
            hit("weak", 0.2, Source::Web),
        ]];
        let result = engine.normalize(groups, MetricType::Ip, Some(&filter), 10);
        assert_eq!(result.ids, vec!["web"]);
    }

    #[test]
    fn zero_hits_yield_an_empty_group() {
        let engine = QueryEngine::new(SearchParams::default());
        let result = engine.normalize(vec![Vec::new()], MetricType::Ip, None, 10);
        assert!(result.is_empty());
        assert_eq!(result.similarities, vec![Vec::<f32>::new()]);

        let result = engine.normalize(Vec::new(), MetricType::Ip, None, 10);
        assert_eq!(result, QueryResult::empty(MetricType::Ip));
    }
}

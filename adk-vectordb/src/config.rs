//! Configuration for vector store backends.
//!
//! [`VectorStoreConfig`] carries the connection parameters, the embedding
//! dimension, and the index/search parameters a backend driver needs. It is
//! validated once, when built, so a malformed configuration fails at
//! construction rather than at first use.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VectorDbError};

/// Default embedding dimension (`all-minilm-l6-v2`).
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Default number of chunks per insert batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default collection used when callers omit a collection name.
pub const DEFAULT_COLLECTION: &str = "DocumentChunk";

/// Similarity metric used to score vectors against a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    /// Inner product. Larger is more similar.
    #[default]
    Ip,
    /// Squared Euclidean distance. Smaller is more similar.
    L2,
    /// Cosine similarity. Larger is more similar.
    Cosine,
}

impl MetricType {
    /// Whether a larger score means a more relevant hit.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, MetricType::L2)
    }

    /// Returns `true` if score `a` is strictly more relevant than score `b`.
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        if self.higher_is_better() { a > b } else { a < b }
    }

    /// Order two scores so that the more relevant one sorts first.
    pub fn relevance_order(&self, a: f32, b: f32) -> std::cmp::Ordering {
        if self.higher_is_better() { b.total_cmp(&a) } else { a.total_cmp(&b) }
    }

    /// The name Milvus uses for this metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Ip => "IP",
            MetricType::L2 => "L2",
            MetricType::Cosine => "COSINE",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graph construction parameters of an HNSW index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexBuildParams {
    /// Maximum number of links per node on the upper layers.
    #[serde(rename = "M")]
    pub m: usize,
    /// Candidate list breadth while building the graph.
    #[serde(rename = "efConstruction")]
    pub ef_construction: usize,
    /// Backend-specific parameters passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for IndexBuildParams {
    fn default() -> Self {
        Self { m: 8, ef_construction: 64, extra: BTreeMap::new() }
    }
}

/// Index definition in the Milvus JSON shape.
///
/// ```json
/// {"metric_type": "IP", "index_type": "HNSW", "params": {"M": 8, "efConstruction": 64}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Metric the index is built for.
    pub metric_type: MetricType,
    /// ANN algorithm, e.g. `HNSW`.
    pub index_type: String,
    /// Algorithm parameters.
    pub params: IndexBuildParams,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            metric_type: MetricType::Ip,
            index_type: "HNSW".to_string(),
            params: IndexBuildParams::default(),
        }
    }
}

/// Query-time tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchTuning {
    /// Candidate list breadth for graph indexes.
    pub ef: usize,
    /// Number of probed clusters for IVF indexes.
    pub nprobe: usize,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self { ef: 64, nprobe: 10 }
    }
}

/// Search definition in the Milvus JSON shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Metric used to score hits; must match the index metric.
    pub metric_type: MetricType,
    /// Tuning knobs.
    pub params: SearchTuning,
}

/// The backend a [`VectorStoreConfig`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    /// The in-process HNSW reference driver.
    #[default]
    Hnsw,
    /// A Milvus server reached over its REST API.
    Milvus,
}

impl VectorStoreKind {
    /// The configuration token for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorStoreKind::Hnsw => "hnsw",
            VectorStoreKind::Milvus => "milvus",
        }
    }
}

impl fmt::Display for VectorStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorStoreKind {
    type Err = VectorDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hnsw" | "memory" | "inmemory" => Ok(VectorStoreKind::Hnsw),
            "milvus" => Ok(VectorStoreKind::Milvus),
            other => {
                Err(VectorDbError::Configuration(format!("unknown vector store kind '{other}'")))
            }
        }
    }
}

/// Connection and schema configuration of a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Which backend to construct.
    pub kind: VectorStoreKind,
    /// Backend host.
    pub host: String,
    /// Backend port.
    pub port: u16,
    /// Optional user name.
    pub user: Option<String>,
    /// Optional password. Its presence turns on secure transport.
    pub password: Option<String>,
    /// Dimension of every embedding stored in a collection.
    pub embedding_dim: usize,
    /// Maximum number of chunks sent to the backend per insert call.
    pub batch_size: usize,
    /// Index definition used when a collection is created.
    pub index_params: IndexParams,
    /// Search parameters used for every query.
    pub search_params: SearchParams,
    /// Backend consistency level, passed through when set.
    pub consistency_level: Option<String>,
    /// Collection used when an operation omits a collection name and no
    /// collection has been created yet on this store.
    pub default_collection: String,
    /// Transport timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            kind: VectorStoreKind::Hnsw,
            host: "127.0.0.1".to_string(),
            port: 19530,
            user: None,
            password: None,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            batch_size: DEFAULT_BATCH_SIZE,
            index_params: IndexParams::default(),
            search_params: SearchParams::default(),
            consistency_level: None,
            default_collection: DEFAULT_COLLECTION.to_string(),
            timeout_secs: 30,
        }
    }
}

impl VectorStoreConfig {
    /// Create a new builder for constructing a [`VectorStoreConfig`].
    pub fn builder() -> VectorStoreConfigBuilder {
        VectorStoreConfigBuilder::default()
    }

    /// Whether the connection must be secured (a password is configured).
    pub fn use_security(&self) -> bool {
        self.password.is_some()
    }

    /// The metric shared by the index and search parameters.
    pub fn metric(&self) -> MetricType {
        self.index_params.metric_type
    }

    /// Load the configuration from the process environment.
    ///
    /// Reads `VECTOR_DB`, `MILVUS_HOST`, `MILVUS_PORT`, `MILVUS_USER`,
    /// `MILVUS_PASSWORD`, `MILVUS_COLLECTION`, `EMBEDDING_DIM`,
    /// `MILVUS_INDEX_PARAMS`, `MILVUS_SEARCH_PARAMS` and
    /// `MILVUS_CONSISTENCY_LEVEL`.
    ///
    /// # Errors
    ///
    /// Returns [`VectorDbError::Configuration`] if a variable is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(kind) = lookup("VECTOR_DB") {
            builder = builder.kind(kind.parse()?);
        }
        if let Some(host) = lookup("MILVUS_HOST") {
            builder = builder.host(host);
        }
        if let Some(port) = lookup("MILVUS_PORT") {
            let port = port.trim().parse::<u16>().map_err(|e| {
                VectorDbError::Configuration(format!("MILVUS_PORT '{port}' is not a port: {e}"))
            })?;
            builder = builder.port(port);
        }
        if let Some(user) = lookup("MILVUS_USER") {
            builder = builder.user(user);
        }
        if let Some(password) = lookup("MILVUS_PASSWORD") {
            builder = builder.password(password);
        }
        if let Some(collection) = lookup("MILVUS_COLLECTION") {
            builder = builder.default_collection(collection);
        }
        if let Some(dim) = lookup("EMBEDDING_DIM") {
            let dim = dim.trim().parse::<usize>().map_err(|e| {
                VectorDbError::Configuration(format!("EMBEDDING_DIM '{dim}' is not a number: {e}"))
            })?;
            builder = builder.embedding_dim(dim);
        }
        if let Some(raw) = lookup("MILVUS_INDEX_PARAMS") {
            builder = builder.index_params(parse_json_param("MILVUS_INDEX_PARAMS", &raw)?);
        }
        if let Some(raw) = lookup("MILVUS_SEARCH_PARAMS") {
            builder = builder.search_params(parse_json_param("MILVUS_SEARCH_PARAMS", &raw)?);
        }
        if let Some(level) = lookup("MILVUS_CONSISTENCY_LEVEL") {
            builder = builder.consistency_level(level);
        }

        builder.build()
    }

    /// Check that the parameters are internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`VectorDbError::Configuration`] if:
    /// - `embedding_dim == 0` or `batch_size == 0`
    /// - the index and search metrics differ
    /// - `M < 2`, `efConstruction == 0` or `ef == 0`
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(VectorDbError::Configuration(
                "embedding_dim must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(VectorDbError::Configuration(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.index_params.metric_type != self.search_params.metric_type {
            return Err(VectorDbError::Configuration(format!(
                "index metric ({}) and search metric ({}) must match",
                self.index_params.metric_type, self.search_params.metric_type
            )));
        }
        if self.index_params.params.m < 2 {
            return Err(VectorDbError::Configuration(format!(
                "index parameter M ({}) must be at least 2",
                self.index_params.params.m
            )));
        }
        if self.index_params.params.ef_construction == 0 {
            return Err(VectorDbError::Configuration(
                "index parameter efConstruction must be greater than zero".to_string(),
            ));
        }
        if self.search_params.params.ef == 0 {
            return Err(VectorDbError::Configuration(
                "search parameter ef must be greater than zero".to_string(),
            ));
        }
        if self.default_collection.trim().is_empty() {
            return Err(VectorDbError::Configuration(
                "default_collection must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_json_param<T: serde::de::DeserializeOwned>(name: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| VectorDbError::Configuration(format!("{name} is not valid JSON: {e}")))
}

/// Builder for constructing a validated [`VectorStoreConfig`].
#[derive(Debug, Clone, Default)]
pub struct VectorStoreConfigBuilder {
    config: VectorStoreConfig,
}

impl VectorStoreConfigBuilder {
    /// Select the backend.
    pub fn kind(mut self, kind: VectorStoreKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Set the backend host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the backend port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the user name.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self
    }

    /// Set the password. This enables secure transport.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set the embedding dimension of new collections.
    pub fn embedding_dim(mut self, dim: usize) -> Self {
        self.config.embedding_dim = dim;
        self
    }

    /// Set the insert batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Override the index definition.
    pub fn index_params(mut self, params: IndexParams) -> Self {
        self.config.index_params = params;
        self
    }

    /// Override the search parameters.
    pub fn search_params(mut self, params: SearchParams) -> Self {
        self.config.search_params = params;
        self
    }

    /// Use `metric` for both indexing and search.
    pub fn metric(mut self, metric: MetricType) -> Self {
        self.config.index_params.metric_type = metric;
        self.config.search_params.metric_type = metric;
        self
    }

    /// Set the backend consistency level.
    pub fn consistency_level(mut self, level: impl Into<String>) -> Self {
        self.config.consistency_level = Some(level.into());
        self
    }

    /// Set the collection used when a call omits the collection name.
    pub fn default_collection(mut self, name: impl Into<String>) -> Self {
        self.config.default_collection = name.into();
        self
    }

    /// Set the transport timeout.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    /// Build the [`VectorStoreConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`VectorStoreConfig::validate`].
    pub fn build(self) -> Result<VectorStoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_index() {
        let config = VectorStoreConfig::default();
        assert_eq!(config.embedding_dim, 384);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.index_params.metric_type, MetricType::Ip);
        assert_eq!(config.index_params.index_type, "HNSW");
        assert_eq!(config.index_params.params.m, 8);
        assert_eq!(config.index_params.params.ef_construction, 64);
        assert!(!config.use_security());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn password_turns_on_security() {
        let config = VectorStoreConfig::builder().user("root").password("secret").build().unwrap();
        assert!(config.use_security());
    }

    #[test]
    fn parses_milvus_index_params_json() {
        let params: IndexParams = serde_json::from_str(
            r#"{"metric_type": "L2", "index_type": "HNSW", "params": {"M": 16, "efConstruction": 200}}"#,
        )
        .unwrap();
        assert_eq!(params.metric_type, MetricType::L2);
        assert_eq!(params.params.m, 16);
        assert_eq!(params.params.ef_construction, 200);

        let ivf: IndexParams = serde_json::from_str(
            r#"{"metric_type": "IP", "index_type": "IVF_FLAT", "params": {"nlist": 128}}"#,
        )
        .unwrap();
        assert_eq!(ivf.params.extra.get("nlist"), Some(&serde_json::json!(128)));
    }

    #[test]
    fn from_lookup_reads_milvus_variables() {
        let config = VectorStoreConfig::from_lookup(lookup(&[
            ("VECTOR_DB", "milvus"),
            ("MILVUS_HOST", "milvus.internal"),
            ("MILVUS_PORT", "19531"),
            ("MILVUS_PASSWORD", "pw"),
            ("MILVUS_SEARCH_PARAMS", r#"{"metric_type": "IP", "params": {"ef": 128}}"#),
        ]))
        .unwrap();
        assert_eq!(config.kind, VectorStoreKind::Milvus);
        assert_eq!(config.host, "milvus.internal");
        assert_eq!(config.port, 19531);
        assert!(config.use_security());
        assert_eq!(config.search_params.params.ef, 128);
        assert_eq!(config.search_params.params.nprobe, 10);
    }

    #[test]
    fn malformed_configuration_fails_fast() {
        let bad_json = VectorStoreConfig::from_lookup(lookup(&[("MILVUS_INDEX_PARAMS", "{oops")]));
        assert!(matches!(bad_json, Err(VectorDbError::Configuration(_))));

        let bad_port = VectorStoreConfig::from_lookup(lookup(&[("MILVUS_PORT", "port")]));
        assert!(matches!(bad_port, Err(VectorDbError::Configuration(_))));

        let bad_kind = VectorStoreConfig::from_lookup(lookup(&[("VECTOR_DB", "faiss")]));
        assert!(matches!(bad_kind, Err(VectorDbError::Configuration(_))));
    }

    #[test]
    fn rejects_inconsistent_parameters() {
        assert!(VectorStoreConfig::builder().embedding_dim(0).build().is_err());
        assert!(VectorStoreConfig::builder().batch_size(0).build().is_err());

        let mismatched = VectorStoreConfig::builder()
            .search_params(SearchParams { metric_type: MetricType::L2, ..Default::default() })
            .build();
        assert!(matches!(mismatched, Err(VectorDbError::Configuration(_))));

        assert!(VectorStoreConfig::builder().metric(MetricType::Cosine).build().is_ok());
    }

    #[test]
    fn metric_direction_is_explicit() {
        assert!(MetricType::Ip.higher_is_better());
        assert!(MetricType::Cosine.higher_is_better());
        assert!(!MetricType::L2.higher_is_better());
        assert!(MetricType::Ip.is_better(0.9, 0.1));
        assert!(MetricType::L2.is_better(0.1, 0.9));
    }
}

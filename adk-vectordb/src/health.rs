//! Health probes for the vector store and its collaborators.
//!
//! Each probe answers with a [`HealthStatus`] or fails; [`check_health`]
//! runs a set of probes and folds them into one [`HealthReport`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::VectorStoreConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, VectorDbError};
use crate::factory::create_vector_store;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the component is usable.
    pub healthy: bool,
    /// Human-readable detail.
    pub message: String,
}

impl HealthStatus {
    /// A healthy status with `message`.
    pub fn healthy(message: impl Into<String>) -> Self {
        Self { healthy: true, message: message.into() }
    }

    /// An unhealthy status with `message`.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self { healthy: false, message: message.into() }
    }
}

/// A component that can report whether it is usable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Component name used as the key in [`HealthReport::components`].
    fn name(&self) -> &str;

    /// Check the component.
    async fn probe(&self) -> Result<HealthStatus>;
}

/// Aggregate of every probe's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `true` only if every component is healthy.
    pub healthy: bool,
    /// Status per component name.
    pub components: BTreeMap<String, HealthStatus>,
}

/// Run every probe in order. A probe that fails counts as unhealthy.
pub async fn check_health(probes: &[&dyn HealthProbe]) -> HealthReport {
    let mut components = BTreeMap::new();
    for probe in probes {
        let status = match probe.probe().await {
            Ok(status) => status,
            Err(e) => HealthStatus::unhealthy(format!("{} health check failed: {e}", probe.name())),
        };
        if status.healthy {
            debug!(component = probe.name(), "health check passed");
        } else {
            warn!(component = probe.name(), message = %status.message, "health check failed");
        }
        components.insert(probe.name().to_string(), status);
    }
    HealthReport { healthy: components.values().all(|s| s.healthy), components }
}

/// Healthy when a store can be built for the configured backend.
///
/// Only construction is exercised; no collection is touched.
#[derive(Debug, Clone)]
pub struct VectorStoreProbe {
    config: VectorStoreConfig,
}

impl VectorStoreProbe {
    /// Probe the backend described by `config`.
    pub fn new(config: VectorStoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HealthProbe for VectorStoreProbe {
    fn name(&self) -> &str {
        "vectordb"
    }

    async fn probe(&self) -> Result<HealthStatus> {
        let store = create_vector_store(&self.config, None).await?;
        Ok(HealthStatus::healthy(format!("{} vector store is operational", store.kind())))
    }
}

/// Healthy when a directory exists (or can be created) and is writable.
#[derive(Debug, Clone)]
pub struct FileSystemProbe {
    dir: PathBuf,
}

impl FileSystemProbe {
    /// File name written and removed by the probe.
    pub const PROBE_FILE: &'static str = "test_write.txt";

    /// Probe `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl HealthProbe for FileSystemProbe {
    fn name(&self) -> &str {
        "file_system"
    }

    async fn probe(&self) -> Result<HealthStatus> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::PROBE_FILE);
        tokio::fs::write(&path, b"test").await?;
        tokio::fs::remove_file(&path).await?;
        Ok(HealthStatus::healthy("file system is accessible and writable"))
    }
}

/// Healthy when the provider embeds a short text at its declared dimension.
pub struct EmbeddingProbe {
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingProbe {
    /// Probe `provider`.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl HealthProbe for EmbeddingProbe {
    fn name(&self) -> &str {
        "embedding"
    }

    async fn probe(&self) -> Result<HealthStatus> {
        let vector = self.provider.embed("health check").await?;
        let expected = self.provider.dimensions();
        if vector.len() != expected {
            return Err(VectorDbError::EmbeddingResolution {
                provider: self.provider.name().to_string(),
                message: format!("expected dimension {expected}, got {}", vector.len()),
            });
        }
        Ok(HealthStatus::healthy(format!(
            "{} produces {expected}-dimension embeddings",
            self.provider.name()
        )))
    }
}

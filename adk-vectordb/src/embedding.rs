//! Embedding provider trait for turning text into query vectors.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::Result;

/// A provider that generates vector embeddings from text input.
///
/// The vector store itself never chunks or embeds documents; it only calls a
/// provider to resolve free-text queries. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use adk_vectordb::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Short name used in logs and errors.
    fn name(&self) -> &str {
        "embedding"
    }
}

/// On-disk layout for [`save_embeddings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingFileFormat {
    /// A single JSON array of arrays.
    Json,
    /// One vector per line, components separated by spaces.
    Txt,
}

impl std::str::FromStr for EmbeddingFileFormat {
    type Err = crate::error::VectorDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "txt" => Ok(Self::Txt),
            other => Err(crate::error::VectorDbError::Configuration(format!(
                "unsupported embedding file format '{other}'"
            ))),
        }
    }
}

/// Write embeddings to `path` in the given format.
///
/// # Errors
///
/// Returns [`VectorDbError::Io`](crate::VectorDbError::Io) if the file cannot be written.
pub fn save_embeddings(
    embeddings: &[Vec<f32>],
    path: impl AsRef<Path>,
    format: EmbeddingFileFormat,
) -> Result<()> {
    let path = path.as_ref();
    let written = write_embeddings(embeddings, path, format);
    match &written {
        Ok(()) => {
            info!(path = %path.display(), ?format, count = embeddings.len(), "saved embeddings")
        }
        Err(e) => error!(path = %path.display(), error = %e, "failed to save embeddings"),
    }
    written
}

fn write_embeddings(
    embeddings: &[Vec<f32>],
    path: &Path,
    format: EmbeddingFileFormat,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    match format {
        EmbeddingFileFormat::Json => {
            serde_json::to_writer(&mut writer, embeddings).map_err(std::io::Error::from)?;
        }
        EmbeddingFileFormat::Txt => {
            for embedding in embeddings {
                let line: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
                writeln!(writer, "{}", line.join(" "))?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_json_and_txt() {
        let dir = tempfile::tempdir().unwrap();
        let embeddings = vec![vec![1.0, 2.5], vec![-0.5, 0.0]];

        let json_path = dir.path().join("e.json");
        save_embeddings(&embeddings, &json_path, EmbeddingFileFormat::Json).unwrap();
        let parsed: Vec<Vec<f32>> =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed, embeddings);

        let txt_path = dir.path().join("e.txt");
        save_embeddings(&embeddings, &txt_path, EmbeddingFileFormat::Txt).unwrap();
        assert_eq!(std::fs::read_to_string(&txt_path).unwrap(), "1 2.5\n-0.5 0\n");
    }

    #[test]
    fn rejects_unknown_format() {
        assert!("csv".parse::<EmbeddingFileFormat>().is_err());
        assert_eq!("txt".parse::<EmbeddingFileFormat>().unwrap(), EmbeddingFileFormat::Txt);
    }
}

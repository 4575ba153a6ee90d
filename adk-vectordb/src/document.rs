//! Data types for documents, chunks, queries, and search results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MetricType;

/// The origin of a chunk. Unknown or missing values map to [`Source::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Crawled or uploaded web content.
    Web,
    /// An uploaded file.
    File,
    /// An email message.
    Email,
    /// A chat transcript.
    Chat,
    /// Anything else, including values this crate does not know about.
    #[default]
    #[serde(other)]
    Other,
}

impl Source {
    /// The lowercase token stored in the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Web => "web",
            Source::File => "file",
            Source::Email => "email",
            Source::Chat => "chat",
            Source::Other => "other",
        }
    }

    /// Parse a stored token, falling back to [`Source::Other`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "web" => Source::Web,
            "file" => Source::File,
            "email" => Source::Email,
            "chat" => Source::Chat,
            _ => Source::Other,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to every chunk. Absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentChunkMetadata {
    /// Where the chunk came from.
    pub source: Source,
    /// Identifier of the chunk within its source system.
    pub source_id: String,
    /// Link back to the original content.
    pub url: String,
    /// Creation timestamp, RFC 3339 or `YYYY-MM-DD`.
    pub created_at: String,
    /// Author of the original content.
    pub author: String,
}

/// A segment of a [`Document`] with its vector embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Identifier of the chunk, unique within its document.
    pub chunk_id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The embedding for this chunk's text.
    #[serde(default)]
    pub vectors: Vec<f32>,
    /// The ID of the parent [`Document`].
    #[serde(default)]
    pub document_id: String,
    /// Metadata describing the chunk's origin.
    #[serde(default)]
    pub metadata: DocumentChunkMetadata,
}

impl DocumentChunk {
    /// Create a chunk with default metadata. The document id is set on insert.
    pub fn new(chunk_id: impl Into<String>, text: impl Into<String>, vectors: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            text: text.into(),
            vectors,
            document_id: String::new(),
            metadata: DocumentChunkMetadata::default(),
        }
    }

    /// Replace the chunk metadata.
    pub fn with_metadata(mut self, metadata: DocumentChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A source document and the chunks produced from it by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier for the document.
    pub document_id: String,
    /// Display name, usually the file name.
    pub name: String,
    /// The document's chunks in ingestion order.
    pub chunks: Vec<DocumentChunk>,
}

impl Document {
    /// Create a document with a freshly generated UUID v4 identifier.
    pub fn new(name: impl Into<String>, chunks: Vec<DocumentChunk>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name, chunks)
    }

    /// Create a document with a caller-assigned identifier.
    pub fn with_id(
        document_id: impl Into<String>,
        name: impl Into<String>,
        chunks: Vec<DocumentChunk>,
    ) -> Self {
        Self { document_id: document_id.into(), name: name.into(), chunks }
    }
}

/// A query with its resolved embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryWithEmbedding {
    /// The original query text, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// The query vector.
    pub vectors: Vec<f32>,
}

impl QueryWithEmbedding {
    /// A query built from a bare vector.
    pub fn new(vectors: Vec<f32>) -> Self {
        Self { text: None, vectors }
    }

    /// A query that remembers the text its vector was computed from.
    pub fn with_text(text: impl Into<String>, vectors: Vec<f32>) -> Self {
        Self { text: Some(text.into()), vectors }
    }
}

/// A retrieved [`DocumentChunk`] paired with its backend-native score.
///
/// How to read `score` depends on the collection's [`MetricType`]; see
/// [`MetricType::higher_is_better`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunkWithScore {
    /// The retrieved chunk.
    #[serde(flatten)]
    pub chunk: DocumentChunk,
    /// The raw metric value reported by the backend.
    pub score: f32,
}

/// The outcome of a search.
///
/// `data` and `ids` are parallel: `ids[i] == data[i].chunk.chunk_id`.
/// `similarities` holds one group of raw scores per underlying search call.
/// Ordering is by relevance within each group only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Retrieved chunks, most relevant first within each group.
    pub data: Vec<DocumentChunkWithScore>,
    /// Raw scores grouped per search call.
    pub similarities: Vec<Vec<f32>>,
    /// Chunk identifiers parallel to `data`.
    pub ids: Vec<String>,
    /// The metric the scores were computed with.
    pub metric: MetricType,
}

impl QueryResult {
    /// A result with no hits and a single empty similarity group.
    pub fn empty(metric: MetricType) -> Self {
        Self { data: Vec::new(), similarities: vec![Vec::new()], ids: Vec::new(), metric }
    }

    /// Number of retrieved chunks.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_falls_back_to_other() {
        assert_eq!(Source::parse("web"), Source::Web);
        assert_eq!(Source::parse(" EMAIL "), Source::Email);
        assert_eq!(Source::parse(""), Source::Other);
        assert_eq!(Source::parse("fax"), Source::Other);

        let parsed: Source = serde_json::from_str("\"carrier-pigeon\"").unwrap();
        assert_eq!(parsed, Source::Other);
    }

    #[test]
    fn missing_metadata_fields_default_to_empty_strings() {
        let chunk: DocumentChunk =
            serde_json::from_str(r#"{"chunk_id": "c1", "text": "hello"}"#).unwrap();
        assert_eq!(chunk.metadata.source, Source::Other);
        assert_eq!(chunk.metadata.author, "");
        assert_eq!(chunk.metadata.created_at, "");
        assert!(chunk.vectors.is_empty());
    }

    #[test]
    fn system_assigned_document_ids_are_unique() {
        let a = Document::new("a.pdf", vec![]);
        let b = Document::new("a.pdf", vec![]);
        assert_ne!(a.document_id, b.document_id);
    }

    #[test]
    fn scored_chunk_serializes_flat() {
        let scored = DocumentChunkWithScore {
            chunk: DocumentChunk::new("c1", "text", vec![1.0]),
            score: 0.5,
        };
        let value = serde_json::to_value(&scored).unwrap();
        assert_eq!(value["chunk_id"], "c1");
        assert_eq!(value["score"], 0.5);
    }

    #[test]
    fn empty_result_has_one_empty_group() {
        let result = QueryResult::empty(MetricType::Ip);
        assert!(result.is_empty());
        assert_eq!(result.similarities, vec![Vec::<f32>::new()]);
        assert_eq!(result.ids.len(), result.data.len());
    }
}

//! Metadata filtering for similarity search.
//!
//! A [`DocumentMetadataFilter`] is a conjunction of set-membership tests on
//! chunk fields plus an inclusive date range on `created_at`. Drivers may push
//! the set-membership part down to the backend with
//! [`DocumentMetadataFilter::to_expression`], but every hit they return is
//! checked with [`DocumentMetadataFilter::matches`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{DocumentChunk, Source};

/// A predicate over chunk metadata evaluated at search time.
///
/// Empty sets and `None` bounds do not constrain the search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadataFilter {
    /// Accept chunks belonging to one of these documents.
    pub document_ids: Vec<String>,
    /// Accept chunks from one of these sources.
    pub sources: Vec<Source>,
    /// Accept chunks with one of these source ids.
    pub source_ids: Vec<String>,
    /// Accept chunks written by one of these authors.
    pub authors: Vec<String>,
    /// Accept chunks created at or after this instant.
    pub start_date: Option<DateTime<Utc>>,
    /// Accept chunks created at or before this instant.
    pub end_date: Option<DateTime<Utc>>,
}

impl DocumentMetadataFilter {
    /// A filter that accepts every chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a single document.
    pub fn document_id(mut self, id: impl Into<String>) -> Self {
        self.document_ids.push(id.into());
        self
    }

    /// Restrict to a source. Repeated calls widen the accepted set.
    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Restrict to a source id. Repeated calls widen the accepted set.
    pub fn source_id(mut self, id: impl Into<String>) -> Self {
        self.source_ids.push(id.into());
        self
    }

    /// Restrict to an author. Repeated calls widen the accepted set.
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    /// Inclusive lower bound on `created_at`.
    pub fn start_date(mut self, date: DateTime<Utc>) -> Self {
        self.start_date = Some(date);
        self
    }

    /// Inclusive upper bound on `created_at`.
    pub fn end_date(mut self, date: DateTime<Utc>) -> Self {
        self.end_date = Some(date);
        self
    }

    /// Returns `true` if the filter accepts every chunk.
    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
            && self.sources.is_empty()
            && self.source_ids.is_empty()
            && self.authors.is_empty()
            && self.start_date.is_none()
            && self.end_date.is_none()
    }

    /// Evaluate the filter against a chunk.
    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        let meta = &chunk.metadata;
        if !self.document_ids.is_empty() && !self.document_ids.contains(&chunk.document_id) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.contains(&meta.source) {
            return false;
        }
        if !self.source_ids.is_empty() && !self.source_ids.contains(&meta.source_id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&meta.author) {
            return false;
        }
        if self.start_date.is_none() && self.end_date.is_none() {
            return true;
        }

        let Some(created_at) = parse_timestamp(&meta.created_at) else {
            return false;
        };
        if self.start_date.is_some_and(|start| created_at < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| created_at > end) {
            return false;
        }
        true
    }

    /// Render the set-membership conditions as a Milvus boolean expression.
    ///
    /// Returns `None` when there is nothing to push down. Date bounds are not
    /// rendered because `created_at` is stored as free-form text.
    pub fn to_expression(&self) -> Option<String> {
        let mut clauses = Vec::new();
        push_membership(&mut clauses, "document_id", self.document_ids.iter().map(String::as_str));
        push_membership(&mut clauses, "source", self.sources.iter().map(Source::as_str));
        push_membership(&mut clauses, "source_id", self.source_ids.iter().map(String::as_str));
        push_membership(&mut clauses, "author", self.authors.iter().map(String::as_str));
        if clauses.is_empty() { None } else { Some(clauses.join(" and ")) }
    }
}

fn push_membership<'a>(
    clauses: &mut Vec<String>,
    field: &str,
    values: impl Iterator<Item = &'a str>,
) {
    let quoted: Vec<String> = values.map(quote).collect();
    if !quoted.is_empty() {
        clauses.push(format!("{field} in [{}]", quoted.join(", ")));
    }
}

/// Quote a string literal for a Milvus expression.
pub(crate) fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parse `created_at` as RFC 3339, `YYYY-MM-DD HH:MM:SS`, or `YYYY-MM-DD` (UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

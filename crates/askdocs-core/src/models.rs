//! Core data models that flow through the question-answering pipeline.
//!
//! Documents are produced by loaders, split into [`Chunk`]s, embedded into
//! [`EmbeddedVector`]s and assembled into an
//! [`IndexSnapshot`](crate::index::IndexSnapshot). Answers are recorded as
//! [`ConversationTurn`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance attached to a raw document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Where the document came from: `filesystem`, `upload`, `notion`, ...
    pub source_type: String,
    /// Original file name or page title, used for citations.
    pub title: Option<String>,
    /// Original path (relative to the loaded root, or the upload name).
    pub path: Option<String>,
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// MIME type of the original bytes.
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

/// A loaded document before chunking. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    pub source_uri: String,
    pub full_text: String,
    pub metadata: DocumentMetadata,
}

impl RawDocument {
    /// Build a document whose id is derived from its source URI, so
    /// reloading the same source yields the same chunk ids.
    pub fn new(
        source_uri: impl Into<String>,
        full_text: impl Into<String>,
        metadata: DocumentMetadata,
    ) -> Self {
        let source_uri = source_uri.into();
        let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, source_uri.as_bytes()).to_string();
        Self {
            id,
            source_uri,
            full_text: full_text.into(),
            metadata,
        }
    }

    /// Human-readable name for citations: title, then path, then URI.
    pub fn display_name(&self) -> &str {
        self.metadata
            .title
            .as_deref()
            .or(self.metadata.path.as_deref())
            .unwrap_or(&self.source_uri)
    }
}

/// A bounded slice of a document; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Position within the parent document, starting at 0.
    pub ordinal: i64,
    /// Exact slice of the parent text.
    pub text: String,
    /// Byte range `[start, end)` of `text` within the parent text.
    pub char_span: (usize, usize),
    /// SHA-256 of `text`.
    pub hash: String,
    pub source_uri: String,
    pub title: String,
}

/// A chunk's embedding, tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedVector {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model_id: String,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One question/answer exchange in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: Option<&str>) -> DocumentMetadata {
        DocumentMetadata {
            source_type: "upload".to_string(),
            title: title.map(str::to_string),
            path: Some("docs/a.txt".to_string()),
            author: None,
            timestamp: Utc::now(),
            content_type: "text/plain".to_string(),
        }
    }

    #[test]
    fn test_document_id_stable_for_same_uri() {
        let a = RawDocument::new("file:///a.txt", "one", meta(None));
        let b = RawDocument::new("file:///a.txt", "two", meta(None));
        let c = RawDocument::new("file:///b.txt", "one", meta(None));
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let titled = RawDocument::new("file:///a.txt", "", meta(Some("a.txt")));
        assert_eq!(titled.display_name(), "a.txt");
        let untitled = RawDocument::new("file:///a.txt", "", meta(None));
        assert_eq!(untitled.display_name(), "docs/a.txt");
    }

    #[test]
    fn test_metadata_content_type_defaults_when_missing() {
        let json = r#"{"source_type":"notion","title":null,"path":null,"author":null,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let parsed: DocumentMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.content_type, "text/plain");
    }
}

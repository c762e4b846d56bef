//! Error taxonomy shared by every pipeline component.
//!
//! Each component boundary (loader, embedder, index, generator, session)
//! returns [`QaError`] so callers can tell a transient backend hiccup from
//! storage corruption that needs a rebuild.

use thiserror::Error;

/// Result alias for askdocs operations.
pub type Result<T> = std::result::Result<T, QaError>;

#[derive(Debug, Error)]
pub enum QaError {
    /// Input document has an extension/content type we cannot read.
    #[error("unsupported format '{format}': {reason}")]
    UnsupportedFormat { format: String, reason: String },

    /// Embedding backend could not be reached, loaded, or returned garbage.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Answer-generation backend failed (rate limit, auth, network).
    #[error("generation backend unavailable: {0}")]
    GenerationUnavailable(String),

    /// A backend call exceeded its time budget.
    #[error("{backend} backend timed out after {secs}s")]
    BackendTimeout { backend: &'static str, secs: u64 },

    #[error("no index snapshot found at {0}")]
    IndexNotFound(String),

    #[error("index snapshot is corrupt: {0}")]
    IndexCorrupt(String),

    /// The snapshot was built with a different embedding model than the
    /// one used to embed the query.
    #[error("embedding model mismatch: index built with '{index}', query embedded with '{query}'")]
    ModelMismatch { index: String, query: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("a rebuild is already in progress")]
    RebuildInProgress,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O failure while reading sources or writing a snapshot.
    #[error("storage error: {0}")]
    Storage(String),
}

impl QaError {
    pub fn unsupported(format: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Backend failures a caller may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QaError::EmbeddingUnavailable(_)
                | QaError::GenerationUnavailable(_)
                | QaError::BackendTimeout { .. }
                | QaError::RebuildInProgress
        )
    }

    /// Storage-layer failures that can only be fixed by reindexing.
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, QaError::IndexNotFound(_) | QaError::IndexCorrupt(_))
    }

    /// Stable machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::UnsupportedFormat { .. } => "unsupported_format",
            QaError::EmbeddingUnavailable(_) => "embedding_unavailable",
            QaError::GenerationUnavailable(_) => "generation_unavailable",
            QaError::BackendTimeout { .. } => "backend_timeout",
            QaError::IndexNotFound(_) => "index_not_found",
            QaError::IndexCorrupt(_) => "index_corrupt",
            QaError::ModelMismatch { .. } => "model_mismatch",
            QaError::DimensionMismatch { .. } => "dimension_mismatch",
            QaError::RebuildInProgress => "rebuild_in_progress",
            QaError::InvalidInput(_) => "bad_request",
            QaError::Storage(_) => "storage",
        }
    }
}

impl From<std::io::Error> for QaError {
    fn from(err: std::io::Error) -> Self {
        QaError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(QaError::EmbeddingUnavailable("down".into()).is_transient());
        assert!(QaError::BackendTimeout {
            backend: "generation",
            secs: 5
        }
        .is_transient());
        assert!(!QaError::IndexCorrupt("bad".into()).is_transient());
    }

    #[test]
    fn test_requires_rebuild() {
        assert!(QaError::IndexCorrupt("bad".into()).requires_rebuild());
        assert!(QaError::IndexNotFound("/tmp/x".into()).requires_rebuild());
        assert!(!QaError::RebuildInProgress.requires_rebuild());
    }

    #[test]
    fn test_display_messages() {
        let err = QaError::ModelMismatch {
            index: "a".into(),
            query: "b".into(),
        };
        assert_eq!(
            err.to_string(),
            "embedding model mismatch: index built with 'a', query embedded with 'b'"
        );
        assert_eq!(
            QaError::unsupported("exe", "no extractor").to_string(),
            "unsupported format 'exe': no extractor"
        );
    }
}

//! In-memory vector index.
//!
//! An [`IndexSnapshot`] is one immutable generation of the index: every
//! chunk of a corpus together with its embedding, tagged with the model
//! that produced the vectors. Snapshots are only ever replaced wholesale by
//! a rebuild; persistence lives in the app crate's `store` module.
//!
//! Queries are exact: every entry is scored with cosine similarity. Corpora
//! handled here are small (a few uploaded files), so a linear scan beats
//! maintaining an ANN structure that must be rebuilt on every upload anyway.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::embedding::{cosine_similarity, embed_batched, vec_to_blob, Embedder};
use crate::error::{QaError, Result};
use crate::models::{Chunk, EmbeddedVector, ScoredChunk};

/// Version of the snapshot layout; bumped on incompatible changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Number of passages retrieved when the caller does not say.
pub const DEFAULT_TOP_K: i64 = 4;

/// A chunk and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: EmbeddedVector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub schema_version: u32,
    pub generation_id: String,
    pub model_id: String,
    pub dims: usize,
    pub created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
    by_id: HashMap<String, usize>,
}

impl IndexSnapshot {
    /// An empty generation for `model_id`.
    pub fn empty(model_id: impl Into<String>, dims: usize) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generation_id: Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            dims,
            created_at: Utc::now(),
            entries: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Reassemble a snapshot from stored parts, checking that every entry
    /// agrees with the snapshot's model and dimensionality.
    ///
    /// # Errors
    ///
    /// [`QaError::IndexCorrupt`] on any inconsistency.
    pub fn from_parts(
        generation_id: String,
        model_id: String,
        dims: usize,
        created_at: DateTime<Utc>,
        entries: Vec<IndexEntry>,
    ) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (pos, entry) in entries.iter().enumerate() {
            if entry.embedding.chunk_id != entry.chunk.id {
                return Err(QaError::IndexCorrupt(format!(
                    "vector for '{}' is attached to chunk '{}'",
                    entry.embedding.chunk_id, entry.chunk.id
                )));
            }
            if entry.embedding.vector.len() != dims {
                return Err(QaError::IndexCorrupt(format!(
                    "chunk '{}' has a {}-dim vector, snapshot declares {}",
                    entry.chunk.id,
                    entry.embedding.vector.len(),
                    dims
                )));
            }
            if entry.embedding.model_id != model_id {
                return Err(QaError::IndexCorrupt(format!(
                    "chunk '{}' was embedded with '{}', snapshot declares '{}'",
                    entry.chunk.id, entry.embedding.model_id, model_id
                )));
            }
            if by_id.insert(entry.chunk.id.clone(), pos).is_some() {
                return Err(QaError::IndexCorrupt(format!(
                    "duplicate chunk id '{}'",
                    entry.chunk.id
                )));
            }
        }

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            generation_id,
            model_id,
            dims,
            created_at,
            entries,
            by_id,
        })
    }

    /// Embed `chunks` and assemble a new generation.
    ///
    /// Nothing is returned unless every chunk was embedded, so a failure
    /// part-way leaves the caller's current snapshot as the only one.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Self> {
        let model_id = embedder.model_id().to_string();
        let dims = embedder.dims();

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embed_batched(embedder, &texts, batch_size).await?
        };

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                embedding: EmbeddedVector {
                    chunk_id: chunk.id.clone(),
                    vector,
                    model_id: model_id.clone(),
                },
                chunk,
            })
            .collect();

        let snapshot = Self::from_parts(
            Uuid::new_v4().to_string(),
            model_id,
            dims,
            Utc::now(),
            entries,
        )?;
        tracing::debug!(
            generation = %snapshot.generation_id,
            model = %snapshot.model_id,
            entries = snapshot.len(),
            "built index snapshot"
        );
        Ok(snapshot)
    }

    /// Return the `k` entries most similar to `query_vector`.
    ///
    /// Results are sorted by score descending; equal scores are ordered by
    /// chunk ordinal, then by position in the snapshot. NaN scores rank
    /// below every number.
    ///
    /// # Errors
    ///
    /// - [`QaError::InvalidInput`] when `k <= 0`.
    /// - [`QaError::DimensionMismatch`] when the query vector's length
    ///   differs from the snapshot's `dims` (and the snapshot is non-empty).
    pub fn query(&self, query_vector: &[f32], k: i64) -> Result<Vec<ScoredChunk>> {
        if k <= 0 {
            return Err(QaError::invalid(format!("k must be positive, got {}", k)));
        }
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query_vector.len() != self.dims {
            return Err(QaError::DimensionMismatch {
                expected: self.dims,
                actual: query_vector.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (pos, cosine_similarity(query_vector, &e.embedding.vector)))
            .collect();

        // total_cmp puts positive NaN above +inf; map NaN to -inf first.
        let rank = |score: f32| if score.is_nan() { f32::NEG_INFINITY } else { score };
        scored.sort_by(|(pa, sa), (pb, sb)| {
            rank(*sb)
                .total_cmp(&rank(*sa))
                .then_with(|| {
                    self.entries[*pa]
                        .chunk
                        .ordinal
                        .cmp(&self.entries[*pb].chunk.ordinal)
                })
                .then_with(|| pa.cmp(pb))
        });
        scored.truncate(k as usize);
        tracing::debug!(
            generation = %self.generation_id,
            hits = scored.len(),
            top_score = scored.first().map(|(_, s)| *s),
            "scored index query"
        );

        Ok(scored
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: self.entries[pos].chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, chunk_id: &str) -> Option<&IndexEntry> {
        self.by_id.get(chunk_id).map(|&pos| &self.entries[pos])
    }

    /// Number of distinct source documents in this generation.
    pub fn document_count(&self) -> usize {
        let mut ids: Vec<&str> = self
            .entries
            .iter()
            .map(|e| e.chunk.document_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// SHA-256 over the model, dims and every entry's id, text and vector.
    ///
    /// Stored alongside a persisted snapshot and recomputed on load to
    /// detect tampering or partial writes.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model_id.as_bytes());
        hasher.update((self.dims as u64).to_le_bytes());
        for entry in &self.entries {
            hasher.update(entry.chunk.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.chunk.text.as_bytes());
            hasher.update([0u8]);
            hasher.update(vec_to_blob(&entry.embedding.vector));
        }
        hex::encode(hasher.finalize())
    }
}

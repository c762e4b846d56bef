//! Embedding capability trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! the batching/truncation helper [`embed_batched`] the indexer goes
//! through, plus pure helpers for vector serialization and similarity.
//!
//! Network-backed implementations (OpenAI, Ollama, fastembed) live in the
//! `askdocs` app crate. [`HashEmbedder`] lives here because it is pure
//! computation: a deterministic feature-hashing bag-of-words model used
//! for tests and offline runs.

use async_trait::async_trait;

use crate::error::{QaError, Result};

/// Default per-input truncation length when a backend does not say.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8_000;

/// Trait for embedding backends.
///
/// Implementations must be deterministic for a fixed model version: the
/// same text always maps to the same vector, which is what allows a
/// persisted index to be reused across runs.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable model identifier (e.g. `"text-embedding-3-small"`), recorded
    /// in every snapshot built with this embedder.
    fn model_id(&self) -> &str;

    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Longest input (in bytes) the model accepts; longer inputs are
    /// truncated by [`embed_batched`].
    fn max_input_chars(&self) -> usize {
        DEFAULT_MAX_INPUT_CHARS
    }

    /// Embed a batch of texts, returning one vector per input, in order.
    ///
    /// # Errors
    ///
    /// [`QaError::EmbeddingUnavailable`] when the backend cannot be reached
    /// or loaded.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of `batch_size`, truncating oversized inputs.
///
/// Validates that the backend returned exactly one vector of
/// [`Embedder::dims`] length per input; anything else is reported as
/// [`QaError::EmbeddingUnavailable`].
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let max_chars = embedder.max_input_chars();
    let dims = embedder.dims();
    let mut out = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size) {
        let inputs: Vec<String> = batch
            .iter()
            .map(|t| truncate_input(t, max_chars).to_string())
            .collect();

        let vectors = embedder.embed(&inputs).await?;
        if vectors.len() != inputs.len() {
            return Err(QaError::EmbeddingUnavailable(format!(
                "backend returned {} vectors for {} inputs",
                vectors.len(),
                inputs.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(QaError::EmbeddingUnavailable(format!(
                "backend returned a {}-dim vector, model '{}' declares {}",
                bad.len(),
                embedder.model_id(),
                dims
            )));
        }
        out.extend(vectors);
    }

    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embed_batched(embedder, &[text.to_string()], 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| QaError::EmbeddingUnavailable("empty embedding response".to_string()))
}

/// Truncate `text` to at most `max_chars` bytes on a char boundary.
pub fn truncate_input(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Encode a float vector as little-endian f32 bytes.
///
/// # Example
///
/// ```rust
/// use askdocs_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ============ Hash Embedder ============

/// Deterministic feature-hashing embedder.
///
/// Lowercases the input, splits it into alphanumeric terms, hashes each
/// term (FNV-1a) into one of `dims` buckets with a hash-derived sign, and
/// L2-normalizes the result. Texts sharing vocabulary land close together,
/// which is enough for offline retrieval and tests; it carries no semantic
/// knowledge beyond term overlap.
pub struct HashEmbedder {
    model_id: String,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            model_id: format!("hash-{}", dims),
            dims,
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for term in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(term.as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

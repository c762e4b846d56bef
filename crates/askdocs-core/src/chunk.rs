//! Boundary-aware text chunker with overlap.
//!
//! Splits a [`RawDocument`] into [`Chunk`]s no longer than `max_chars`
//! bytes. Every chunk is an exact slice of the parent text and records its
//! byte span, so the parent can be rebuilt with [`reassemble`].
//!
//! # Algorithm
//!
//! 1. If the rest of the text fits in `max_chars`, emit it and stop.
//! 2. Otherwise look inside the next `max_chars` window for the last cut
//!    point, preferring a paragraph break (`\n\n`), then a sentence end
//!    (`.`, `!`, `?` followed by whitespace), then any whitespace.
//! 3. With no usable boundary, hard-cut at the window end (snapped back
//!    to a UTF-8 char boundary).
//! 4. Start the next chunk `overlap_chars` before the cut so the tail of
//!    one chunk is repeated at the head of the next.
//!
//! A cut is only usable if it lies past `start + overlap_chars`, which
//! guarantees forward progress.
//!
//! # Example
//!
//! ```rust
//! use askdocs_core::chunk::{chunk_document, reassemble};
//! # use askdocs_core::models::{DocumentMetadata, RawDocument};
//! # let meta = DocumentMetadata {
//! #     source_type: "upload".into(), title: None, path: None, author: None,
//! #     timestamp: chrono::Utc::now(), content_type: "text/plain".into(),
//! # };
//! let doc = RawDocument::new("mem://a", "Hello world.\n\nSecond paragraph.", meta);
//! let chunks = chunk_document(&doc, 16, 4).unwrap();
//! assert!(chunks.len() > 1);
//! assert_eq!(reassemble(&chunks), doc.full_text);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{QaError, Result};
use crate::models::{Chunk, RawDocument};

/// Approximate characters-per-token ratio used to turn token budgets
/// from the config into byte budgets.
pub const CHARS_PER_TOKEN: usize = 4;

/// Smallest accepted `max_chars`: one UTF-8 char of any width must fit.
pub const MIN_CHUNK_CHARS: usize = 4;

/// Convert a token budget into a character budget.
pub fn tokens_to_chars(tokens: usize) -> usize {
    tokens * CHARS_PER_TOKEN
}

/// Split a document into overlapping chunks.
///
/// # Errors
///
/// [`QaError::InvalidInput`] when `max_chars` is below [`MIN_CHUNK_CHARS`]
/// or `overlap_chars` is not smaller than `max_chars`.
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields no chunks.
/// - Ordinals are contiguous: `0, 1, …, N-1`.
/// - `chunk.text.len() <= max_chars` for every chunk.
/// - [`reassemble`] returns the original text exactly.
pub fn chunk_document(
    doc: &RawDocument,
    max_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<Chunk>> {
    if max_chars < MIN_CHUNK_CHARS {
        return Err(QaError::invalid(format!(
            "chunk max size must be at least {} bytes, got {}",
            MIN_CHUNK_CHARS, max_chars
        )));
    }
    if overlap_chars >= max_chars {
        return Err(QaError::invalid(format!(
            "chunk overlap ({}) must be smaller than max size ({})",
            overlap_chars, max_chars
        )));
    }

    let text = doc.full_text.as_str();
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal: i64 = 0;

    loop {
        if text.len() - start <= max_chars {
            chunks.push(make_chunk(doc, ordinal, start, text.len()));
            break;
        }

        // Never empty: the first char is at most MIN_CHUNK_CHARS wide.
        let window_end = snap_to_char_boundary(text, start + max_chars);

        let min_cut = start + overlap_chars + 1;
        let cut = find_cut(text, start, window_end, min_cut).unwrap_or(window_end);
        chunks.push(make_chunk(doc, ordinal, start, cut));
        ordinal += 1;

        let mut next = snap_to_char_boundary(text, cut.saturating_sub(overlap_chars));
        if next <= start {
            next = cut;
        }
        start = next;
    }

    Ok(chunks)
}

/// Rebuild the parent text from its chunks by dropping overlapping prefixes.
///
/// Chunks are taken in ordinal order; chunks from other documents must not
/// be mixed in.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.ordinal);

    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in ordered {
        let (start, end) = chunk.char_span;
        if end <= covered {
            continue;
        }
        let skip = covered.saturating_sub(start);
        out.push_str(&chunk.text[skip..]);
        covered = end;
    }
    out
}

/// Find the best cut point in `text[start..window_end]`, or `None` if no
/// boundary lies at or after `min_cut`.
fn find_cut(text: &str, start: usize, window_end: usize, min_cut: usize) -> Option<usize> {
    let window = &text[start..window_end];

    if let Some(pos) = window.rfind("\n\n") {
        let cut = start + pos + 2;
        if cut >= min_cut {
            return Some(cut);
        }
    }

    let chars: Vec<(usize, char)> = window.char_indices().collect();

    for j in (1..chars.len()).rev() {
        let (i, c) = chars[j];
        if c.is_whitespace() && matches!(chars[j - 1].1, '.' | '!' | '?') {
            let cut = start + i + c.len_utf8();
            if cut >= min_cut {
                return Some(cut);
            }
            break;
        }
    }

    for &(i, c) in chars.iter().rev() {
        if c.is_whitespace() {
            let cut = start + i + c.len_utf8();
            if cut >= min_cut {
                return Some(cut);
            }
            break;
        }
    }

    None
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(doc: &RawDocument, ordinal: i64, start: usize, end: usize) -> Chunk {
    let text = &doc.full_text[start..end];
    let hash = hex::encode(Sha256::digest(text.as_bytes()));
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", doc.id, ordinal).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        document_id: doc.id.clone(),
        ordinal,
        text: text.to_string(),
        char_span: (start, end),
        hash,
        source_uri: doc.source_uri.clone(),
        title: doc.display_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;
    use chrono::Utc;

    fn doc(text: &str) -> RawDocument {
        RawDocument::new(
            "mem://doc",
            text,
            DocumentMetadata {
                source_type: "upload".to_string(),
                title: Some("doc.txt".to_string()),
                path: None,
                author: None,
                timestamp: Utc::now(),
                content_type: "text/plain".to_string(),
            },
        )
    }

    fn assert_invariants(d: &RawDocument, max: usize, overlap: usize) -> Vec<Chunk> {
        let chunks = chunk_document(d, max, overlap).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as i64);
            assert!(c.text.len() <= max, "chunk {} has {} bytes", i, c.text.len());
            assert_eq!(&d.full_text[c.char_span.0..c.char_span.1], c.text);
        }
        assert_eq!(reassemble(&chunks), d.full_text);
        chunks
    }

    #[test]
    fn test_small_text_single_chunk() {
        let d = doc("Hello, world!");
        let chunks = assert_invariants(&d, 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].title, "doc.txt");
    }

    #[test]
    fn test_empty_and_whitespace_produce_no_chunks() {
        assert!(chunk_document(&doc(""), 100, 10).unwrap().is_empty());
        assert!(chunk_document(&doc("  \n\n\t "), 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(matches!(
            chunk_document(&doc("abc"), 0, 0),
            Err(QaError::InvalidInput(_))
        ));
        assert!(matches!(
            chunk_document(&doc("abc"), 10, 10),
            Err(QaError::InvalidInput(_))
        ));
        assert!(matches!(
            chunk_document(&doc("😀😀"), 3, 0),
            Err(QaError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_smallest_budget_fits_widest_chars() {
        let d = doc("😀😀😀 and é😀ü");
        let chunks = assert_invariants(&d, MIN_CHUNK_CHARS, 0);
        assert_eq!(chunks[0].text, "😀");
        assert_invariants(&d, MIN_CHUNK_CHARS, 2);
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let d = doc("First paragraph here.\n\nSecond paragraph here.\n\nThird one.");
        let chunks = assert_invariants(&d, 30, 0);
        assert_eq!(chunks[0].text, "First paragraph here.\n\n");
        assert!(chunks[1].text.starts_with("Second"));
    }

    #[test]
    fn test_falls_back_to_sentence_boundaries() {
        let d = doc("One sentence. Two sentence. Three sentence. Four sentence.");
        let chunks = assert_invariants(&d, 30, 0);
        assert!(chunks[0].text.ends_with(". "));
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let d = doc(&"x".repeat(95));
        let chunks = assert_invariants(&d, 20, 5);
        assert!(chunks.len() > 4);
        assert_eq!(chunks[0].text.len(), 20);
    }

    #[test]
    fn test_overlap_duplicates_tail() {
        let d = doc(&"abcdefghij".repeat(10));
        let chunks = assert_invariants(&d, 30, 10);
        let tail = &chunks[0].text[chunks[0].text.len() - 10..];
        assert!(chunks[1].text.starts_with(tail));
    }

    #[test]
    fn test_reconstructs_many_shapes() {
        let samples = [
            "Paris is the capital of France.",
            "Line one\nline two\nline three\n\n\nAfter gap. Another sentence! A question? Yes.",
            "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘",
            "日本語のテキスト。これは文です。さらに文があります。",
            "  leading and trailing whitespace  \n\n",
        ];
        for text in samples {
            for (max, overlap) in [(8, 0), (8, 3), (17, 5), (64, 16), (200, 40)] {
                assert_invariants(&doc(text), max, overlap);
            }
        }
    }

    #[test]
    fn test_reconstructs_long_document() {
        let text = (0..200)
            .map(|i| format!("Paragraph number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = assert_invariants(&doc(&text), 256, 40);
        assert!(chunks.len() > 10);
    }

    #[test]
    fn test_deterministic() {
        let d = doc("Alpha\n\nBeta\n\nGamma\n\nDelta");
        let c1 = chunk_document(&d, 8, 2).unwrap();
        let c2 = chunk_document(&d, 8, 2).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_tokens_to_chars() {
        assert_eq!(tokens_to_chars(256), 1024);
    }
}

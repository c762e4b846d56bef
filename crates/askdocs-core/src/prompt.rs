//! Grounding prompt construction.
//!
//! Retrieved passages are numbered and wrapped in an explicit context block
//! so the model (and [`extract_context`]) can tell them apart from the
//! instructions. When retrieval found nothing the block is replaced by
//! [`NO_CONTEXT_MARKER`], telling the model to say it does not know instead
//! of answering from general knowledge.

use crate::models::ScoredChunk;

/// Placed in the prompt instead of a context block when nothing was retrieved.
pub const NO_CONTEXT_MARKER: &str = "[NO RELEVANT CONTEXT FOUND]";

const CONTEXT_BEGIN: &str = "<<<CONTEXT";
const CONTEXT_END: &str = "CONTEXT>>>";

/// Build the prompt sent to the answer generator.
pub fn build_grounding_prompt(question: &str, passages: &[ScoredChunk]) -> String {
    let context = if passages.is_empty() {
        NO_CONTEXT_MARKER.to_string()
    } else {
        format!("{}\n{}\n{}", CONTEXT_BEGIN, format_passages(passages), CONTEXT_END)
    };

    format!(
        r#"You answer questions using ONLY the documents provided below.

Rules:
1. Use only information stated in the context.
2. If the context is {marker} or does not contain the answer, say that the indexed documents do not cover it.
3. Cite passages by their number, e.g. [1].

{context}

Question: {question}
Answer:"#,
        marker = NO_CONTEXT_MARKER,
        context = context,
        question = question.trim(),
    )
}

/// Render passages as `[n] title (source_uri)` followed by the chunk text.
pub fn format_passages(passages: &[ScoredChunk]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "[{}] {} ({})\n{}",
                i + 1,
                p.chunk.title,
                p.chunk.source_uri,
                p.chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Return the context block of a prompt built by [`build_grounding_prompt`],
/// or `None` if the prompt carries [`NO_CONTEXT_MARKER`] instead.
pub fn extract_context(prompt: &str) -> Option<&str> {
    let start = prompt.find(CONTEXT_BEGIN)? + CONTEXT_BEGIN.len();
    let end = prompt[start..].find(CONTEXT_END)? + start;
    Some(&prompt[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn passage(title: &str, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("{}-0", title),
                document_id: title.into(),
                ordinal: 0,
                text: text.into(),
                char_span: (0, text.len()),
                hash: String::new(),
                source_uri: format!("file:///{}", title),
                title: title.into(),
            },
            score,
        }
    }

    #[test]
    fn test_passages_are_numbered_with_provenance() {
        let prompt = build_grounding_prompt(
            "  Where is Paris?  ",
            &[
                passage("a.txt", "Paris is in France.", 0.9),
                passage("b.md", "France is in Europe.", 0.5),
            ],
        );
        assert!(prompt.contains("[1] a.txt (file:///a.txt)\nParis is in France."));
        assert!(prompt.contains("[2] b.md (file:///b.md)"));
        assert!(prompt.contains("Question: Where is Paris?\n"));
        assert!(!prompt.contains(&format!("\n{}\n", NO_CONTEXT_MARKER)));
    }

    #[test]
    fn test_no_context_marker_when_empty() {
        let prompt = build_grounding_prompt("Anything?", &[]);
        assert!(prompt.contains(&format!("\n{}\n", NO_CONTEXT_MARKER)));
        assert!(extract_context(&prompt).is_none());
    }

    #[test]
    fn test_extract_context_roundtrip() {
        let prompt = build_grounding_prompt("q", &[passage("a.txt", "alpha", 1.0)]);
        let ctx = extract_context(&prompt).unwrap();
        assert!(ctx.contains("alpha"));
        assert!(!ctx.contains("Question:"));
    }
}

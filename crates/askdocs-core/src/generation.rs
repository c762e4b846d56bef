//! Answer-generation capability trait.
//!
//! A [`Generator`] turns a grounding prompt into answer text. HTTP-backed
//! generators live in the app crate; [`EchoGenerator`] lives here because
//! it needs no I/O.

use async_trait::async_trait;

use crate::error::Result;
use crate::prompt;

/// Answer returned by [`EchoGenerator`] when the prompt carries no context.
pub const ECHO_NO_CONTEXT_ANSWER: &str =
    "I could not find anything relevant in the indexed documents.";

#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider name, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// Model name sent to the provider.
    fn model(&self) -> &str;

    /// Generate an answer for a fully-built prompt.
    ///
    /// # Errors
    ///
    /// [`QaError::GenerationUnavailable`](crate::QaError::GenerationUnavailable)
    /// on rate limits, auth failures, or backend errors.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Offline generator that answers with the retrieved context verbatim.
#[derive(Debug, Default, Clone)]
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        match prompt::extract_context(prompt) {
            Some(context) => Ok(context.trim().to_string()),
            None => Ok(ECHO_NO_CONTEXT_ANSWER.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ScoredChunk};

    fn scored(text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: "c1".into(),
                document_id: "d1".into(),
                ordinal: 0,
                text: text.into(),
                char_span: (0, text.len()),
                hash: String::new(),
                source_uri: "mem://d1".into(),
                title: "d1.txt".into(),
            },
            score: 0.9,
        }
    }

    #[tokio::test]
    async fn test_echo_returns_context() {
        let p = prompt::build_grounding_prompt(
            "What is the capital of France?",
            &[scored("Paris is the capital of France.")],
        );
        let answer = EchoGenerator.generate(&p).await.unwrap();
        assert!(answer.contains("Paris is the capital of France."));
    }

    #[tokio::test]
    async fn test_echo_without_context() {
        let p = prompt::build_grounding_prompt("Anything?", &[]);
        let answer = EchoGenerator.generate(&p).await.unwrap();
        assert_eq!(answer, ECHO_NO_CONTEXT_ANSWER);
    }
}

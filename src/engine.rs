//! Question answering over an index snapshot.
//!
//! [`QueryEngine::answer`] runs the retrieval-augmented path:
//!
//! 1. no snapshot → [`ENGINE_UNAVAILABLE`] (not an error)
//! 2. blank question → [`QaError::InvalidInput`]
//! 3. snapshot model ≠ embedder model → [`QaError::ModelMismatch`]
//! 4. embed the question, retrieve the top-k passages
//! 5. build the grounding prompt (or the no-context prompt)
//! 6. generate, returning the model output verbatim

use std::sync::Arc;

use serde::Serialize;

use askdocs_core::embedding::{embed_query, Embedder};
use askdocs_core::generation::Generator;
use askdocs_core::index::IndexSnapshot;
use askdocs_core::models::ScoredChunk;
use askdocs_core::prompt::build_grounding_prompt;
use askdocs_core::{QaError, Result};

/// Answer given when no index has been built yet.
pub const ENGINE_UNAVAILABLE: &str =
    "QnA engine is not available. Please upload and index documents first.";

/// A passage an answer was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub title: String,
    pub source_uri: String,
    pub ordinal: i64,
    pub score: f32,
}

impl From<&ScoredChunk> for Source {
    fn from(scored: &ScoredChunk) -> Self {
        Self {
            title: scored.chunk.title.clone(),
            source_uri: scored.chunk.source_uri.clone(),
            ordinal: scored.chunk.ordinal,
            score: scored.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
    /// Generation the answer was retrieved from; `None` for the
    /// unavailable sentinel.
    pub generation_id: Option<String>,
}

impl Answer {
    pub fn unavailable() -> Self {
        Self {
            text: ENGINE_UNAVAILABLE.to_string(),
            sources: Vec::new(),
            generation_id: None,
        }
    }
}

pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    top_k: i64,
}

impl QueryEngine {
    pub fn new(embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>, top_k: i64) -> Self {
        Self {
            embedder,
            generator,
            top_k,
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }

    pub fn top_k(&self) -> i64 {
        self.top_k
    }

    pub async fn answer(&self, question: &str, snapshot: Option<&IndexSnapshot>) -> Result<Answer> {
        let Some(snapshot) = snapshot else {
            return Ok(Answer::unavailable());
        };

        let question = question.trim();
        if question.is_empty() {
            return Err(QaError::invalid("question must not be empty"));
        }

        if snapshot.model_id != self.embedder.model_id() {
            return Err(QaError::ModelMismatch {
                index: snapshot.model_id.clone(),
                query: self.embedder.model_id().to_string(),
            });
        }

        let passages = if snapshot.is_empty() {
            Vec::new()
        } else {
            let query_vector = embed_query(self.embedder.as_ref(), question).await?;
            snapshot.query(&query_vector, self.top_k)?
        };

        tracing::debug!(
            generation = %snapshot.generation_id,
            retrieved = passages.len(),
            top_score = passages.first().map(|p| p.score).unwrap_or(0.0),
            "retrieved passages"
        );

        let prompt = build_grounding_prompt(question, &passages);
        let text = self.generator.generate(&prompt).await?;

        Ok(Answer {
            text,
            sources: passages.iter().map(Source::from).collect(),
            generation_id: Some(snapshot.generation_id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdocs_core::embedding::HashEmbedder;
    use askdocs_core::generation::{EchoGenerator, ECHO_NO_CONTEXT_ANSWER};
    use askdocs_core::models::Chunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the prompt it was given.
    #[derive(Default)]
    struct CapturingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for CapturingGenerator {
        fn name(&self) -> &str {
            "capture"
        }
        fn model(&self) -> &str {
            "capture"
        }
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  verbatim output  ".to_string())
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: "d".into(),
            ordinal: 0,
            text: text.into(),
            char_span: (0, text.len()),
            hash: String::new(),
            source_uri: "upload://facts.txt".into(),
            title: "facts.txt".into(),
        }
    }

    async fn snapshot(texts: &[&str]) -> IndexSnapshot {
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, t)| chunk(&format!("c{}", i), t))
            .collect();
        IndexSnapshot::build(chunks, &HashEmbedder::new(128), 8)
            .await
            .unwrap()
    }

    fn engine(generator: Arc<dyn Generator>) -> QueryEngine {
        QueryEngine::new(Arc::new(HashEmbedder::new(128)), generator, 2)
    }

    #[tokio::test]
    async fn test_no_snapshot_returns_sentinel() {
        let answer = engine(Arc::new(EchoGenerator))
            .answer("anything", None)
            .await
            .unwrap();
        assert_eq!(answer.text, ENGINE_UNAVAILABLE);
        assert!(answer.generation_id.is_none());
    }

    #[tokio::test]
    async fn test_blank_question_rejected() {
        let snap = snapshot(&["text"]).await;
        let err = engine(Arc::new(EchoGenerator))
            .answer("   ", Some(&snap))
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_model_mismatch_fails_fast() {
        let snap = snapshot(&["text"]).await;
        let engine = QueryEngine::new(
            Arc::new(HashEmbedder::new(64)),
            Arc::new(EchoGenerator),
            4,
        );
        let err = engine.answer("q", Some(&snap)).await.unwrap_err();
        assert!(matches!(err, QaError::ModelMismatch { .. }));
    }

    #[tokio::test]
    async fn test_grounded_answer_with_sources() {
        let snap = snapshot(&[
            "Paris is the capital of France.",
            "Bananas grow in tropical climates.",
            "The Seine flows through Paris.",
        ])
        .await;
        let answer = engine(Arc::new(EchoGenerator))
            .answer("What is the capital of France?", Some(&snap))
            .await
            .unwrap();
        assert!(answer.text.contains("Paris"));
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.sources[0].title, "facts.txt");
        assert_eq!(answer.generation_id.as_deref(), Some(snap.generation_id.as_str()));
    }

    #[tokio::test]
    async fn test_empty_snapshot_uses_no_context_path() {
        let snap = IndexSnapshot::empty("hash-128", 128);
        let answer = engine(Arc::new(EchoGenerator))
            .answer("Is anything indexed?", Some(&snap))
            .await
            .unwrap();
        assert_eq!(answer.text, ECHO_NO_CONTEXT_ANSWER);
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn test_output_returned_verbatim() {
        let generator = Arc::new(CapturingGenerator::default());
        let snap = snapshot(&["alpha beta"]).await;
        let answer = engine(generator.clone())
            .answer("alpha?", Some(&snap))
            .await
            .unwrap();
        assert_eq!(answer.text, "  verbatim output  ");
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("[1] facts.txt (upload://facts.txt)"));
        assert!(prompts[0].contains("Question: alpha?"));
    }
}

//! End-to-end pipeline tests through the library API, fully offline
//! (hash embeddings, echo generation).

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use askdocs::config::LoaderConfig;
use askdocs::engine::{QueryEngine, ENGINE_UNAVAILABLE};
use askdocs::loader::{DocumentSource, UploadedFile};
use askdocs::session::{BuildSettings, Session, SessionState};
use askdocs::store;
use askdocs::QaError;
use askdocs_core::chunk::{chunk_document, reassemble};
use askdocs_core::embedding::{Embedder, HashEmbedder};
use askdocs_core::generation::{EchoGenerator, ECHO_NO_CONTEXT_ANSWER};
use askdocs_core::index::IndexSnapshot;

const DIMS: usize = 64;

/// Hash embedder that can stall until released, or fail outright.
struct ControlledEmbedder {
    inner: HashEmbedder,
    started: Notify,
    release: Notify,
    stall: AtomicBool,
    fail: AtomicBool,
}

impl ControlledEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(DIMS),
            started: Notify::new(),
            release: Notify::new(),
            stall: AtomicBool::new(false),
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Embedder for ControlledEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> askdocs::Result<Vec<Vec<f32>>> {
        if self.stall.load(Ordering::SeqCst) {
            self.started.notify_one();
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(QaError::EmbeddingUnavailable("rate limited".into()));
        }
        self.inner.embed(texts).await
    }
}

fn settings() -> BuildSettings {
    BuildSettings {
        max_chars: 256,
        overlap_chars: 32,
        batch_size: 8,
        loader: LoaderConfig::default(),
    }
}

fn engine(embedder: Arc<dyn Embedder>) -> Arc<QueryEngine> {
    Arc::new(QueryEngine::new(embedder, Arc::new(EchoGenerator), 4))
}

fn upload(name: &str, text: &str) -> DocumentSource {
    DocumentSource::Uploads(vec![UploadedFile {
        name: name.to_string(),
        bytes: text.as_bytes().to_vec(),
        mime: None,
    }])
}

fn leftover_temp_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.contains(".tmp-"))
        .collect()
}

#[tokio::test]
async fn paris_scenario_answers_from_corpus() {
    let tmp = TempDir::new().unwrap();
    let session = Session::persisted(
        "shared",
        tmp.path(),
        engine(Arc::new(HashEmbedder::new(DIMS))),
        settings(),
    );

    session
        .upload(upload("facts.txt", "Paris is the capital of France."))
        .await
        .unwrap();

    let answer = session.ask("What is the capital of France?").await;
    assert!(answer.contains("Paris"), "answer was: {}", answer);
}

#[tokio::test]
async fn empty_corpus_takes_no_context_path() {
    let tmp = TempDir::new().unwrap();
    let docs_dir = tmp.path().join("docs");
    fs::create_dir_all(&docs_dir).unwrap();

    let session = Session::persisted(
        "shared",
        tmp.path().join("storage"),
        engine(Arc::new(HashEmbedder::new(DIMS))),
        settings(),
    );
    let report = session
        .upload(DocumentSource::Directory(docs_dir))
        .await
        .unwrap();
    assert_eq!(report.chunks, 0);
    assert_eq!(session.state().await, SessionState::Indexed);

    let answer = session.ask("Is anything indexed?").await;
    assert_eq!(answer, ECHO_NO_CONTEXT_ANSWER);
}

#[tokio::test]
async fn question_before_any_upload_gets_sentinel() {
    let tmp = TempDir::new().unwrap();
    let session = Session::persisted(
        "shared",
        tmp.path(),
        engine(Arc::new(HashEmbedder::new(DIMS))),
        settings(),
    );
    assert_eq!(session.open().await.unwrap(), SessionState::NoIndex);
    assert_eq!(session.ask("hello?").await, ENGINE_UNAVAILABLE);
}

#[tokio::test]
async fn concurrent_rebuilds_publish_one_generation() {
    let tmp = TempDir::new().unwrap();
    let embedder = ControlledEmbedder::new();
    embedder.stall.store(true, Ordering::SeqCst);

    let session = Arc::new(Session::persisted(
        "shared",
        tmp.path(),
        engine(embedder.clone()),
        settings(),
    ));

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.upload(upload("a.txt", "alpha")).await })
    };
    embedder.started.notified().await;

    let second = session.upload(upload("b.txt", "beta")).await;
    assert!(matches!(second, Err(QaError::RebuildInProgress)));

    // A second process-level session on the same path is refused too.
    let other = Session::persisted(
        "other",
        tmp.path(),
        engine(Arc::new(HashEmbedder::new(DIMS))),
        settings(),
    );
    let third = other.upload(upload("c.txt", "gamma")).await;
    assert!(matches!(third, Err(QaError::RebuildInProgress)));

    embedder.stall.store(false, Ordering::SeqCst);
    embedder.release.notify_one();
    let report = tokio::time::timeout(Duration::from_secs(10), first)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let published = store::load(tmp.path()).await.unwrap();
    assert_eq!(published.generation_id, report.generation_id);
    assert_eq!(published.len(), 1);
    assert_eq!(published.entries()[0].chunk.text, "alpha");
    assert!(store::PathLock::acquire(tmp.path()).is_ok());
}

#[tokio::test]
async fn failed_rebuild_leaves_published_file_untouched() {
    let tmp = TempDir::new().unwrap();
    let embedder = ControlledEmbedder::new();
    let session = Session::persisted("shared", tmp.path(), engine(embedder.clone()), settings());

    let report = session
        .upload(upload("facts.txt", "Paris is the capital of France."))
        .await
        .unwrap();
    session.ask("What is the capital of France?").await;
    let before = fs::read(store::index_path(tmp.path())).unwrap();

    embedder.fail.store(true, Ordering::SeqCst);
    let err = session
        .upload(upload("other.txt", "Bananas grow in tropical climates."))
        .await
        .unwrap_err();
    assert!(matches!(err, QaError::EmbeddingUnavailable(_)));

    let after = fs::read(store::index_path(tmp.path())).unwrap();
    assert_eq!(before, after);
    assert!(leftover_temp_files(tmp.path()).is_empty());
    assert!(store::PathLock::acquire(tmp.path()).is_ok());

    let status = session.status().await;
    assert_eq!(status.state, SessionState::Indexed);
    assert_eq!(status.generation_id, Some(report.generation_id));
    assert_eq!(status.turns, 1);
}

#[tokio::test]
async fn rebuild_clears_history_and_switches_generation() {
    let tmp = TempDir::new().unwrap();
    let session = Session::persisted(
        "shared",
        tmp.path(),
        engine(Arc::new(HashEmbedder::new(DIMS))),
        settings(),
    );

    let first = session.upload(upload("a.txt", "alpha")).await.unwrap();
    session.ask("alpha?").await;
    session.ask("alpha again?").await;
    assert_eq!(session.history().await.len(), 2);

    let second = session.upload(upload("b.txt", "beta")).await.unwrap();
    assert_ne!(first.generation_id, second.generation_id);
    assert!(session.history().await.is_empty());
}

#[tokio::test]
async fn built_index_round_trips_through_storage() {
    let tmp = TempDir::new().unwrap();
    let embedder = HashEmbedder::new(DIMS);

    let text = "First paragraph about storage.\n\nSecond paragraph about vectors. ".repeat(20);
    let doc = askdocs::loader::load(&upload("long.txt", &text), &LoaderConfig::default())
        .unwrap()
        .remove(0);
    let chunks = chunk_document(&doc, 200, 40).unwrap();
    assert!(chunks.len() > 1);
    assert_eq!(reassemble(&chunks), doc.full_text);

    let built = IndexSnapshot::build(chunks, &embedder, 8).await.unwrap();
    store::persist(&built, tmp.path()).await.unwrap();
    let loaded = store::load(tmp.path()).await.unwrap();

    assert_eq!(loaded.generation_id, built.generation_id);
    assert_eq!(loaded.checksum(), built.checksum());
    for (a, b) in built.entries().iter().zip(loaded.entries()) {
        assert_eq!(a.chunk.text, b.chunk.text);
        assert_eq!(a.embedding, b.embedding);
    }
}

#[tokio::test]
async fn reopened_index_with_other_model_reports_mismatch() {
    let tmp = TempDir::new().unwrap();
    let writer = Session::persisted(
        "shared",
        tmp.path(),
        engine(Arc::new(HashEmbedder::new(DIMS))),
        settings(),
    );
    writer.upload(upload("a.txt", "alpha")).await.unwrap();

    let reader = Session::persisted(
        "shared",
        tmp.path(),
        engine(Arc::new(HashEmbedder::new(DIMS * 2))),
        settings(),
    );
    assert_eq!(reader.open().await.unwrap(), SessionState::Indexed);
    let err = reader.ask_detailed("alpha?").await.unwrap_err();
    assert!(matches!(err, QaError::ModelMismatch { .. }));
    assert!(reader.ask("alpha?").await.starts_with("Error during QnA:"));
    assert!(reader.history().await.is_empty());
}

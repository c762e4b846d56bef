//! Sessions: an active index generation plus conversation history.
//!
//! # State machine
//!
//! ```text
//!            rebuild ok                     upload
//! NoIndex ──────────────▶ Indexed ──────────────────▶ Stale
//!    ▲                      ▲  ▲                         │
//!    │     rebuild failed   │  └──── rebuild ok ─────────┤
//!    └──────────────────────┼────────────────────────────┤
//!                           └──── rebuild failed ────────┘
//! ```
//!
//! While `Stale`, questions are still answered from the previous snapshot.
//! A successful rebuild installs the new generation and clears history; a
//! failed one restores the previous state, snapshot and history untouched.
//! `Stale` lasts exactly as long as the rebuild: dropping an unfinished
//! [`Session::upload`] future counts as a failed rebuild.
//!
//! Rebuilds are single-flight: a second [`Session::upload`] while one is
//! running fails with [`QaError::RebuildInProgress`]. Persisted sessions
//! additionally hold a [`PathLock`] on the storage directory so separate
//! processes cannot rebuild the same index at once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use askdocs_core::chunk::{chunk_document, tokens_to_chars};
use askdocs_core::index::IndexSnapshot;
use askdocs_core::models::ConversationTurn;
use askdocs_core::{QaError, Result};

use crate::config::Config;
use crate::engine::{Answer, QueryEngine};
use crate::loader::{self, DocumentSource};
use crate::store::{self, PathLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NoIndex,
    Indexed,
    Stale,
}

/// Where a session's index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// Shared index published under a well-known storage directory.
    Persisted { dir: PathBuf },
    /// Per-user index kept in memory only.
    Ephemeral,
}

/// Chunking and batching settings applied on rebuild.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub batch_size: usize,
    pub loader: crate::config::LoaderConfig,
}

impl BuildSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chars: tokens_to_chars(config.chunking.max_tokens),
            overlap_chars: tokens_to_chars(config.chunking.overlap_tokens),
            batch_size: config.embedding.batch_size,
            loader: config.loader.clone(),
        }
    }
}

/// Outcome of a successful rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub generation_id: String,
    pub model_id: String,
    pub documents: usize,
    pub chunks: usize,
    /// Published file, for persisted sessions.
    pub path: Option<PathBuf>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: String,
    pub state: SessionState,
    pub persisted: bool,
    pub generation_id: Option<String>,
    pub model_id: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub documents: usize,
    pub chunks: usize,
    pub turns: usize,
}

struct Inner {
    /// `NoIndex` or `Indexed`; `Stale` is derived from the `rebuilding` flag.
    state: SessionState,
    snapshot: Option<Arc<IndexSnapshot>>,
    history: Vec<ConversationTurn>,
}

/// Marks a rebuild in flight; cleared on drop, including cancellation.
struct Rebuilding<'a>(&'a AtomicBool);

impl<'a> Rebuilding<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for Rebuilding<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Session {
    id: String,
    kind: SessionKind,
    engine: Arc<QueryEngine>,
    settings: BuildSettings,
    inner: RwLock<Inner>,
    rebuild: Mutex<()>,
    rebuilding: AtomicBool,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        kind: SessionKind,
        engine: Arc<QueryEngine>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            engine,
            settings,
            inner: RwLock::new(Inner {
                state: SessionState::NoIndex,
                snapshot: None,
                history: Vec::new(),
            }),
            rebuild: Mutex::new(()),
            rebuilding: AtomicBool::new(false),
        }
    }

    pub fn persisted(
        id: impl Into<String>,
        dir: impl Into<PathBuf>,
        engine: Arc<QueryEngine>,
        settings: BuildSettings,
    ) -> Self {
        Self::new(id, SessionKind::Persisted { dir: dir.into() }, engine, settings)
    }

    pub fn ephemeral(id: impl Into<String>, engine: Arc<QueryEngine>, settings: BuildSettings) -> Self {
        Self::new(id, SessionKind::Ephemeral, engine, settings)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &SessionKind {
        &self.kind
    }

    /// Load the published snapshot, if any.
    ///
    /// A missing index leaves the session in `NoIndex`; a corrupt one is
    /// logged and treated the same way, so the next upload replaces it.
    pub async fn open(&self) -> Result<SessionState> {
        let SessionKind::Persisted { dir } = &self.kind else {
            return Ok(self.state().await);
        };
        let _flight = self.rebuild.lock().await;

        match store::load(dir).await {
            Ok(snapshot) => {
                if snapshot.model_id != self.engine.embedder().model_id() {
                    tracing::warn!(
                        index_model = %snapshot.model_id,
                        configured_model = %self.engine.embedder().model_id(),
                        "index was built with a different embedding model; reindex to query it"
                    );
                }
                tracing::info!(
                    session = %self.id,
                    generation = %snapshot.generation_id,
                    chunks = snapshot.len(),
                    "loaded index snapshot"
                );
                let mut inner = self.inner.write().await;
                inner.snapshot = Some(Arc::new(snapshot));
                inner.state = SessionState::Indexed;
                inner.history.clear();
                Ok(inner.state)
            }
            Err(QaError::IndexNotFound(path)) => {
                tracing::info!(session = %self.id, path = %path, "no index published yet");
                Ok(self.reset().await)
            }
            Err(QaError::IndexCorrupt(reason)) => {
                tracing::warn!(
                    session = %self.id,
                    %reason,
                    "ignoring corrupt index snapshot; upload documents to rebuild"
                );
                Ok(self.reset().await)
            }
            Err(e) => Err(e),
        }
    }

    async fn reset(&self) -> SessionState {
        let mut inner = self.inner.write().await;
        inner.snapshot = None;
        inner.state = SessionState::NoIndex;
        inner.state
    }

    /// Rebuild the index from `source` (full rebuild of that corpus).
    ///
    /// # Errors
    ///
    /// - [`QaError::RebuildInProgress`] if this session (or, for persisted
    ///   sessions, another process) is already rebuilding.
    /// - Any loader, embedding or storage error; the previous snapshot and
    ///   history stay authoritative.
    pub async fn upload(&self, source: DocumentSource) -> Result<RebuildReport> {
        let _flight = self
            .rebuild
            .try_lock()
            .map_err(|_| QaError::RebuildInProgress)?;
        let _path_lock = match &self.kind {
            SessionKind::Persisted { dir } => Some(PathLock::acquire(dir)?),
            SessionKind::Ephemeral => None,
        };

        let rebuilding = Rebuilding::start(&self.rebuilding);

        let started = Instant::now();
        tracing::info!(session = %self.id, source = source.kind(), "rebuilding index");

        match self.rebuild_from(source).await {
            Ok((snapshot, documents, path)) => {
                let report = RebuildReport {
                    generation_id: snapshot.generation_id.clone(),
                    model_id: snapshot.model_id.clone(),
                    documents,
                    chunks: snapshot.len(),
                    path,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };

                let mut inner = self.inner.write().await;
                inner.snapshot = Some(Arc::new(snapshot));
                inner.state = SessionState::Indexed;
                inner.history.clear();
                drop(rebuilding);
                drop(inner);

                tracing::info!(
                    session = %self.id,
                    generation = %report.generation_id,
                    documents = report.documents,
                    chunks = report.chunks,
                    elapsed_ms = report.elapsed_ms,
                    "rebuild complete"
                );
                Ok(report)
            }
            Err(e) => {
                drop(rebuilding);
                tracing::warn!(session = %self.id, error = %e, "rebuild failed; keeping previous index");
                Err(e)
            }
        }
    }

    async fn rebuild_from(
        &self,
        source: DocumentSource,
    ) -> Result<(IndexSnapshot, usize, Option<PathBuf>)> {
        let loader_config = self.settings.loader.clone();
        let docs = tokio::task::spawn_blocking(move || loader::load(&source, &loader_config))
            .await
            .map_err(|e| QaError::Storage(format!("loader task failed: {}", e)))??;

        let mut chunks = Vec::new();
        for doc in &docs {
            chunks.extend(chunk_document(
                doc,
                self.settings.max_chars,
                self.settings.overlap_chars,
            )?);
        }
        tracing::debug!(documents = docs.len(), chunks = chunks.len(), "chunked corpus");

        let snapshot =
            IndexSnapshot::build(chunks, self.engine.embedder(), self.settings.batch_size).await?;

        let path = match &self.kind {
            SessionKind::Persisted { dir } => Some(store::persist(&snapshot, dir).await?),
            SessionKind::Ephemeral => None,
        };

        Ok((snapshot, docs.len(), path))
    }

    /// Answer a question, recording the turn on success.
    pub async fn ask_detailed(&self, question: &str) -> Result<Answer> {
        let snapshot = self.inner.read().await.snapshot.clone();
        let answer = self.engine.answer(question, snapshot.as_deref()).await?;

        if let Some(generation) = &answer.generation_id {
            let mut inner = self.inner.write().await;
            // A rebuild that finished meanwhile has cleared history; the
            // turn belongs to the old generation and is dropped.
            let current = inner.snapshot.as_ref().map(|s| s.generation_id.as_str());
            if current == Some(generation.as_str()) {
                inner
                    .history
                    .push(ConversationTurn::new(question.trim(), answer.text.clone()));
            }
        }

        Ok(answer)
    }

    /// Answer a question. Never fails: errors become a user-visible
    /// message and leave history untouched.
    pub async fn ask(&self, question: &str) -> String {
        match self.ask_detailed(question).await {
            Ok(answer) => answer.text,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "question failed");
                format!("Error during QnA: {}", e)
            }
        }
    }

    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.inner.read().await.history.clone()
    }

    pub async fn clear_history(&self) {
        self.inner.write().await.history.clear();
    }

    pub async fn state(&self) -> SessionState {
        let inner = self.inner.read().await;
        self.observed(inner.state)
    }

    fn observed(&self, state: SessionState) -> SessionState {
        if state == SessionState::Indexed && self.rebuilding.load(Ordering::SeqCst) {
            SessionState::Stale
        } else {
            state
        }
    }

    pub async fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.inner.read().await.snapshot.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.read().await;
        let snapshot = inner.snapshot.as_deref();
        SessionStatus {
            id: self.id.clone(),
            state: self.observed(inner.state),
            persisted: matches!(self.kind, SessionKind::Persisted { .. }),
            generation_id: snapshot.map(|s| s.generation_id.clone()),
            model_id: snapshot.map(|s| s.model_id.clone()),
            created_at: snapshot.map(|s| s.created_at),
            documents: snapshot.map(|s| s.document_count()).unwrap_or(0),
            chunks: snapshot.map(|s| s.len()).unwrap_or(0),
            turns: inner.history.len(),
        }
    }

    /// Storage directory of a persisted session.
    pub fn storage_dir(&self) -> Option<&Path> {
        match &self.kind {
            SessionKind::Persisted { dir } => Some(dir),
            SessionKind::Ephemeral => None,
        }
    }
}

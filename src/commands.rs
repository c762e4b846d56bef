//! CLI command runners.
//!
//! Each `run_*` function backs one `askdocs` subcommand. Output meant for
//! the user goes to stdout; logs go to stderr through `tracing`.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::engine::QueryEngine;
use crate::generation::create_generator;
use crate::loader::DocumentSource;
use crate::session::{BuildSettings, RebuildReport, Session, SessionState};

/// Build the engine from config and open the shared persisted session.
pub async fn open_shared_session(config: &Config) -> Result<Session> {
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let engine = Arc::new(QueryEngine::new(
        embedder,
        generator,
        config.retrieval.top_k,
    ));

    let session = Session::persisted(
        crate::server::SHARED_SESSION,
        config.storage.path.clone(),
        engine,
        BuildSettings::from_config(config),
    );
    session
        .open()
        .await
        .with_context(|| format!("failed to open index in {}", config.storage.path.display()))?;
    Ok(session)
}

fn print_report(report: &RebuildReport) {
    println!("Indexed {} documents ({} chunks)", report.documents, report.chunks);
    println!("  generation: {}", report.generation_id);
    println!("  model:      {}", report.model_id);
    if let Some(path) = &report.path {
        println!("  path:       {}", path.display());
    }
    println!("  elapsed:    {} ms", report.elapsed_ms);
}

/// `askdocs index <dir>`: full rebuild from a directory.
pub async fn run_index(config: &Config, dir: &Path) -> Result<()> {
    let session = open_shared_session(config).await?;
    let report = session
        .upload(DocumentSource::Directory(dir.to_path_buf()))
        .await
        .with_context(|| format!("failed to index {}", dir.display()))?;
    print_report(&report);
    Ok(())
}

/// `askdocs sync <export.jsonl>`: index documents produced by a source
/// adapter. An export with no documents leaves the index untouched.
pub async fn run_sync(config: &Config, export: &Path) -> Result<()> {
    let source = DocumentSource::Export(export.to_path_buf());
    let docs = crate::loader::load(&source, &config.loader)
        .with_context(|| format!("failed to read export {}", export.display()))?;
    if docs.is_empty() {
        println!("No documents found in {}; nothing to index.", export.display());
        return Ok(());
    }

    let session = open_shared_session(config).await?;
    let report = session
        .upload(DocumentSource::Documents(docs))
        .await
        .context("failed to index synced documents")?;
    print_report(&report);
    Ok(())
}

/// `askdocs ask "<question>"`.
pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let session = open_shared_session(config).await?;
    println!("{}", session.ask(question).await);
    Ok(())
}

/// `askdocs chat`: read questions from stdin until `exit`, `quit` or EOF.
pub async fn run_chat(config: &Config) -> Result<()> {
    let session = open_shared_session(config).await?;
    if session.state().await == SessionState::NoIndex {
        println!("No index yet. Run `askdocs index <dir>` first.");
    }
    println!("Ask a question (type 'exit' or 'quit' to leave).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        println!("{}\n", session.ask(question).await);
    }

    let history = session.history().await;
    if !history.is_empty() {
        println!("\nConversation ({} turns):", history.len());
        for (i, turn) in history.iter().enumerate() {
            println!("{}. Q: {}", i + 1, turn.question);
            println!("   A: {}", turn.answer);
        }
    }
    Ok(())
}

/// `askdocs status`.
pub async fn run_status(config: &Config) -> Result<()> {
    let session = open_shared_session(config).await?;
    let status = session.status().await;

    println!("storage:    {}", config.storage.path.display());
    match status.state {
        SessionState::NoIndex => println!("state:      no index"),
        SessionState::Indexed | SessionState::Stale => {
            println!("state:      indexed");
            println!(
                "generation: {}",
                status.generation_id.as_deref().unwrap_or("-")
            );
            println!("model:      {}", status.model_id.as_deref().unwrap_or("-"));
            if let Some(created_at) = status.created_at {
                println!("created:    {}", created_at.to_rfc3339());
            }
            println!("documents:  {}", status.documents);
            println!("chunks:     {}", status.chunks);
        }
    }
    Ok(())
}

//! Durable snapshot storage.
//!
//! A storage directory holds at most one published snapshot,
//! `index.sqlite`, plus transient files:
//!
//! ```text
//! storage/
//! ├── index.sqlite               published generation
//! ├── .index.sqlite.tmp-<uuid>   generation being written
//! └── .lock                      advisory lock, held while a rebuild runs
//! ```
//!
//! [`persist`] writes a complete SQLite database to a temporary file in the
//! same directory and publishes it with a single `rename`, so readers see
//! either the old generation or the new one, never a mix. A crash mid-write
//! leaves only an orphaned temp file.
//!
//! The database is self-describing: a `meta` table records the `format`,
//! `schema_version`, `generation_id`, `model_id`, `dims`, `created_at` and
//! a content `checksum` that [`load`] verifies.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use sqlx::{Row, SqlitePool};

use askdocs_core::embedding::{blob_to_vec, vec_to_blob};
use askdocs_core::index::{IndexEntry, IndexSnapshot, SCHEMA_VERSION};
use askdocs_core::models::{Chunk, EmbeddedVector};
use askdocs_core::{QaError, Result};

use crate::db;

/// File name of the published snapshot.
pub const INDEX_FILE: &str = "index.sqlite";

/// File name of the rebuild lock.
pub const LOCK_FILE: &str = ".lock";

/// Value of `meta.format`.
pub const FORMAT: &str = "askdocs-index";

pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

/// Write `snapshot` into `dir` and atomically publish it as `index.sqlite`.
///
/// Returns the published path. On error the previously published file is
/// untouched and the temporary file is removed.
pub async fn persist(snapshot: &IndexSnapshot, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let tmp = dir.join(format!(".{}.tmp-{}", INDEX_FILE, uuid::Uuid::new_v4()));
    let target = index_path(dir);

    let written = async {
        write_snapshot(&tmp, snapshot).await?;
        std::fs::File::open(&tmp)?.sync_all()?;
        std::fs::rename(&tmp, &target)?;
        Ok::<_, QaError>(())
    }
    .await;

    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    tracing::info!(
        generation = %snapshot.generation_id,
        chunks = snapshot.len(),
        path = %target.display(),
        "published index snapshot"
    );
    Ok(target)
}

async fn write_snapshot(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    let pool = db::connect(path, true).await.map_err(storage)?;
    let result = write_tables(&pool, snapshot).await;
    pool.close().await;
    result
}

async fn write_tables(pool: &SqlitePool, snapshot: &IndexSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(storage)?;

    sqlx::query(
        r#"
        CREATE TABLE chunks (
            position INTEGER PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            document_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            span_start INTEGER NOT NULL,
            span_end INTEGER NOT NULL,
            hash TEXT NOT NULL,
            source_uri TEXT NOT NULL,
            title TEXT NOT NULL,
            model_id TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(storage)?;

    let mut tx = pool.begin().await.map_err(storage)?;

    let meta = [
        ("format", FORMAT.to_string()),
        ("schema_version", snapshot.schema_version.to_string()),
        ("generation_id", snapshot.generation_id.clone()),
        ("model_id", snapshot.model_id.clone()),
        ("dims", snapshot.dims.to_string()),
        ("created_at", snapshot.created_at.to_rfc3339()),
        ("checksum", snapshot.checksum()),
    ];
    for (key, value) in meta {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
    }

    for (position, entry) in snapshot.entries().iter().enumerate() {
        let chunk = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO chunks (position, id, document_id, ordinal, text, span_start,
                                span_end, hash, source_uri, title, model_id, vector)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position as i64)
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.ordinal)
        .bind(&chunk.text)
        .bind(chunk.char_span.0 as i64)
        .bind(chunk.char_span.1 as i64)
        .bind(&chunk.hash)
        .bind(&chunk.source_uri)
        .bind(&chunk.title)
        .bind(&entry.embedding.model_id)
        .bind(vec_to_blob(&entry.embedding.vector))
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
    }

    tx.commit().await.map_err(storage)?;
    Ok(())
}

/// Load the published snapshot from `dir`.
///
/// # Errors
///
/// - [`QaError::IndexNotFound`] when nothing has been published.
/// - [`QaError::IndexCorrupt`] when the file is unreadable, has the wrong
///   format or schema version, inconsistent vectors, or a bad checksum.
pub async fn load(dir: &Path) -> Result<IndexSnapshot> {
    let path = index_path(dir);
    if !path.is_file() {
        return Err(QaError::IndexNotFound(path.display().to_string()));
    }

    let pool = db::connect(&path, false).await.map_err(corrupt)?;
    let result = read_snapshot(&pool).await;
    pool.close().await;
    result
}

async fn read_snapshot(pool: &SqlitePool) -> Result<IndexSnapshot> {
    let meta_rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM meta")
        .fetch_all(pool)
        .await
        .map_err(|e| QaError::IndexCorrupt(format!("cannot read meta table: {}", e)))?;
    let meta = |key: &str| meta_value(&meta_rows, key);

    let format = meta("format")?;
    if format != FORMAT {
        return Err(QaError::IndexCorrupt(format!("unknown format '{}'", format)));
    }
    let version: u32 = parse_meta("schema_version", meta("schema_version")?)?;
    if version != SCHEMA_VERSION {
        return Err(QaError::IndexCorrupt(format!(
            "schema version {} is not supported (expected {})",
            version, SCHEMA_VERSION
        )));
    }
    let dims: usize = parse_meta("dims", meta("dims")?)?;
    let created_at = DateTime::parse_from_rfc3339(meta("created_at")?)
        .map_err(|e| QaError::IndexCorrupt(format!("meta.created_at: {}", e)))?
        .with_timezone(&Utc);

    let rows = sqlx::query(
        r#"
        SELECT id, document_id, ordinal, text, span_start, span_end,
               hash, source_uri, title, model_id, vector
        FROM chunks
        ORDER BY position
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(corrupt)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let blob: Vec<u8> = row.try_get("vector").map_err(corrupt)?;
        if blob.len() % 4 != 0 {
            return Err(QaError::IndexCorrupt(format!(
                "vector blob of {} bytes is not a whole number of f32s",
                blob.len()
            )));
        }
        let span_start: i64 = row.try_get("span_start").map_err(corrupt)?;
        let span_end: i64 = row.try_get("span_end").map_err(corrupt)?;
        let chunk = Chunk {
            id: row.try_get("id").map_err(corrupt)?,
            document_id: row.try_get("document_id").map_err(corrupt)?,
            ordinal: row.try_get("ordinal").map_err(corrupt)?,
            text: row.try_get("text").map_err(corrupt)?,
            char_span: (span_start.max(0) as usize, span_end.max(0) as usize),
            hash: row.try_get("hash").map_err(corrupt)?,
            source_uri: row.try_get("source_uri").map_err(corrupt)?,
            title: row.try_get("title").map_err(corrupt)?,
        };
        entries.push(IndexEntry {
            embedding: EmbeddedVector {
                chunk_id: chunk.id.clone(),
                vector: blob_to_vec(&blob),
                model_id: row.try_get("model_id").map_err(corrupt)?,
            },
            chunk,
        });
    }

    let snapshot = IndexSnapshot::from_parts(
        meta("generation_id")?.to_string(),
        meta("model_id")?.to_string(),
        dims,
        created_at,
        entries,
    )?;

    if snapshot.checksum() != meta("checksum")? {
        return Err(QaError::IndexCorrupt("checksum mismatch".to_string()));
    }

    Ok(snapshot)
}

fn meta_value<'a>(rows: &'a [(String, String)], key: &str) -> Result<&'a str> {
    rows.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| QaError::IndexCorrupt(format!("meta.{} missing", key)))
}

fn parse_meta<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| QaError::IndexCorrupt(format!("meta.{} is not valid: '{}'", key, value)))
}

fn storage(e: sqlx::Error) -> QaError {
    QaError::Storage(e.to_string())
}

fn corrupt(e: sqlx::Error) -> QaError {
    QaError::IndexCorrupt(e.to_string())
}

/// Exclusive lock on a storage directory, held for the duration of a rebuild.
///
/// An OS advisory lock on `.lock`, so it is released when the holder drops
/// it or its process dies. A `.lock` file left behind by a crashed rebuild
/// does not block the next one. The file itself stays in place and records
/// the PID of the last holder.
#[derive(Debug)]
pub struct PathLock {
    path: PathBuf,
    file: File,
}

impl PathLock {
    /// # Errors
    ///
    /// [`QaError::RebuildInProgress`] if another rebuild holds the lock.
    pub fn acquire(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                tracing::warn!(lock = %path.display(), "storage is locked by another rebuild");
                return Err(QaError::RebuildInProgress);
            }
            Err(e) => return Err(e.into()),
        }

        file.set_len(0)?;
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

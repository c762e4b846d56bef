use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open a single-connection pool on a snapshot file.
///
/// Snapshot files use the rollback journal rather than WAL so that a
/// closed database is one self-contained file that can be renamed into
/// place.
pub async fn connect(path: &Path, create: bool) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Delete);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

//! Schema setup for the libSQL backend.
//!
//! The applied version lives in SQLite's `user_version` pragma. Each step runs
//! in its own transaction together with the version bump.

use libsql::Connection;
use tracing::info;

use crate::error::DatabaseError;

/// Schema steps in order; step N brings the schema to version N.
const STEPS: &[(&str, &str)] = &[
    (
        "account_holders",
        "CREATE TABLE IF NOT EXISTS account_holders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            password TEXT NOT NULL,
            holder_name TEXT NOT NULL,
            is_paused INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    ),
    (
        "account_holders_paused_index",
        "CREATE INDEX IF NOT EXISTS idx_account_holders_paused ON account_holders(is_paused);",
    ),
];

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let applied = schema_version(conn).await?;

    for (version, (name, sql)) in (1_i64..).zip(STEPS).filter(|(v, _)| *v > applied) {
        info!(version, name = *name, "Applying schema step");
        let batch = format!("BEGIN; {sql} PRAGMA user_version = {version}; COMMIT;");
        if let Err(e) = conn.execute_batch(&batch).await {
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::Migration(format!("V{version} ({name}): {e}")));
        }
    }

    Ok(())
}

/// The schema version recorded in the database, 0 for a fresh one.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("PRAGMA user_version", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read user_version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("parse user_version: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!("read user_version: {e}"))),
    }
}

//! libSQL backend: async `AccountStore` implementation.
//!
//! Supports local file and in-memory databases. Besides the listing the
//! reconciler consumes, it carries the write operations used by whatever
//! flips the paused flag (request handlers in production, fixtures in tests).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{AccountHolder, AccountId, AccountStore, NewAccountHolder};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert an account holder and return its new id.
    pub async fn insert_account_holder(
        &self,
        holder: &NewAccountHolder,
    ) -> Result<AccountId, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO account_holders (username, password, holder_name, is_paused) VALUES (?1, ?2, ?3, ?4)",
            params![
                holder.username.as_str(),
                holder.password.expose_secret(),
                holder.holder_name.as_str(),
                holder.paused as i64,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_account_holder: {e}")))?;

        let id = AccountId(conn.last_insert_rowid());
        debug!(account_id = %id, username = %holder.username, "Account holder inserted");
        Ok(id)
    }

    /// Flip the paused flag. Returns `false` if no such account holder exists.
    pub async fn set_paused(&self, id: AccountId, paused: bool) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE account_holders SET is_paused = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![paused as i64, id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_paused: {e}")))?;

        debug!(account_id = %id, paused, "Paused flag updated");
        Ok(count > 0)
    }

    /// Delete an account holder. Returns `false` if it did not exist.
    pub async fn delete_account_holder(&self, id: AccountId) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM account_holders WHERE id = ?1",
                params![id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_account_holder: {e}")))?;
        Ok(count > 0)
    }

    /// Look up a single account holder.
    pub async fn get_account_holder(
        &self,
        id: AccountId,
    ) -> Result<Option<AccountHolder>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM account_holders WHERE id = ?1"),
                params![id.0],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_account_holder: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_account_holder(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_account_holder row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_account_holder: {e}"))),
        }
    }
}

const ACCOUNT_COLUMNS: &str = "id, username, password, holder_name, is_paused";

/// Map a libsql Row to an AccountHolder.
///
/// Column order matches ACCOUNT_COLUMNS.
fn row_to_account_holder(row: &libsql::Row) -> Result<AccountHolder, libsql::Error> {
    let password: String = row.get(2)?;
    let paused: i64 = row.get(4)?;

    Ok(AccountHolder {
        id: AccountId(row.get(0)?),
        username: row.get(1)?,
        password: SecretString::from(password),
        holder_name: row.get(3)?,
        paused: paused != 0,
    })
}

#[async_trait]
impl AccountStore for LibSqlBackend {
    async fn list_account_holders(&self) -> Result<Vec<AccountHolder>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM account_holders ORDER BY id"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_account_holders: {e}")))?;

        let mut holders = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_account_holders: {e}")))?
        {
            let holder = row_to_account_holder(&row)
                .map_err(|e| DatabaseError::Query(format!("list_account_holders row parse: {e}")))?;
            holders.push(holder);
        }
        Ok(holders)
    }
}

//! SQLite-backed [`UserStore`].
//!
//! Table:
//! - `users`: id, username (unique), password_hash, token (unique,
//!   nullable), token_issued_at
//!
//! `rusqlite` is blocking, so every call runs on tokio's blocking pool
//! while holding the connection mutex. The async caller never holds the
//! lock itself.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, params};
use tether_protocol::UserId;

use crate::store::{StoredCredential, TokenOwner, UserStore};
use crate::{SessionToken, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    token TEXT UNIQUE,
    token_issued_at INTEGER
);";

/// A [`UserStore`] persisted in an SQLite database file.
pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(backend)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(backend)?;
        Self::init(conn)
    }

    /// A private, throwaway database. Used by tests and `:memory:` setups.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store worker failed: {e}")))?
    }
}

impl UserStore for SqliteUserStore {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserId, StoreError> {
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
                params![username, password_hash],
            );
            match result {
                Ok(_) => to_user_id(conn.last_insert_rowid()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateUsername)
                }
                Err(e) => Err(backend(e)),
            }
        })
        .await
    }

    async fn find_credential(
        &self,
        username: &str,
    ) -> Result<Option<StoredCredential>, StoreError> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let row = conn.query_row(
                "SELECT id, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            );
            match row {
                Ok((id, password_hash)) => Ok(Some(StoredCredential {
                    user_id: to_user_id(id)?,
                    username,
                    password_hash,
                })),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(backend(e)),
            }
        })
        .await
    }

    async fn store_token(
        &self,
        username: &str,
        token: &SessionToken,
        issued_at: u64,
    ) -> Result<bool, StoreError> {
        let username = username.to_string();
        let token = token.as_str().to_string();
        let issued_at = to_sql_time(issued_at)?;
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE users SET token = ?1, token_issued_at = ?2
                     WHERE username = ?3",
                    params![token, issued_at, username],
                )
                .map_err(backend)?;
            Ok(updated > 0)
        })
        .await
    }

    async fn take_token(
        &self,
        token: &SessionToken,
    ) -> Result<Option<TokenOwner>, StoreError> {
        let token = token.as_str().to_string();
        self.with_conn(move |conn| {
            // One statement: the match and the clear can't be separated.
            // `token_issued_at` is left in place so RETURNING still sees it.
            let row = conn.query_row(
                "UPDATE users SET token = NULL
                 WHERE token = ?1
                 RETURNING id, username, token_issued_at",
                params![token],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            );
            match row {
                Ok((id, username, issued_at)) => Ok(Some(TokenOwner {
                    user_id: to_user_id(id)?,
                    username,
                    issued_at: issued_at
                        .and_then(|t| u64::try_from(t).ok())
                        .unwrap_or(0),
                })),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(backend(e)),
            }
        })
        .await
    }

    async fn purge_tokens_issued_before(
        &self,
        cutoff: u64,
    ) -> Result<usize, StoreError> {
        let cutoff = to_sql_time(cutoff)?;
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE users SET token = NULL
                 WHERE token IS NOT NULL AND token_issued_at < ?1",
                params![cutoff],
            )
            .map_err(backend)
        })
        .await
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn to_user_id(rowid: i64) -> Result<UserId, StoreError> {
    u64::try_from(rowid)
        .map(UserId)
        .map_err(|_| StoreError::Backend(format!("negative user id {rowid}")))
}

fn to_sql_time(secs: u64) -> Result<i64, StoreError> {
    i64::try_from(secs)
        .map_err(|_| StoreError::Backend(format!("timestamp {secs} out of range")))
}

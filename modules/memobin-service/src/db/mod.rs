//! SQLite persistence for memos, users and sessions.

pub mod memos;
pub mod sessions;
pub mod users;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use thiserror::Error;

use crate::password::DEFAULT_ITERATIONS;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("no matching record found")]
    NoRecord,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub struct Db {
    conn: Mutex<Connection>,
    hash_iterations: u32,
}

impl Db {
    pub fn open(path: &str) -> Result<Self, DbError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
            hash_iterations: DEFAULT_ITERATIONS,
        };
        db.create_tables()?;
        Ok(db)
    }

    /// Override the PBKDF2 work factor for newly hashed passwords.
    pub fn with_hash_iterations(mut self, iterations: u32) -> Self {
        self.hash_iterations = iterations;
        self
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn create_tables(&self) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created TEXT NOT NULL,
                expires TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memos_created ON memos(created);

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                hashed_password TEXT NOT NULL,
                created TEXT NOT NULL,
                CONSTRAINT users_uc_email UNIQUE (email)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                expiry TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expiry);",
        )?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps so that text comparison in SQL orders correctly.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

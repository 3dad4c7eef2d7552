//! User account database operations

use chrono::Utc;
use rusqlite::{params, ErrorCode};

use super::{format_ts, Db, DbError};
use crate::password::{hash_password, verify_password};

impl Db {
    /// Create an account. A second signup with the same email fails with
    /// [`DbError::DuplicateEmail`] and leaves the table unchanged.
    pub fn insert_user(&self, name: &str, email: &str, password: &str) -> Result<(), DbError> {
        let hashed = hash_password(password, self.hash_iterations);
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO users (name, email, hashed_password, created) VALUES (?1, ?2, ?3, ?4)",
            params![name, email, hashed, format_ts(Utc::now())],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
                if e.code == ErrorCode::ConstraintViolation && msg.contains("users.email") =>
            {
                Err(DbError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the user id when `email` and `password` match an account.
    /// Unknown email and wrong password are the same error.
    pub fn authenticate_user(&self, email: &str, password: &str) -> Result<i64, DbError> {
        let conn = self.conn();
        let result = conn.query_row(
            "SELECT id, hashed_password FROM users WHERE email = ?1",
            [email],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        );
        let (id, hashed) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Err(DbError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        drop(conn);

        if verify_password(password, &hashed) {
            Ok(id)
        } else {
            Err(DbError::InvalidCredentials)
        }
    }

    pub fn user_exists(&self, id: i64) -> Result<bool, DbError> {
        let conn = self.conn();
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            [id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    pub fn count_users(&self) -> Result<i64, DbError> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        Ok(count)
    }
}

//! Session rows: one JSON object of named values per token.
//!
//! Every operation runs under the connection lock, so a read-modify-write of
//! one session cannot interleave with another request on the same token.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::{format_ts, parse_ts, Db, DbError};

type Values = Map<String, Value>;

impl Db {
    /// Upsert `key`. A missing or expired session is started afresh with
    /// `new_expiry`.
    pub fn session_put(
        &self,
        token: &str,
        key: &str,
        value: Value,
        now: DateTime<Utc>,
        new_expiry: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn();
        let (mut values, expiry) =
            load_live(&conn, token, now)?.unwrap_or_else(|| (Values::new(), new_expiry));
        values.insert(key.to_string(), value);
        store(&conn, token, &values, expiry)
    }

    pub fn session_get(
        &self,
        token: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>, DbError> {
        let conn = self.conn();
        Ok(load_live(&conn, token, now)?.and_then(|(mut values, _)| values.remove(key)))
    }

    /// Read and delete `key` in one step.
    pub fn session_pop(
        &self,
        token: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>, DbError> {
        let conn = self.conn();
        let Some((mut values, expiry)) = load_live(&conn, token, now)? else {
            return Ok(None);
        };
        let popped = values.remove(key);
        if popped.is_some() {
            store(&conn, token, &values, expiry)?;
        }
        Ok(popped)
    }

    pub fn session_remove(&self, token: &str, key: &str, now: DateTime<Utc>) -> Result<(), DbError> {
        self.session_pop(token, key, now).map(|_| ())
    }

    /// Move a live session's values and deadline to `new_token`.
    pub fn session_renew(
        &self,
        old_token: &str,
        new_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn();
        if let Some((values, expiry)) = load_live(&conn, old_token, now)? {
            conn.execute("DELETE FROM sessions WHERE token = ?1", [old_token])?;
            store(&conn, new_token, &values, expiry)?;
        }
        Ok(())
    }

    pub fn session_purge_expired(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let removed = self
            .conn()
            .execute("DELETE FROM sessions WHERE expiry <= ?1", [format_ts(now)])?;
        Ok(removed)
    }
}

fn load_live(
    conn: &Connection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<(Values, DateTime<Utc>)>, DbError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT data, expiry FROM sessions WHERE token = ?1",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((data, expiry)) = row else {
        return Ok(None);
    };
    let expiry = parse_ts(&expiry)?;
    if expiry <= now {
        conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
        return Ok(None);
    }
    let values: Values = serde_json::from_str(&data)
        .map_err(|e| DbError::Corrupt(format!("session payload: {}", e)))?;
    Ok(Some((values, expiry)))
}

fn store(
    conn: &Connection,
    token: &str,
    values: &Values,
    expiry: DateTime<Utc>,
) -> Result<(), DbError> {
    let data = serde_json::to_string(values)
        .map_err(|e| DbError::Corrupt(format!("session payload: {}", e)))?;
    conn.execute(
        "INSERT INTO sessions (token, data, expiry) VALUES (?1, ?2, ?3)
         ON CONFLICT(token) DO UPDATE SET data = ?2, expiry = ?3",
        params![token, data, format_ts(expiry)],
    )?;
    Ok(())
}

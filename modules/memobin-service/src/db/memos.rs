//! Memo database operations

use chrono::{DateTime, Duration, Utc};
use memobin_types::Memo;
use rusqlite::params;

use super::{format_ts, parse_ts, Db, DbError};

pub const LATEST_LIMIT: usize = 10;

impl Db {
    pub fn insert_memo(&self, title: &str, content: &str, expires_days: i64) -> Result<i64, DbError> {
        self.insert_memo_at(title, content, expires_days, Utc::now())
    }

    pub fn insert_memo_at(
        &self,
        title: &str,
        content: &str,
        expires_days: i64,
        created: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let expires = created + Duration::days(expires_days);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memos (title, content, created, expires) VALUES (?1, ?2, ?3, ?4)",
            params![title, content, format_ts(created), format_ts(expires)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch a memo that has not yet expired. Expired and unknown ids are
    /// both reported as [`DbError::NoRecord`].
    pub fn get_memo(&self, id: i64) -> Result<Memo, DbError> {
        let conn = self.conn();
        let result = conn.query_row(
            "SELECT id, title, content, created, expires FROM memos
             WHERE expires > ?1 AND id = ?2",
            params![format_ts(Utc::now()), id],
            read_row,
        );
        match result {
            Ok(row) => row_to_memo(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(DbError::NoRecord),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recently created live memos, newest first.
    pub fn latest_memos(&self, limit: usize) -> Result<Vec<Memo>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, content, created, expires FROM memos
             WHERE expires > ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![format_ts(Utc::now()), limit as i64], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(row_to_memo).collect()
    }

    pub fn count_live_memos(&self) -> Result<i64, DbError> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM memos WHERE expires > ?1",
            [format_ts(Utc::now())],
            |r| r.get(0),
        )?;
        Ok(count)
    }
}

type MemoRow = (i64, String, String, String, String);

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<MemoRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn row_to_memo((id, title, content, created, expires): MemoRow) -> Result<Memo, DbError> {
    Ok(Memo {
        id,
        title,
        content,
        created: parse_ts(&created)?,
        expires: parse_ts(&expires)?,
    })
}

//! Per-visitor session state and one-shot flash messages.
//!
//! A [`Session`] is the request-scoped handle handed to handlers. It talks to
//! a [`SessionStore`] backend keyed by an opaque token that travels in the
//! `session` cookie. A token is only issued on the first write, so visitors
//! who never trigger a write never get a session row.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, SameSite};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::RngCore;
use serde_json::Value;
use thiserror::Error;

use crate::db::{Db, DbError};
use crate::password::constant_time_eq;

pub const COOKIE_NAME: &str = "session";
pub const FLASH_KEY: &str = "flash";
pub const AUTH_USER_KEY: &str = "authenticatedUserID";
pub const CSRF_KEY: &str = "csrfToken";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session backend error: {0}")]
    Backend(#[from] DbError),
}

/// Storage backend for session values. Expired sessions must read as absent.
pub trait SessionStore: Send + Sync {
    /// Upsert; starts a new session with the store's lifetime if needed.
    fn put(&self, token: &str, key: &str, value: Value) -> Result<(), SessionError>;
    fn get(&self, token: &str, key: &str) -> Result<Option<Value>, SessionError>;
    /// Read and delete `key` atomically with respect to other callers.
    fn pop(&self, token: &str, key: &str) -> Result<Option<Value>, SessionError>;
    fn remove(&self, token: &str, key: &str) -> Result<(), SessionError>;
    /// Move all values of `old_token` to `new_token`, keeping the deadline.
    fn renew(&self, old_token: &str, new_token: &str) -> Result<(), SessionError>;
    fn purge_expired(&self) -> Result<usize, SessionError>;
    fn lifetime(&self) -> Duration;
}

// =====================================================
// In-memory backend
// =====================================================

#[derive(Debug)]
struct MemoryEntry {
    values: HashMap<String, Value>,
    expires_at: DateTime<Utc>,
}

pub struct MemorySessionStore {
    entries: DashMap<String, MemoryEntry>,
    lifetime: Duration,
}

impl MemorySessionStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            lifetime,
        }
    }

    fn evict_if_expired(&self, token: &str, now: DateTime<Utc>) {
        self.entries.remove_if(token, |_, e| e.expires_at <= now);
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, token: &str, key: &str, value: Value) -> Result<(), SessionError> {
        let now = Utc::now();
        self.evict_if_expired(token, now);
        self.entries
            .entry(token.to_string())
            .or_insert_with(|| MemoryEntry {
                values: HashMap::new(),
                expires_at: now + self.lifetime,
            })
            .values
            .insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, token: &str, key: &str) -> Result<Option<Value>, SessionError> {
        self.evict_if_expired(token, Utc::now());
        Ok(self
            .entries
            .get(token)
            .and_then(|e| e.values.get(key).cloned()))
    }

    fn pop(&self, token: &str, key: &str) -> Result<Option<Value>, SessionError> {
        self.evict_if_expired(token, Utc::now());
        // get_mut holds the shard write lock across the read and the delete.
        Ok(self
            .entries
            .get_mut(token)
            .and_then(|mut e| e.values.remove(key)))
    }

    fn remove(&self, token: &str, key: &str) -> Result<(), SessionError> {
        self.pop(token, key).map(|_| ())
    }

    fn renew(&self, old_token: &str, new_token: &str) -> Result<(), SessionError> {
        self.evict_if_expired(old_token, Utc::now());
        if let Some((_, entry)) = self.entries.remove(old_token) {
            self.entries.insert(new_token.to_string(), entry);
        }
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, SessionError> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

// =====================================================
// SQLite backend
// =====================================================

pub struct SqliteSessionStore {
    db: Arc<Db>,
    lifetime: Duration,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<Db>, lifetime: Duration) -> Self {
        Self { db, lifetime }
    }
}

impl SessionStore for SqliteSessionStore {
    fn put(&self, token: &str, key: &str, value: Value) -> Result<(), SessionError> {
        let now = Utc::now();
        Ok(self
            .db
            .session_put(token, key, value, now, now + self.lifetime)?)
    }

    fn get(&self, token: &str, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.db.session_get(token, key, Utc::now())?)
    }

    fn pop(&self, token: &str, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.db.session_pop(token, key, Utc::now())?)
    }

    fn remove(&self, token: &str, key: &str) -> Result<(), SessionError> {
        Ok(self.db.session_remove(token, key, Utc::now())?)
    }

    fn renew(&self, old_token: &str, new_token: &str) -> Result<(), SessionError> {
        Ok(self.db.session_renew(old_token, new_token, Utc::now())?)
    }

    fn purge_expired(&self) -> Result<usize, SessionError> {
        Ok(self.db.session_purge_expired(Utc::now())?)
    }

    fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

// =====================================================
// Request-scoped handle
// =====================================================

#[derive(Debug, Default)]
struct TokenState {
    token: Option<String>,
    /// The client's cookie no longer matches `token`.
    cookie_dirty: bool,
}

/// Session handle for one request. Cheap to clone; clones share the token.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    state: Arc<Mutex<TokenState>>,
}

impl Session {
    pub fn new(store: Arc<dyn SessionStore>, token: Option<String>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(TokenState {
                token,
                cookie_dirty: false,
            })),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.state.lock().token.clone()
    }

    fn token_or_issue(&self) -> String {
        let mut state = self.state.lock();
        match &state.token {
            Some(t) => t.clone(),
            None => {
                let t = generate_token();
                state.token = Some(t.clone());
                state.cookie_dirty = true;
                t
            }
        }
    }

    pub fn put(&self, key: &str, value: impl Into<Value>) -> Result<(), SessionError> {
        let token = self.token_or_issue();
        self.store.put(&token, key, value.into())
    }

    /// The stored string, or `""` when absent. The key is deleted either way.
    pub fn pop_string(&self, key: &str) -> Result<String, SessionError> {
        let Some(token) = self.token() else {
            return Ok(String::new());
        };
        Ok(match self.store.pop(&token, key)? {
            Some(Value::String(s)) => s,
            _ => String::new(),
        })
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, SessionError> {
        let Some(token) = self.token() else {
            return Ok(None);
        };
        Ok(self.store.get(&token, key)?.and_then(|v| v.as_i64()))
    }

    pub fn remove(&self, key: &str) -> Result<(), SessionError> {
        match self.token() {
            Some(token) => self.store.remove(&token, key),
            None => Ok(()),
        }
    }

    pub fn authenticated_user_id(&self) -> Result<Option<i64>, SessionError> {
        self.get_i64(AUTH_USER_KEY)
    }

    /// Issue a fresh token for the current data. Called whenever the
    /// visitor's privilege level changes.
    pub fn renew_token(&self) -> Result<(), SessionError> {
        let new_token = generate_token();
        let mut state = self.state.lock();
        if let Some(old) = &state.token {
            self.store.renew(old, &new_token)?;
        }
        state.token = Some(new_token);
        state.cookie_dirty = true;
        Ok(())
    }

    /// The session's CSRF token, minted and stored on first use. Token
    /// renewal carries it over with the rest of the session data.
    pub fn csrf_token(&self) -> Result<String, SessionError> {
        if let Some(token) = self.token() {
            if let Some(Value::String(csrf)) = self.store.get(&token, CSRF_KEY)? {
                return Ok(csrf);
            }
        }
        let csrf = generate_token();
        self.put(CSRF_KEY, csrf.clone())?;
        Ok(csrf)
    }

    /// False when nothing was submitted, the session has no token yet, or
    /// the two differ.
    pub fn verify_csrf(&self, submitted: Option<&str>) -> Result<bool, SessionError> {
        let (Some(submitted), Some(token)) = (submitted, self.token()) else {
            return Ok(false);
        };
        Ok(match self.store.get(&token, CSRF_KEY)? {
            Some(Value::String(expected)) => {
                constant_time_eq(submitted.as_bytes(), expected.as_bytes())
            }
            _ => false,
        })
    }

    /// Cookie to send if the token changed during this request.
    pub fn pending_cookie(&self) -> Option<Cookie<'static>> {
        let state = self.state.lock();
        if !state.cookie_dirty {
            return None;
        }
        let max_age = time::Duration::seconds(self.store.lifetime().num_seconds().max(0));
        state.token.as_ref().map(|token| {
            Cookie::build((COOKIE_NAME, token.clone()))
                .path("/")
                .max_age(max_age)
                .http_only(true)
                .same_site(SameSite::Lax)
                .build()
        })
    }
}

/// 32 random bytes, hex encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Extract the session token from a `Cookie` header value.
pub fn token_from_cookie_header(header: &str) -> Option<String> {
    Cookie::split_parse(header)
        .filter_map(Result::ok)
        .find(|c| c.name() == COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_hexdigit()))
}

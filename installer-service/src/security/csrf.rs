//! Anti-forgery tokens.
//!
//! Each browser session gets one random token; every state-mutating request must echo it back.
//! Tokens live in memory only, so restarting the installer invalidates open forms. The table holds
//! at most `capacity` sessions; the oldest session is forgotten first.

use super::crypto::{constant_time_eq, random_hex};
use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const TOKEN_BYTES: usize = 32;
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

pub trait AntiForgery: Send + Sync {
    /// Return the session's token, creating one on first use.
    fn issue(&self, session: &str) -> Result<String>;

    /// True only for the exact token previously issued to this session.
    fn verify(&self, session: &str, token: &str) -> bool;
}

#[derive(Default)]
struct TokenTable {
    tokens: HashMap<String, String>,
    /// Session ids in issue order.
    order: VecDeque<String>,
}

/// In-memory per-session token table with oldest-first eviction.
pub struct SessionTokenStore {
    table: Mutex<TokenTable>,
    capacity: usize,
}

impl SessionTokenStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: Mutex::new(TokenTable::default()),
            capacity: capacity.max(1),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().map(|t| t.tokens.len()).unwrap_or(0)
    }
}

impl Default for SessionTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AntiForgery for SessionTokenStore {
    fn issue(&self, session: &str) -> Result<String> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| anyhow::anyhow!("anti-forgery token table is poisoned"))?;
        if let Some(existing) = table.tokens.get(session) {
            return Ok(existing.clone());
        }
        let token = random_hex(TOKEN_BYTES)?;
        while table.tokens.len() >= self.capacity {
            match table.order.pop_front() {
                Some(oldest) => {
                    table.tokens.remove(&oldest);
                }
                None => break,
            }
        }
        table.order.push_back(session.to_string());
        table.tokens.insert(session.to_string(), token.clone());
        Ok(token)
    }

    fn verify(&self, session: &str, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        match self.table.lock() {
            Ok(table) => table
                .tokens
                .get(session)
                .map(|expected| constant_time_eq(expected.as_bytes(), token.as_bytes()))
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_is_stable_per_session() {
        let store = SessionTokenStore::new();
        let first = store.issue("s1").unwrap();
        assert_eq!(store.issue("s1").unwrap(), first);
        assert_ne!(store.issue("s2").unwrap(), first);
        assert_eq!(first.len(), TOKEN_BYTES * 2);
    }

    #[test]
    fn verify_rejects_wrong_missing_and_foreign_tokens() {
        let store = SessionTokenStore::new();
        let token = store.issue("s1").unwrap();
        let other = store.issue("s2").unwrap();

        assert!(store.verify("s1", &token));
        assert!(!store.verify("s1", ""));
        assert!(!store.verify("s1", &other));
        assert!(!store.verify("unknown", &token));
    }

    #[test]
    fn table_is_bounded_and_forgets_oldest_sessions_first() {
        let store = SessionTokenStore::with_capacity(3);
        let first = store.issue("s0").unwrap();
        let tokens: Vec<String> = (1..10_000)
            .map(|i| store.issue(&format!("s{}", i)).unwrap())
            .collect();

        assert_eq!(store.len(), 3);
        assert!(!store.verify("s0", &first));
        assert!(store.verify("s9999", &tokens[tokens.len() - 1]));
        assert!(store.verify("s9997", &tokens[tokens.len() - 3]));
        assert!(!store.verify("s9996", &tokens[tokens.len() - 4]));
    }

    #[test]
    fn reissuing_a_known_session_does_not_grow_the_table() {
        let store = SessionTokenStore::with_capacity(2);
        store.issue("s1").unwrap();
        for _ in 0..5 {
            store.issue("s1").unwrap();
        }
        assert_eq!(store.len(), 1);
    }
}

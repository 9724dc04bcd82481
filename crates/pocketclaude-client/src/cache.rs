//! Local session cache.
//!
//! Clients are never authoritative over session state: the agent's
//! `sessions_list` always wins. The cache only smooths the UI between
//! refreshes; entries older than the stale threshold that are missing from
//! the latest authoritative list are evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Entries absent from the authoritative list are kept at most this long.
const STALE_AFTER: Duration = Duration::from_secs(5 * 60);

struct CachedSession {
    session: Value,
    last_seen: Instant,
}

/// Mirror of the agent's session list keyed by session id.
pub struct SessionCache {
    sessions: HashMap<String, CachedSession>,
    stale_after: Duration,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::with_stale_after(STALE_AFTER)
    }

    /// Custom staleness threshold (tests use a short one).
    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            stale_after,
        }
    }

    /// Record one session observed in a status or output frame.
    pub fn observe(&mut self, session_id: &str, session: Value) {
        self.sessions.insert(
            session_id.to_string(),
            CachedSession {
                session,
                last_seen: Instant::now(),
            },
        );
    }

    /// Reconcile with an authoritative `sessions_list`. Listed sessions are
    /// refreshed; unlisted ones are evicted once they exceed the staleness
    /// threshold.
    pub fn sync(&mut self, authoritative: &[Value]) {
        let now = Instant::now();
        let mut listed: HashMap<&str, &Value> = HashMap::new();
        for session in authoritative {
            if let Some(id) = session.get("sessionId").and_then(Value::as_str) {
                listed.insert(id, session);
            }
        }

        for (id, session) in &listed {
            self.sessions.insert(
                (*id).to_string(),
                CachedSession {
                    session: (*session).clone(),
                    last_seen: now,
                },
            );
        }

        let stale_after = self.stale_after;
        self.sessions.retain(|id, cached| {
            listed.contains_key(id.as_str()) || cached.last_seen.elapsed() < stale_after
        });
    }

    pub fn get(&self, session_id: &str) -> Option<&Value> {
        self.sessions.get(session_id).map(|c| &c.session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(id: &str) -> Value {
        json!({ "sessionId": id, "projectId": "demo" })
    }

    #[test]
    fn sync_refreshes_listed_sessions() {
        let mut cache = SessionCache::new();
        cache.sync(&[session("a"), session("b")]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn fresh_unlisted_sessions_survive() {
        let mut cache = SessionCache::new();
        cache.observe("a", session("a"));
        cache.sync(&[session("b")]);
        // "a" was seen moments ago; the authoritative list not containing it
        // is not yet grounds for eviction.
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn stale_unlisted_sessions_are_evicted() {
        let mut cache = SessionCache::with_stale_after(Duration::from_millis(0));
        cache.observe("a", session("a"));
        cache.sync(&[session("b")]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn stale_but_listed_sessions_are_kept() {
        let mut cache = SessionCache::with_stale_after(Duration::from_millis(0));
        cache.observe("a", session("a"));
        cache.sync(&[session("a")]);
        assert!(cache.get("a").is_some());
    }
}

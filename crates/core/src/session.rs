//! Server-side session store.
//!
//! Sessions are keyed by an opaque generated identifier, carried by the
//! client in the `session_id` cookie (or supplied per request via the
//! `X-Auth-Token` header). Each session holds the auth backend's token plus
//! its timestamps; the gateway never persists tokens anywhere else.
//!
//! Lock discipline: every session is guarded by its own mutex. Callers take
//! the guard, copy out what they need, and release it before any engine call
//! or stream subscription begins, so concurrent requests for one session
//! never serialize on long-running work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use crate::auth::opaque_id;

/// One session record.
#[derive(Debug, Clone)]
pub struct Session {
    /// The auth backend's token, opaque to the gateway.
    pub token: String,
    pub created: OffsetDateTime,
    pub last_seen: OffsetDateTime,
    /// Idle timeout for this session.
    pub timeout: Duration,
}

impl Session {
    fn expired_at(&self, now: OffsetDateTime) -> bool {
        now - self.last_seen > self.timeout
    }
}

/// Shared session store supporting concurrent reads and per-session locking.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session holding `token`, returning the new session id.
    pub async fn create(&self, token: String, timeout: Duration) -> String {
        let id = opaque_id();
        let now = OffsetDateTime::now_utc();
        let session = Session {
            token,
            created: now,
            last_seen: now,
            timeout,
        };
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        id
    }

    /// Fetch a live session handle, refreshing its idle timer. Expired
    /// sessions are dropped here and behave as if they never existed.
    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        let handle = self.sessions.read().await.get(id).cloned()?;
        let now = OffsetDateTime::now_utc();
        {
            let mut session = handle.lock().await;
            if session.expired_at(now) {
                drop(session);
                tracing::debug!(session = %id, "evicting expired session");
                self.sessions.write().await.remove(id);
                return None;
            }
            session.last_seen = now;
        }
        Some(handle)
    }

    /// Copy out the token for a live session, holding the session lock only
    /// for the duration of the read.
    pub async fn token_for(&self, id: &str) -> Option<String> {
        let handle = self.get(id).await?;
        let token = handle.lock().await.token.clone();
        Some(token)
    }

    pub async fn destroy(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Destroy `id` and issue a fresh empty-token session in its place,
    /// returning the replacement id. The old id is unusable afterwards.
    pub async fn regenerate(&self, id: &str, timeout: Duration) -> String {
        self.destroy(id).await;
        self.create(String::new(), timeout).await
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_read_back_token() {
        let store = SessionStore::new();
        let id = store
            .create("tok-1".into(), Duration::from_secs(60))
            .await;
        assert_eq!(store.token_for(&id).await.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn expired_session_behaves_as_missing() {
        let store = SessionStore::new();
        let id = store.create("tok-2".into(), Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get(&id).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn destroy_removes_the_session() {
        let store = SessionStore::new();
        let id = store.create("tok-3".into(), Duration::from_secs(60)).await;
        store.destroy(&id).await;
        assert!(store.token_for(&id).await.is_none());
    }

    #[tokio::test]
    async fn regenerate_invalidates_the_old_id() {
        let store = SessionStore::new();
        let id = store.create("tok-4".into(), Duration::from_secs(60)).await;
        let fresh = store.regenerate(&id, Duration::from_secs(60)).await;
        assert_ne!(id, fresh);
        assert!(store.get(&id).await.is_none());
        let replacement = store.get(&fresh).await.unwrap();
        assert!(replacement.lock().await.token.is_empty());
    }
}

//! Connection registry: live sessions indexed by session and by user.
//!
//! Both indexes live in one table behind a single lock, so a session is
//! always present in both or in neither.

use super::handle::SessionHandle;
use pushgate_core::{GatewayError, GatewayResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Tables {
    /// Session ID → handle.
    by_id: HashMap<String, SessionHandle>,
    /// User ID → session IDs in registration order. Never holds an empty list.
    by_user: HashMap<String, Vec<String>>,
}

/// Registry of authenticated, active sessions.
pub struct ConnectionRegistry {
    tables: RwLock<Tables>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Register a session under its session ID and user ID.
    ///
    /// A session ID that is already registered is refused and the existing
    /// entry is left untouched.
    pub async fn register(&self, handle: SessionHandle) -> GatewayResult<()> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        if let Some(existing) = tables.by_id.get(&handle.session_id) {
            warn!(
                session_id = %handle.session_id,
                existing_user = %existing.user_id,
                user_id = %handle.user_id,
                "session id already registered"
            );
            return Err(GatewayError::SessionConflict(handle.session_id));
        }

        tables
            .by_user
            .entry(handle.user_id.clone())
            .or_default()
            .push(handle.session_id.clone());

        info!(
            session_id = %handle.session_id,
            user_id = %handle.user_id,
            sessions = tables.by_id.len() + 1,
            "session registered"
        );
        tables.by_id.insert(handle.session_id.clone(), handle);

        Ok(())
    }

    /// Remove a session from both indexes. Returns the removed handle, or
    /// `None` if the session was not registered.
    pub async fn deregister(&self, session_id: &str) -> Option<SessionHandle> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        let handle = tables.by_id.remove(session_id)?;

        if let Some(ids) = tables.by_user.get_mut(&handle.user_id) {
            ids.retain(|id| id != session_id);
            if ids.is_empty() {
                tables.by_user.remove(&handle.user_id);
            }
        }

        info!(
            session_id,
            user_id = %handle.user_id,
            sessions = tables.by_id.len(),
            "session deregistered"
        );

        Some(handle)
    }

    /// All sessions of a user, in registration order. Empty if the user is offline.
    pub async fn lookup_by_user(&self, user_id: &str) -> Vec<SessionHandle> {
        let tables = self.tables.read().await;
        match tables.by_user.get(user_id) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| tables.by_id.get(id).cloned())
                .collect(),
            None => {
                debug!(user_id, "no sessions for user");
                Vec::new()
            }
        }
    }

    /// Every registered session.
    pub async fn all(&self) -> Vec<SessionHandle> {
        let tables = self.tables.read().await;
        tables.by_id.values().cloned().collect()
    }

    /// Look up a session by ID.
    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.tables.read().await.by_id.get(session_id).cloned()
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.tables.read().await.by_id.len()
    }

    /// Number of users with at least one session.
    pub async fn user_count(&self) -> usize {
        self.tables.read().await.by_user.len()
    }

    /// Verify the cross-index invariants under a single read lock.
    #[cfg(test)]
    pub(crate) async fn check_invariants(&self) -> Result<(), String> {
        let tables = self.tables.read().await;
        let mut indexed = 0;

        for (user_id, ids) in &tables.by_user {
            if ids.is_empty() {
                return Err(format!("user {user_id} has an empty session list"));
            }
            for id in ids {
                match tables.by_id.get(id) {
                    Some(handle) if &handle.user_id == user_id => indexed += 1,
                    Some(handle) => {
                        return Err(format!(
                            "session {id} indexed under {user_id} but owned by {}",
                            handle.user_id
                        ))
                    }
                    None => return Err(format!("session {id} of {user_id} missing from id index")),
                }
            }
        }

        if indexed != tables.by_id.len() {
            return Err(format!(
                "{} sessions by id but {indexed} indexed by user",
                tables.by_id.len()
            ));
        }
        Ok(())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn handle(session_id: &str, user_id: &str) -> (SessionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (
            SessionHandle::new(session_id, user_id, tx, CancellationToken::new()),
            rx,
        )
    }

    fn ids(handles: &[SessionHandle]) -> Vec<&str> {
        handles.iter().map(|h| h.session_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_register_indexes_both_ways() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("10.0.0.1_5000", "u1");
        registry.register(h).await.unwrap();

        let by_user = registry.lookup_by_user("u1").await;
        assert_eq!(ids(&by_user), vec!["10.0.0.1_5000"]);

        let by_id = registry.get("10.0.0.1_5000").await.unwrap();
        assert_eq!(by_id.user_id, "u1");
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(registry.user_count().await, 1);
        registry.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_deregister_last_session_drops_user() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("s1", "u1");
        registry.register(h).await.unwrap();

        let removed = registry.deregister("s1").await.unwrap();
        assert_eq!(removed.user_id, "u1");

        assert!(registry.get("s1").await.is_none());
        assert!(registry.lookup_by_user("u1").await.is_empty());
        assert_eq!(registry.user_count().await, 0);
        registry.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_deregister_keeps_other_sessions_of_user() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = handle("s1", "u1");
        let (b, _rb) = handle("s2", "u1");
        let (c, _rc) = handle("s3", "u1");
        registry.register(a).await.unwrap();
        registry.register(b).await.unwrap();
        registry.register(c).await.unwrap();

        registry.deregister("s2").await;

        assert_eq!(ids(&registry.lookup_by_user("u1").await), vec!["s1", "s3"]);
        assert_eq!(registry.user_count().await, 1);
        registry.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle("s1", "u1");
        registry.register(h).await.unwrap();

        assert!(registry.deregister("s1").await.is_some());
        assert!(registry.deregister("s1").await.is_none());
        assert!(registry.deregister("never-registered").await.is_none());
        registry.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_preserves_registration_order() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for id in ["c", "a", "b"] {
            let (h, rx) = handle(id, "u1");
            receivers.push(rx);
            registry.register(h).await.unwrap();
        }
        assert_eq!(ids(&registry.lookup_by_user("u1").await), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_conflicting_session_id_is_refused() {
        let registry = ConnectionRegistry::new();
        let (first, _r1) = handle("s1", "u1");
        let (second, _r2) = handle("s1", "u2");
        registry.register(first).await.unwrap();

        let err = registry.register(second).await.unwrap_err();
        assert!(matches!(err, GatewayError::SessionConflict(id) if id == "s1"));

        assert_eq!(registry.get("s1").await.unwrap().user_id, "u1");
        assert!(registry.lookup_by_user("u2").await.is_empty());
        registry.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_all_lists_every_session() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for (sid, uid) in [("s1", "u1"), ("s2", "u1"), ("s3", "u2")] {
            let (h, rx) = handle(sid, uid);
            receivers.push(rx);
            registry.register(h).await.unwrap();
        }

        let all = registry.all().await;
        let mut got = ids(&all);
        got.sort();
        assert_eq!(got, vec!["s1", "s2", "s3"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_deregister_keeps_invariants() {
        let registry = Arc::new(ConnectionRegistry::new());
        let done = CancellationToken::new();

        let checker = {
            let registry = registry.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut checks = 0usize;
                while !done.is_cancelled() {
                    registry.check_invariants().await.unwrap();
                    for user in 0..4 {
                        for h in registry.lookup_by_user(&format!("u{user}")).await {
                            assert_eq!(h.user_id, format!("u{user}"));
                        }
                    }
                    checks += 1;
                    tokio::task::yield_now().await;
                }
                checks
            })
        };

        let mut workers = Vec::new();
        for worker in 0..16 {
            let registry = registry.clone();
            workers.push(tokio::spawn(async move {
                for i in 0..50 {
                    let sid = format!("10.0.{worker}.{i}_40000");
                    let (h, _rx) = handle(&sid, &format!("u{}", i % 4));
                    registry.register(h).await.unwrap();
                    tokio::task::yield_now().await;
                    if i % 3 != 0 {
                        assert!(registry.deregister(&sid).await.is_some());
                    }
                }
            }));
        }
        for w in workers {
            w.await.unwrap();
        }
        done.cancel();
        assert!(checker.await.unwrap() > 0);

        registry.check_invariants().await.unwrap();
        // i % 3 == 0 for 17 of 50 iterations per worker
        assert_eq!(registry.session_count().await, 16 * 17);

        for h in registry.all().await {
            registry.deregister(&h.session_id).await;
        }
        assert_eq!(registry.session_count().await, 0);
        assert_eq!(registry.user_count().await, 0);
    }
}

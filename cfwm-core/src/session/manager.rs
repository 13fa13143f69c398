//! Session store abstraction and the in-memory implementation

use super::store::Session;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Mapping from user identifier to session record.
///
/// There is no removal operation. Callers that mutate a session
/// must not interleave two mutations of the same user; the bot loop achieves
/// this by handling one event at a time.
pub trait SessionStore: Send + Sync {
    /// Get a session if it exists
    fn get(&self, user_id: &str) -> Option<Session>;

    /// Get a session, creating an idle unapproved one if absent
    fn get_or_create(&self, user_id: &str) -> Session;

    /// Store a session under its `user_id`
    fn set(&self, session: Session);

    /// Number of known sessions
    fn len(&self) -> usize;

    /// Whether no session exists yet
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-lifetime session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, user_id: &str) -> Option<Session> {
        self.sessions.read().get(user_id).cloned()
    }

    fn get_or_create(&self, user_id: &str) -> Session {
        if let Some(session) = self.sessions.read().get(user_id) {
            return session.clone();
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(user_id, "Creating session");
                Session::new(user_id)
            })
            .clone()
    }

    fn set(&self, session: Session) {
        self.sessions
            .write()
            .insert(session.user_id.clone(), session);
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::Step;

    #[test]
    fn test_get_missing_session() {
        let store = InMemorySessionStore::new();
        assert!(store.get("123").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_or_create_session() {
        let store = InMemorySessionStore::new();

        let session = store.get_or_create("123");
        assert_eq!(session.user_id, "123");
        assert_eq!(session.step, Step::None);
        assert!(!session.approved);

        // The created session is stored
        assert!(store.get("123").is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_or_create_keeps_existing() {
        let store = InMemorySessionStore::new();
        let mut session = store.get_or_create("123");
        session.name = Some("Alice".to_string());
        store.set(session);

        let again = store.get_or_create("123");
        assert_eq!(again.name.as_deref(), Some("Alice"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_isolated_per_user() {
        let store = InMemorySessionStore::new();
        let mut first = store.get_or_create("1");
        let _second = store.get_or_create("2");

        first.enter(Step::InputName);
        store.set(first);

        assert_eq!(store.get("1").unwrap().step, Step::InputName);
        assert_eq!(store.get("2").unwrap().step, Step::None);
    }
}

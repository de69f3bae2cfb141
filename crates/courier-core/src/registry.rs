//! Identity-to-session registry, the routing source of truth.
//!
//! The registry answers one question: is this user currently reachable,
//! and through which session. None of its operations fail in the error
//! sense: absence is a first-class outcome, not an exception.

use crate::session::SessionId;
use courier_protocol::UserId;
use dashmap::DashMap;
use tracing::debug;

/// Map from stable user identity to current transport session.
///
/// A symmetric session-to-identity map is kept in sync with every
/// registration so disconnect cleanup is O(1) instead of a reverse scan.
#[derive(Debug, Default)]
pub struct Registry {
    /// Identity -> current session. At most one session per identity.
    sessions: DashMap<UserId, SessionId>,
    /// Session -> identity, maintained symmetrically for cleanup.
    identities: DashMap<SessionId, UserId>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an identity to a session. Unconditional upsert: the last
    /// registration wins.
    ///
    /// A previous session registered for the same identity becomes an
    /// orphan: still connected, but unroutable until it disconnects or
    /// re-registers. It is left alive (multi-tab tolerance).
    pub fn register(&self, user: UserId, session: SessionId) {
        if let Some(old) = self.sessions.insert(user.clone(), session.clone()) {
            if old != session {
                self.identities.remove_if(&old, |_, u| u == &user);
                debug!(user = %user, orphaned = %old, "Re-registration orphaned previous session");
            }
        }
        // A session re-registering under a new identity gives up its old one,
        // keeping the two maps bijective.
        if let Some(previous) = self.identities.insert(session.clone(), user.clone()) {
            if previous != user {
                self.sessions.remove_if(&previous, |_, current| current == &session);
            }
        }
        debug!(user = %user, session = %session, "User registered");
    }

    /// Look up the current session for an identity.
    ///
    /// `None` means "recipient offline", a legitimate outcome every call
    /// site treats as a silent no-op branch.
    #[must_use]
    pub fn resolve(&self, user: &str) -> Option<SessionId> {
        self.sessions.get(user).map(|s| s.clone())
    }

    /// Remove the binding owned by a session, if any.
    ///
    /// Silent no-op for sessions that never registered (e.g. disconnected
    /// before sending `register`). An orphaned session's late unregister
    /// must not evict the identity's newer binding, hence the guard.
    pub fn unregister(&self, session: &SessionId) {
        if let Some((_, user)) = self.identities.remove(session) {
            self.sessions
                .remove_if(&user, |_, current| current == session);
            debug!(user = %user, session = %session, "User unregistered");
        }
    }

    /// Look up the identity bound to a session.
    #[must_use]
    pub fn identity_of(&self, session: &SessionId) -> Option<UserId> {
        self.identities.get(session).map(|u| u.clone())
    }

    /// Get the number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no identities are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_resolve() {
        let registry = Registry::new();
        registry.register("alice".into(), "s1".into());

        assert_eq!(registry.resolve("alice"), Some(SessionId::from("s1")));
        assert_eq!(registry.identity_of(&"s1".into()), Some("alice".to_string()));
        assert_eq!(registry.resolve("bob"), None);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = Registry::new();
        registry.register("alice".into(), "s1".into());
        registry.register("alice".into(), "s2".into());

        assert_eq!(registry.resolve("alice"), Some(SessionId::from("s2")));
        // The orphaned session no longer maps back to the identity.
        assert_eq!(registry.identity_of(&"s1".into()), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_clears_binding() {
        let registry = Registry::new();
        registry.register("alice".into(), "s1".into());
        registry.unregister(&"s1".into());

        assert_eq!(registry.resolve("alice"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_unknown_session_is_noop() {
        let registry = Registry::new();
        registry.register("alice".into(), "s1".into());

        registry.unregister(&"never-registered".into());
        assert_eq!(registry.resolve("alice"), Some(SessionId::from("s1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_orphan_unregister_keeps_new_binding() {
        let registry = Registry::new();
        registry.register("alice".into(), "s1".into());
        registry.register("alice".into(), "s2".into());

        // The orphaned session disconnects after the re-registration.
        registry.unregister(&"s1".into());
        assert_eq!(registry.resolve("alice"), Some(SessionId::from("s2")));
    }

    #[test]
    fn test_session_reuse_across_identities() {
        let registry = Registry::new();
        registry.register("alice".into(), "s1".into());
        // Same session re-registers as a different identity.
        registry.register("carol".into(), "s1".into());

        assert_eq!(registry.resolve("carol"), Some(SessionId::from("s1")));
        assert_eq!(registry.identity_of(&"s1".into()), Some("carol".to_string()));
        // The session gave up its previous identity.
        assert_eq!(registry.resolve("alice"), None);

        registry.unregister(&"s1".into());
        assert_eq!(registry.resolve("carol"), None);
        assert!(registry.is_empty());
    }
}

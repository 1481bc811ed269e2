//! Principals of multi-tenant user sessions.
//!
//! A single browser session may be logged in with several identity providers
//! at once. [`SessionPrincipals`] keeps one [`Principal`] per client
//! registration for one session; [`MultiTenantSessionStore`] holds the
//! sessions of a server.
//!
//! Writes to a session are mutually exclusive and publish a new immutable
//! snapshot, so readers never observe a partial update. Sessions are
//! independent: no lock spans two sessions.

use crate::server::auth::Principal;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registration id → principal snapshot.
pub type PrincipalsByRegistration = HashMap<String, Principal>;

/// Principals established within one user session.
#[derive(Debug, Default)]
pub struct SessionPrincipals {
    /// `None` until the first principal is added.
    principals: RwLock<Option<Arc<PrincipalsByRegistration>>>,
}

impl SessionPrincipals {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the principal of `registration_id`.
    pub fn add(&self, registration_id: impl Into<String>, principal: Principal) {
        let mut guard = self.principals.write();
        let mut next = guard.as_deref().cloned().unwrap_or_default();
        next.insert(registration_id.into(), principal);
        *guard = Some(Arc::new(next));
    }

    /// Remove the principal of `registration_id`, returning it if present.
    pub fn remove(&self, registration_id: &str) -> Option<Principal> {
        let mut guard = self.principals.write();
        let current = guard.as_ref()?;
        if !current.contains_key(registration_id) {
            return None;
        }
        let mut next = PrincipalsByRegistration::clone(current);
        let removed = next.remove(registration_id);
        *guard = Some(Arc::new(next));
        removed
    }

    /// Principal of `registration_id`.
    pub fn get(&self, registration_id: &str) -> Option<Principal> {
        self.snapshot().get(registration_id).cloned()
    }

    /// All principals of the session, in no particular order.
    pub fn get_all(&self) -> Vec<Principal> {
        self.snapshot().values().cloned().collect()
    }

    /// Consistent view of the session at this instant.
    pub fn snapshot(&self) -> Arc<PrincipalsByRegistration> {
        self.principals.read().clone().unwrap_or_default()
    }

    /// Number of principals.
    pub fn len(&self) -> usize {
        self.principals.read().as_ref().map_or(0, |p| p.len())
    }

    /// Whether the session holds no principal.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session id → session principals.
#[derive(Debug, Default)]
pub struct MultiTenantSessionStore {
    sessions: DashMap<String, Arc<SessionPrincipals>>,
}

impl MultiTenantSessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session `session_id`, created empty on first access.
    pub fn session(&self, session_id: &str) -> Arc<SessionPrincipals> {
        if let Some(session) = self.sessions.get(session_id) {
            return Arc::clone(session.value());
        }
        Arc::clone(
            self.sessions
                .entry(session_id.to_string())
                .or_default()
                .value(),
        )
    }

    /// Session `session_id`, if it exists.
    pub fn get_session(&self, session_id: &str) -> Option<Arc<SessionPrincipals>> {
        self.sessions
            .get(session_id)
            .map(|session| Arc::clone(session.value()))
    }

    /// Drop session `session_id` with all its principals.
    pub fn invalidate(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            tracing::debug!(session_id, "Invalidated session");
        }
        removed
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no session.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn principal(name: &str, issuer: &str) -> Principal {
        Principal::new(name, issuer)
    }

    #[test]
    fn test_empty_session() {
        let session = SessionPrincipals::new();
        assert!(session.is_empty());
        assert_eq!(session.get("keycloak"), None);
        assert!(session.get_all().is_empty());
        assert_eq!(session.remove("keycloak"), None);
    }

    #[test]
    fn test_add_overwrite_remove() {
        let session = SessionPrincipals::new();
        session.add("keycloak", principal("alice", "https://kc"));
        session.add("auth0", principal("alice@auth0", "https://auth0"));
        session.add("keycloak", principal("alice2", "https://kc"));

        assert_eq!(session.len(), 2);
        assert_eq!(session.get("keycloak").unwrap().name(), "alice2");

        let mut names: Vec<_> = session
            .get_all()
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["alice2", "alice@auth0"]);

        assert_eq!(session.remove("auth0").unwrap().name(), "alice@auth0");
        assert_eq!(session.remove("auth0"), None);
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_snapshot_is_stable() {
        let session = SessionPrincipals::new();
        session.add("a", principal("a", "https://a"));
        let before = session.snapshot();
        session.add("b", principal("b", "https://b"));
        assert_eq!(before.len(), 1);
        assert_eq!(session.snapshot().len(), 2);
    }

    #[test]
    fn test_store_sessions_are_independent() {
        let store = MultiTenantSessionStore::new();
        store.session("s1").add("kc", principal("u1", "https://kc"));
        store.session("s2").add("kc", principal("u2", "https://kc"));

        assert_eq!(store.len(), 2);
        assert_eq!(store.session("s1").get("kc").unwrap().name(), "u1");
        assert!(Arc::ptr_eq(&store.session("s1"), &store.session("s1")));

        assert!(store.invalidate("s1"));
        assert!(!store.invalidate("s1"));
        assert!(store.get_session("s1").is_none());
        assert_eq!(store.get_session("s2").unwrap().len(), 1);
    }
}

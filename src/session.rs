//! Per-user settings: the email address a session is known by, and the
//! rendering style it prefers.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

/// Lookup of stored per-session settings.
///
/// Sessions are keyed by name and whether they are authenticated; an
/// anonymous session and an account may share a name.
pub trait SessionStore: Send + Sync {
    /// The email address stored for the session, if any.
    fn email(&self, sid: &str, authenticated: bool) -> Option<String>;

    /// The style the session chose for `transport` notifications in `realm`.
    fn preferred_format(
        &self,
        realm: &str,
        sid: &str,
        authenticated: bool,
        transport: &str,
    ) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
struct SessionAttributes {
    email: Option<String>,
    /// transport -> style. Formats are unified across realms.
    formats: HashMap<String, String>,
}

/// In-memory [`SessionStore`].
///
/// Useful for tests and for callers that load preferences from elsewhere.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<(String, bool), SessionAttributes>>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the email address of a session.
    pub fn set_email(&self, sid: impl Into<String>, authenticated: bool, email: impl Into<String>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((sid.into(), authenticated))
            .or_default()
            .email = Some(email.into());
    }

    /// Store the preferred style of a session for `transport`.
    pub fn set_format(
        &self,
        sid: impl Into<String>,
        authenticated: bool,
        transport: impl Into<String>,
        style: impl Into<String>,
    ) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((sid.into(), authenticated))
            .or_default()
            .formats
            .insert(transport.into(), style.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn email(&self, sid: &str, authenticated: bool) -> Option<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(sid.to_string(), authenticated))
            .and_then(|session| session.email.clone())
            .filter(|email| !email.is_empty())
    }

    fn preferred_format(
        &self,
        _realm: &str,
        sid: &str,
        authenticated: bool,
        transport: &str,
    ) -> Option<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(sid.to_string(), authenticated))
            .and_then(|session| session.formats.get(transport).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_keyed_by_authentication() {
        let store = MemorySessionStore::new();
        assert!(store.is_empty());

        store.set_email("alice", true, "alice@example.com");

        assert_eq!(store.email("alice", true).as_deref(), Some("alice@example.com"));
        assert_eq!(store.email("alice", false), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_preferred_format_per_transport() {
        let store = MemorySessionStore::new();
        store.set_format("bob", true, "email", "text/html");

        assert_eq!(
            store
                .preferred_format("ticket", "bob", true, "email")
                .as_deref(),
            Some("text/html")
        );
        assert_eq!(store.preferred_format("ticket", "bob", true, "xmpp"), None);
        assert_eq!(store.email("bob", true), None);
    }
}

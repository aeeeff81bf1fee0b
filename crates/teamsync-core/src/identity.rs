//! The signed-in user, as reported by the authentication collaborator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Source of the current identity.
///
/// `watch` hands out a receiver that observes every sign-in and sign-out;
/// `None` means nobody is signed in.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
    fn watch(&self) -> watch::Receiver<Option<Identity>>;
}

/// Identity that changes over a session.
#[derive(Clone)]
pub struct SessionIdentity {
    tx: Arc<watch::Sender<Option<Identity>>>,
}

impl SessionIdentity {
    pub fn signed_out() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn sign_in(&self, identity: Identity) {
        self.tx.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        self.tx.send_replace(None);
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::signed_out()
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }
}

/// Fixed identity, e.g. from request headers or a CLI flag.
pub struct StaticIdentity {
    tx: watch::Sender<Option<Identity>>,
}

impl StaticIdentity {
    pub fn new(identity: Option<Identity>) -> Self {
        let (tx, _) = watch::channel(identity);
        Self { tx }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_changes_are_observed() {
        let session = SessionIdentity::signed_out();
        let mut rx = session.watch();
        assert!(session.current().is_none());

        session.sign_in(Identity::new("u1", "Ann"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(|i| i.id.as_str()), Some("u1"));

        session.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }

    #[test]
    fn sign_in_without_watchers_still_updates() {
        let session = SessionIdentity::default();
        session.sign_in(Identity::new("u2", "Bob"));
        assert_eq!(session.current(), Some(Identity::new("u2", "Bob")));
    }

    #[test]
    fn static_identity_is_fixed() {
        let fixed = StaticIdentity::new(Some(Identity::new("u1", "Ann")));
        assert_eq!(fixed.current().unwrap().name, "Ann");
        assert_eq!(fixed.watch().borrow().as_ref().unwrap().id, "u1");
    }
}

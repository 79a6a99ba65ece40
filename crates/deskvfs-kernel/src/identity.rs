//! Caller identity, consumed from the session layer.
//!
//! The VFS never authenticates anyone. It only asks who is calling (to pick
//! the per-user root of a handler) and whether a user exists.

use std::collections::HashSet;

use parking_lot::RwLock;

/// Identity/existence oracle supplied by the authentication layer.
pub trait IdentityOracle: Send + Sync {
    /// Whether a user with this name exists.
    fn user_exists(&self, username: &str) -> bool;

    /// Name of the user on whose behalf the current call runs.
    fn caller(&self) -> Option<String>;
}

/// Fixed identity: a known user set and a settable caller.
///
/// Used by the CLI (caller taken from the command line) and by tests.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    users: RwLock<HashSet<String>>,
    caller: RwLock<Option<String>>,
}

impl StaticIdentity {
    /// No users, no caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A single known user who is also the caller.
    pub fn single(username: impl Into<String>) -> Self {
        let username = username.into();
        let id = Self::default();
        id.users.write().insert(username.clone());
        *id.caller.write() = Some(username);
        id
    }

    /// Add a known user.
    pub fn add_user(&self, username: impl Into<String>) {
        self.users.write().insert(username.into());
    }

    /// Switch the caller. The user does not have to exist.
    pub fn set_caller(&self, username: Option<String>) {
        *self.caller.write() = username;
    }
}

impl IdentityOracle for StaticIdentity {
    fn user_exists(&self, username: &str) -> bool {
        self.users.read().contains(username)
    }

    fn caller(&self) -> Option<String> {
        self.caller.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single() {
        let id = StaticIdentity::single("amy");
        assert!(id.user_exists("amy"));
        assert!(!id.user_exists("bob"));
        assert_eq!(id.caller().as_deref(), Some("amy"));
    }

    #[test]
    fn test_switch_caller() {
        let id = StaticIdentity::anonymous();
        assert!(id.caller().is_none());
        id.add_user("bob");
        id.set_caller(Some("bob".into()));
        assert_eq!(id.caller().as_deref(), Some("bob"));
    }
}

//! Series store credentials

use std::fmt;

use parking_lot::RwLock;

/// Login credentials for the series store
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials plus the current bearer token.
///
/// Owned by the caller and shared with the client by `Arc`, so a refresh is
/// visible to every request issued afterwards.
pub struct Session {
    credentials: Credentials,
    token: RwLock<Option<String>>,
}

impl Session {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            token: RwLock::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("credentials", &self.credentials)
            .field("has_token", &self.token.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_prints_secrets() {
        let session = Session::new(Credentials::new("admin", "hunter2"));
        session.set_token("secret-token");

        let printed = format!("{session:?}");
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("has_token: true"));
    }

    #[test]
    fn test_clear_token() {
        let session = Session::new(Credentials::new("admin", "pw"));
        session.set_token("t");
        assert_eq!(session.token().as_deref(), Some("t"));
        session.clear();
        assert!(session.token().is_none());
    }
}

// Credential source for the bearer token.
//
// Both the STOMP handshake and REST requests read the token fresh on every
// use, so a token replaced or cleared elsewhere takes effect on the next
// connect or request.

use std::sync::{PoisonError, RwLock};

use secrecy::SecretString;

/// Persistent client storage for the bearer token (the `token` key).
pub trait TokenStore: Send + Sync + 'static {
    /// Current token, if one is stored.
    fn token(&self) -> Option<SecretString>;

    /// Forget the stored token (the backend rejected it).
    fn clear(&self);
}

/// In-process token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<SecretString>>,
}

impl MemoryTokenStore {
    pub fn new(token: Option<SecretString>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: SecretString) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<SecretString> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

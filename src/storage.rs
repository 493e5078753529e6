//! Bearer token storage.
//!
//! The signed-in user's token lives in the OS credential store (Keychain,
//! DPAPI, Secret Service) via the `keyring` crate. Its absence is a normal
//! state: cart operations fall back to local-only.

use keyring::Entry;
use std::sync::Mutex;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::StorageError;

const SERVICE_NAME: &str = "marketplace-sync";
const KEY_AUTH_TOKEN: &str = "auth_token";

/// Source of the bearer credential attached to remote calls.
pub trait TokenStore: Send + Sync {
    /// The current token, or `None` when signed out. Blank tokens are `None`.
    fn token(&self) -> Option<Zeroizing<String>>;

    fn set_token(&self, token: &str) -> Result<(), StorageError>;

    fn clear_token(&self) -> Result<(), StorageError>;

    fn has_token(&self) -> bool {
        self.token().is_some()
    }
}

fn non_blank(token: String) -> Option<Zeroizing<String>> {
    let token = Zeroizing::new(token);
    if token.trim().is_empty() {
        None
    } else {
        Some(token)
    }
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

/// Token store backed by the OS credential store.
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Separate service names keep test runs away from the real entry.
    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, keyring::Error> {
        Entry::new(&self.service, KEY_AUTH_TOKEN)
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn token(&self) -> Option<Zeroizing<String>> {
        let entry = match self.entry() {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => non_blank(pw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, "keyring: failed to read token");
                None
            }
        }
    }

    fn set_token(&self, token: &str) -> Result<(), StorageError> {
        self.entry()?.set_password(token.trim())?;
        info!("auth token stored");
        Ok(())
    }

    /// Silently succeeds if there is no token.
    fn clear_token(&self) -> Result<(), StorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                info!("auth token cleared");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<Zeroizing<String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(non_blank(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<Zeroizing<String>> {
        self.token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn set_token(&self, token: &str) -> Result<(), StorageError> {
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) =
            non_blank(token.trim().to_string());
        Ok(())
    }

    fn clear_token(&self) -> Result<(), StorageError> {
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}

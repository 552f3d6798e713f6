//! Device identity
//!
//! Owns the stable device identifier and derives the authentication credential
//! from it. The credential is HMAC-SHA256 over the identifier keyed with the shared
//! secret, rendered as unpadded URL-safe base64, so the agent and the collection
//! service compute it independently.

mod store;

pub use store::{FileIdentityStore, IdentityStore, MemoryIdentityStore};

use crate::error::AgentResult;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Authentication credential derived from the device identifier
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap an already-derived token
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Empty credential, produced when no shared secret is configured
    pub fn invalid() -> Self {
        Self(String::new())
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `other` is this credential
    pub fn matches(&self, other: &str) -> bool {
        self.is_valid() && self.0 == other
    }

    /// Short SHA-256 fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        Self::fingerprint_of(&self.0)
    }

    /// Fingerprint of an arbitrary secret value
    pub fn fingerprint_of(value: &str) -> String {
        if value.is_empty() {
            return "<empty>".to_string();
        }
        let digest = Sha256::digest(value.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// Derive the credential for `device_id`
///
/// Returns [`Credential::invalid`] when the secret is empty; callers must check
/// [`Credential::is_valid`].
pub fn derive_credential(secret: &str, device_id: &str) -> Credential {
    if secret.is_empty() {
        return Credential::invalid();
    }

    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(device_id.as_bytes());
            Credential(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
        }
        Err(e) => {
            error!("Failed to initialise HMAC: {}", e);
            Credential::invalid()
        }
    }
}

/// Owns the device identifier and its credential
#[derive(Clone)]
pub struct IdentityProvider {
    store: Arc<dyn IdentityStore>,
    secret: Arc<str>,
    current: Arc<Mutex<Option<String>>>,
}

impl IdentityProvider {
    pub fn new(store: Arc<dyn IdentityStore>, secret: &str) -> Self {
        Self {
            store,
            secret: Arc::from(secret),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// The device identifier, loading or generating it on first use
    ///
    /// Once known, the identifier is held for the process lifetime; the store is
    /// only consulted again after a restart.
    pub fn device_id(&self) -> AgentResult<String> {
        let mut current = self.current.lock();
        if let Some(id) = current.as_ref() {
            return Ok(id.clone());
        }

        let id = match self.store.load()? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                info!(device_id = %id, "Generated new device identifier");
                self.save(&id);
                id
            }
        };
        *current = Some(id.clone());
        Ok(id)
    }

    /// Known identifier, in memory or persisted, without generating one
    pub fn stored_id(&self) -> AgentResult<Option<String>> {
        if let Some(id) = self.current.lock().clone() {
            return Ok(Some(id));
        }
        self.store.load()
    }

    /// Discard the current identifier and persist a fresh one
    pub fn rotate(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let old = self.current.lock().replace(id.clone());
        self.save(&id);
        info!(old = ?old, new = %id, "Rotated device identifier");
        id
    }

    /// Credential for `device_id`
    pub fn derive_credential(&self, device_id: &str) -> Credential {
        derive_credential(&self.secret, device_id)
    }

    /// Current identifier together with its credential
    pub fn current(&self) -> AgentResult<(String, Credential)> {
        let id = self.device_id()?;
        let credential = self.derive_credential(&id);
        Ok((id, credential))
    }

    /// Fingerprint of the configured shared secret
    pub fn secret_fingerprint(&self) -> String {
        Credential::fingerprint_of(&self.secret)
    }

    fn save(&self, id: &str) {
        if let Err(e) = self.store.save(id) {
            error!("Failed to persist device identifier: {}", e);
        }
    }
}

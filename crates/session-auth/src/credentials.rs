//! Persisted credential pair
//!
//! The pair is stored as one JSON document under a single key, so replacing
//! it is a single `set` and a concurrent `load()` sees either the old pair or
//! the new one. Anything unreadable (corrupt JSON, a missing or empty field)
//! is treated as "no credentials" rather than an error.
//!
//! Every `save` and `clear` bumps a write generation. A writer that read the
//! pair earlier can use `save_if_unchanged` so it never resurrects a pair
//! that was cleared or replaced in the meantime.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::STORAGE_KEY;
use crate::error::{Error, Result};
use crate::storage::KeyValueStore;

/// Access and refresh credentials. Both are present or the pair does not exist.
///
/// The login response may carry extra fields; they are ignored on load and
/// not written back.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Short-lived bearer credential attached to every request
    pub access: String,
    /// Longer-lived credential exchanged for a new access credential
    pub refresh: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    /// Same refresh credential, new access credential.
    pub fn with_access(&self, access: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: self.refresh.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.access.is_empty() && !self.refresh.is_empty()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .finish()
    }
}

/// Reads and writes the credential pair. The only writer of persisted credentials.
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStore>,
    key: String,
    /// Held across each write so check-and-set is atomic within this process
    generation: Mutex<u64>,
}

impl CredentialStore {
    /// Store under the well-known `authTokens` key.
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(storage, STORAGE_KEY)
    }

    pub fn with_key(storage: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            generation: Mutex::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn generation_lock(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes made through this store since creation.
    pub fn generation(&self) -> u64 {
        *self.generation_lock()
    }

    /// Current pair together with the generation it was read at.
    pub fn load_versioned(&self) -> (Option<CredentialPair>, u64) {
        let generation = self.generation_lock();
        (self.load(), *generation)
    }

    /// Current pair, or `None` when absent or unreadable. Never fails.
    pub fn load(&self) -> Option<CredentialPair> {
        let raw = self.storage.get(&self.key)?;
        match serde_json::from_str::<CredentialPair>(&raw) {
            Ok(pair) if pair.is_complete() => Some(pair),
            Ok(_) => {
                warn!(key = %self.key, "stored credential pair is incomplete, ignoring");
                None
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "stored credentials unparseable, ignoring");
                None
            }
        }
    }

    /// Current access credential, if a pair is stored.
    pub fn access(&self) -> Option<String> {
        self.load().map(|pair| pair.access)
    }

    /// Replace the stored pair.
    pub fn save(&self, pair: &CredentialPair) -> Result<()> {
        let mut generation = self.generation_lock();
        self.write(pair)?;
        *generation += 1;
        Ok(())
    }

    /// Replace the stored pair only if no `save` or `clear` happened since
    /// `expected` was read. Returns `false` and leaves storage alone otherwise.
    pub fn save_if_unchanged(&self, pair: &CredentialPair, expected: u64) -> Result<bool> {
        let mut generation = self.generation_lock();
        if *generation != expected {
            debug!(key = %self.key, expected, current = *generation, "credential pair changed, not saving");
            return Ok(false);
        }
        self.write(pair)?;
        *generation += 1;
        Ok(true)
    }

    fn write(&self, pair: &CredentialPair) -> Result<()> {
        if !pair.is_complete() {
            return Err(Error::InvalidCredentials(
                "refusing to persist a partial credential pair".into(),
            ));
        }
        let json = serde_json::to_string(pair)
            .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;
        self.storage.set(&self.key, &json)?;
        debug!(key = %self.key, "saved credential pair");
        Ok(())
    }

    /// Remove the stored pair.
    pub fn clear(&self) -> Result<()> {
        let mut generation = self.generation_lock();
        self.storage.remove(&self.key)?;
        *generation += 1;
        debug!(key = %self.key, "cleared credential pair");
        Ok(())
    }
}

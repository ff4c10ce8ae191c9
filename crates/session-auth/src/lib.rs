//! Credential handling for the session client
//!
//! Provides key-value persistence, the credential pair store, claim decoding
//! and the two token endpoint exchanges (login and refresh). This crate has
//! no notion of concurrency or retries; the refresh coordination lives in
//! `session-gateway`.
//!
//! Credential flow:
//! 1. `token::obtain_pair()` exchanges username/password for a pair
//! 2. Pair stored via `credentials::CredentialStore::save()`
//! 3. Every outbound call reads the access credential via `CredentialStore::access()`
//! 4. On a recoverable 401, `token::refresh_access()` obtains a new access credential
//! 5. Merged pair saved via `CredentialStore::save()`, or cleared on failure

pub mod claims;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod storage;
pub mod token;

pub use claims::{Claims, DecodeError, decode, inspect_access, is_expired};
pub use constants::*;
pub use credentials::{CredentialPair, CredentialStore};
pub use error::{Error, Result};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use token::{RefreshResponse, obtain_pair, refresh_access};

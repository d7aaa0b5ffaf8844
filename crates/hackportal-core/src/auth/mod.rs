//! Authentication module for managing the user session and its credentials.
//!
//! This module provides:
//! - `SessionStore`: the anonymous/authenticating/authenticated state machine
//! - `CredentialPair`: access + refresh token, owned by the session
//! - `CredentialStorage`: durable storage for the pair (keychain, file, memory)

pub mod credentials;
pub mod session;
pub mod store;

pub use credentials::{CredentialPair, CredentialStorage, KeyringStorage, StorageError};
pub use session::{RefreshOutcome, SessionSnapshot, SessionState, SessionStore, PROFILE_PATH};
pub use store::{FileStorage, MemoryStorage};

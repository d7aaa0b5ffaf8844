//! Core library for the Hack the 6ix applicant portal.
//!
//! This crate owns the client-side session and request-execution layer:
//! - `auth`: the `SessionStore` state machine and persisted credential pair
//! - `api`: the `RequestExecutor` that attaches credentials, recovers from
//!   expired access tokens and supports cancellation
//! - `config`: API location, auth provider and storage backend selection
//! - `models`: wire types exchanged with the portal API

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{
    ApiClient, ApiError, ApiResult, Execution, ExecutorConfig, PortalActions, RequestBody,
    RequestExecutor, RequestOptions, RequestState, ServerResponse,
};
pub use auth::{
    CredentialPair, CredentialStorage, FileStorage, KeyringStorage, MemoryStorage, RefreshOutcome,
    SessionSnapshot, SessionState, SessionStore, StorageError,
};
pub use config::{PortalConfig, StorageBackend};
pub use models::{ApplicationEnums, UserProfile, UserStatus};
pub use reqwest::{Method, StatusCode};

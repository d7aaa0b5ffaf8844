//! Request execution against the portal API.
//!
//! `ApiClient` puts calls on the wire; `RequestExecutor` wraps one endpoint
//! with credential attachment, expiry recovery and cancellation; and
//! `PortalActions` builds executors for the portal's action endpoints.
//!
//! Every endpoint answers with a `{status, message}` envelope, surfaced as
//! `ApiResult<T>`.

pub mod actions;
pub mod client;
pub mod error;
pub mod executor;
pub mod request;
pub mod response;

pub use actions::PortalActions;
pub use client::{ApiClient, ACCESS_TOKEN_HEADER};
pub use error::ApiError;
pub use executor::{Execution, ExecutorConfig, RequestExecutor, RequestState};
pub use request::{FilePart, RequestBody, RequestOptions};
pub use response::{ApiResult, ServerResponse};

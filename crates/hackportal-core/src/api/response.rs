//! Response envelope and call outcomes.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiError;

/// The `{status, message}` envelope every portal endpoint answers with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct ServerResponse<T> {
    pub status: u16,
    pub message: T,
}

/// Settled outcome of one logical call.
///
/// Discriminates on the HTTP status rather than probing the body: only a 2xx
/// is parsed into `T`, anything else keeps the raw JSON it came with.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResult<T> {
    /// 2xx with a body that parsed as `ServerResponse<T>`
    Success {
        status: StatusCode,
        response: ServerResponse<T>,
    },
    /// Any non-2xx, passed through untouched
    Failure { status: StatusCode, body: Value },
    /// The request never produced a response; there is no status
    Unreachable { reason: String },
}

impl<T> ApiResult<T> {
    /// HTTP status, or `None` for transport failures
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiResult::Success { status, .. } | ApiResult::Failure { status, .. } => Some(*status),
            ApiResult::Unreachable { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiResult::Success { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Payload of a successful call
    pub fn message(&self) -> Option<&T> {
        match self {
            ApiResult::Success { response, .. } => Some(&response.message),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<T> {
        match self {
            ApiResult::Success { response, .. } => Some(response.message),
            _ => None,
        }
    }

    /// Human-readable reason for a failed call.
    ///
    /// Uses the server's `message` string when the failure body carries one.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ApiResult::Success { .. } => None,
            ApiResult::Failure { status, body } => Some(
                body.get("message")
                    .and_then(Value::as_str)
                    .or_else(|| body.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| status.to_string()),
            ),
            ApiResult::Unreachable { reason } => Some(reason.clone()),
        }
    }

    /// Collapse into a `Result` for callers that only care about success
    pub fn into_result(self) -> Result<T, ApiError> {
        let server_message = self.error_message();
        match self {
            ApiResult::Success { response, .. } => Ok(response.message),
            ApiResult::Failure { status, .. } => {
                Err(ApiError::from_status(status, &server_message.unwrap_or_default()))
            }
            ApiResult::Unreachable { reason } => Err(ApiError::InvalidResponse(format!(
                "no response from server: {}",
                reason
            ))),
        }
    }
}

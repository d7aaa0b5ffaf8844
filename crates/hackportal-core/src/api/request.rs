//! Per-call request options and how they merge.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;

use super::ApiError;

/// One file field of a multipart body.
///
/// Kept as owned bytes so the body can be rebuilt for a retry.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Multipart(Vec<FilePart>),
}

/// Method, body and headers for a call.
///
/// Executors hold a set of defaults; each call may pass overrides that are
/// merged on top, with the call site winning.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub body: Option<RequestBody>,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `POST` with a JSON body
    pub fn post_json<B: Serialize>(body: &B) -> Result<Self, ApiError> {
        Self::new().method(Method::POST).json(body)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    pub fn multipart(mut self, parts: Vec<FilePart>) -> Self {
        self.body = Some(RequestBody::Multipart(parts));
        self
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Result<Self, ApiError> {
        let value = HeaderValue::from_str(value).map_err(|_| ApiError::InvalidHeader(name))?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    /// Merge `overrides` over `self`; fields set in `overrides` win
    pub fn merged(&self, overrides: &RequestOptions) -> RequestOptions {
        let mut headers = self.headers.clone();
        for (name, value) in overrides.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        RequestOptions {
            method: overrides.method.clone().or_else(|| self.method.clone()),
            body: overrides.body.clone().or_else(|| self.body.clone()),
            headers,
        }
    }

    /// Method actually sent: explicit, else `GET`
    pub fn effective_method(&self) -> Method {
        self.method.clone().unwrap_or(Method::GET)
    }
}

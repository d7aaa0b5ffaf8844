//! HTTP transport for the portal API.
//!
//! `ApiClient` knows where the API lives and how a call is put on the wire:
//! URL, method, JSON or multipart body, and the access-token header. It does
//! not know about sessions; `RequestExecutor` decides which token to attach.

use reqwest::header::{self, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::PortalConfig;
use crate::utils::truncate_body;

use super::request::{FilePart, RequestBody, RequestOptions};
use super::response::{ApiResult, ServerResponse};
use super::ApiError;

/// Header carrying the access token on every authenticated call
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// API client for the portal.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    refresh_path: String,
    logout_path: String,
}

impl ApiClient {
    /// Create a new API client from configuration
    pub fn new(config: &PortalConfig) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, config))
    }

    /// Create a client around an existing reqwest client, sharing its pool
    pub fn with_client(client: Client, config: &PortalConfig) -> Self {
        Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            refresh_path: config.refresh_path(),
            logout_path: config.logout_path(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    pub fn logout_path(&self) -> &str {
        &self.logout_path
    }

    /// Build the request for `path`, attaching `token` when given
    pub(crate) fn build(
        &self,
        path: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<RequestBuilder, ApiError> {
        let mut headers = options.headers.clone();
        let is_multipart = matches!(options.body, Some(RequestBody::Multipart(_)));

        if is_multipart {
            // reqwest sets the multipart content type with its boundary
            headers.remove(header::CONTENT_TYPE);
        } else if !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        if let Some(token) = token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| ApiError::InvalidHeader(ACCESS_TOKEN_HEADER))?;
            headers.insert(HeaderName::from_static(ACCESS_TOKEN_HEADER), value);
        }

        let request = self
            .client
            .request(options.effective_method(), self.url(path))
            .headers(headers);

        let request = match &options.body {
            Some(RequestBody::Json(value)) => request.json(value),
            Some(RequestBody::Multipart(parts)) => request.multipart(Self::form(parts)?),
            None => request,
        };
        Ok(request)
    }

    fn form(parts: &[FilePart]) -> Result<Form, ApiError> {
        parts.iter().try_fold(Form::new(), |form, part| {
            let file = Part::bytes(part.bytes.clone())
                .file_name(part.file_name.clone())
                .mime_str(&part.mime)
                .map_err(|e| ApiError::InvalidRequest(format!("Bad MIME type {}: {}", part.mime, e)))?;
            Ok(form.part(part.field.clone(), file))
        })
    }

    /// Turn a response into a settled result.
    ///
    /// A 2xx body that does not parse is an error, not a result. Failing to
    /// read the body at all counts as a transport failure.
    pub(crate) async fn read_result<T: DeserializeOwned>(
        response: Response,
    ) -> Result<ApiResult<T>, ApiError> {
        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Ok(ApiResult::Unreachable {
                    reason: format!("Failed to read response body: {}", e),
                })
            }
        };

        if status.is_success() {
            let response: ServerResponse<T> = serde_json::from_str(&text).map_err(|e| {
                ApiError::InvalidResponse(format!("{} in body: {}", e, truncate_body(&text)))
            })?;
            return Ok(ApiResult::Success { status, response });
        }

        debug!(%status, "Request returned non-success status");
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(ApiResult::Failure { status, body })
    }
}

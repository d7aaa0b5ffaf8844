//! Executors for the portal's action endpoints.

use reqwest::Method;
use serde_json::Value;

use crate::auth::{SessionStore, PROFILE_PATH};
use crate::models::{ApplicationEnums, ApplicationSubmission, RsvpRequest, UserProfile};

use super::executor::{Execution, ExecutorConfig, RequestExecutor};
use super::request::{FilePart, RequestOptions};
use super::ApiError;

/// Prefix shared by all action endpoints
pub const ACTION_PREFIX: &str = "/api/action";

/// Multipart field the resume is uploaded under
const RESUME_FIELD: &str = "resume";

pub fn action_path(name: &str) -> String {
    format!("{}/{}", ACTION_PREFIX, name)
}

/// Factory for per-endpoint executors sharing one session
#[derive(Clone)]
pub struct PortalActions {
    session: SessionStore,
}

impl PortalActions {
    pub fn new(session: SessionStore) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    fn executor<T>(&self, name: &str, method: Method) -> RequestExecutor<T>
    where
        T: serde::de::DeserializeOwned + Clone + Send + Sync,
    {
        let config = ExecutorConfig::new(action_path(name))
            .defaults(RequestOptions::new().method(method));
        RequestExecutor::new(self.session.clone(), config)
    }

    pub fn profile(&self) -> RequestExecutor<UserProfile> {
        RequestExecutor::new(self.session.clone(), ExecutorConfig::new(PROFILE_PATH))
    }

    pub fn application_enums(&self) -> RequestExecutor<ApplicationEnums> {
        self.executor("applicationEnums", Method::GET)
    }

    pub fn update_application(&self) -> RequestExecutor<Value> {
        self.executor("updateapp", Method::POST)
    }

    pub fn rsvp(&self) -> RequestExecutor<Value> {
        self.executor("rsvp", Method::POST)
    }

    pub fn update_resume(&self) -> RequestExecutor<Value> {
        self.executor("updateResume", Method::PUT)
    }

    /// Confirm or cancel attendance
    pub async fn send_rsvp(&self, attending: bool) -> Result<Execution<Value>, ApiError> {
        let body = RequestOptions::new().json(&RsvpRequest { attending })?;
        self.rsvp().execute(body).await
    }

    /// Save the application as a draft, or submit it when `submit` is set
    pub async fn save_application(
        &self,
        application: Value,
        submit: bool,
    ) -> Result<Execution<Value>, ApiError> {
        let body = RequestOptions::new().json(&ApplicationSubmission {
            submit,
            application,
        })?;
        self.update_application().execute(body).await
    }

    pub async fn upload_resume(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Execution<Value>, ApiError> {
        let part = FilePart {
            field: RESUME_FIELD.to_string(),
            file_name: file_name.to_string(),
            mime: mime_for(file_name).to_string(),
            bytes,
        };
        self.update_resume()
            .execute(RequestOptions::new().multipart(vec![part]))
            .await
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

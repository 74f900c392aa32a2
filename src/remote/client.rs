//! HTTP client for the publishing service.
//!
//! [`RemoteApi`] is the seam the action executor dispatches through; the
//! scheduler only ever sees this trait, so tests drive the pipeline with an
//! in-memory mock while [`PublishClient`] carries the real reqwest plumbing.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, multipart};

use super::error::RemoteError;
use super::types::{NewRecord, RecordCreated, UploadSlot, UserInfo};

const API_URL: &str = "https://api.thingiverse.com";

/// One async call per pipeline action, plus the connectivity probe.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Lightweight authenticated probe used by the connection manager.
    async fn current_user(&self) -> Result<UserInfo, RemoteError>;

    async fn create_record(&self, record: &NewRecord) -> Result<RecordCreated, RemoteError>;

    async fn request_upload(&self, id: u64, filename: &str) -> Result<UploadSlot, RemoteError>;

    async fn upload_file(&self, slot: &UploadSlot, path: &Path) -> Result<(), RemoteError>;

    async fn finalize_upload(&self, url: &str) -> Result<(), RemoteError>;

    async fn publish_record(&self, id: u64) -> Result<(), RemoteError>;

    async fn add_to_collection(&self, id: u64, collection_id: &str) -> Result<(), RemoteError>;

    /// Drop the cached credential after an authorization rejection.
    fn invalidate_credentials(&self);
}

pub struct PublishClient {
    http: Client,
    base_url: String,
    token: RwLock<String>,
}

impl PublishClient {
    pub fn new(token: String, request_timeout: Duration) -> Self {
        Self::with_base_url(token, API_URL.to_string(), request_timeout)
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(token: String, base_url: String, request_timeout: Duration) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            // The storage endpoint answers a successful upload with a
            // redirect to the finalize URL; finalization is a separate
            // pipeline stage, so never follow it.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url,
            token: RwLock::new(token),
        }
    }

    fn bearer(&self) -> String {
        let token = self.token.read().expect("token lock poisoned");
        format!("Bearer {token}")
    }

    async fn post(&self, url: &str, body: Option<serde_json::Value>) -> Result<Response, RemoteError> {
        let mut req = self
            .http
            .post(url)
            .header("Authorization", self.bearer())
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await?;
        check_status(response).await
    }
}

/// Map HTTP status families onto the error taxonomy.
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::Unauthorized {
            status: status.as_u16(),
        });
    }
    if !status.is_success() && !status.is_redirection() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(RemoteError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

#[async_trait]
impl RemoteApi for PublishClient {
    async fn current_user(&self) -> Result<UserInfo, RemoteError> {
        let response = self
            .http
            .get(format!("{}/users/me", self.base_url))
            .header("Authorization", self.bearer())
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = check_status(response).await?;
        let user = response.json::<UserInfo>().await?;
        Ok(user)
    }

    async fn create_record(&self, record: &NewRecord) -> Result<RecordCreated, RemoteError> {
        let url = format!("{}/things", self.base_url);
        let body = serde_json::to_value(record)
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        let response = self.post(&url, Some(body)).await?;
        let created = response.json::<RecordCreated>().await?;
        Ok(created)
    }

    async fn request_upload(&self, id: u64, filename: &str) -> Result<UploadSlot, RemoteError> {
        let url = format!("{}/things/{id}/files", self.base_url);
        let body = serde_json::json!({ "filename": filename });
        let response = self.post(&url, Some(body)).await?;
        let slot = response.json::<UploadSlot>().await?;
        Ok(slot)
    }

    async fn upload_file(&self, slot: &UploadSlot, path: &Path) -> Result<(), RemoteError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RemoteError::File(format!("{}: {e}", path.display())))?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        // Signed fields first, the file part last: the storage endpoint
        // ignores fields that arrive after the file.
        let mut form = multipart::Form::new();
        for (key, value) in &slot.fields {
            form = form.text(key.clone(), value.clone());
        }
        form = form.part("file", multipart::Part::bytes(bytes).file_name(filename));

        let response = self.http.post(&slot.action).multipart(form).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn finalize_upload(&self, url: &str) -> Result<(), RemoteError> {
        self.post(url, None).await?;
        Ok(())
    }

    async fn publish_record(&self, id: u64) -> Result<(), RemoteError> {
        let url = format!("{}/things/{id}/publish", self.base_url);
        self.post(&url, None).await?;
        Ok(())
    }

    async fn add_to_collection(&self, id: u64, collection_id: &str) -> Result<(), RemoteError> {
        let url = format!("{}/collections/{collection_id}/thing/{id}", self.base_url);
        self.post(&url, None).await?;
        Ok(())
    }

    fn invalidate_credentials(&self) {
        let mut token = self.token.write().expect("token lock poisoned");
        token.clear();
    }
}

//! Storage client for Lost & Found item images
//!
//! Uploads go to `/storage/v1/object/{bucket}/{path}` as multipart form data;
//! public buckets are read back through `/storage/v1/object/public/...`.

use bytes::Bytes;
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("API error: {message} (Status: {status})")]
    ApiError { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),
}

impl StorageError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            StorageError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FileOptions {
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
    pub upsert: Option<bool>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_control(mut self, cache_control: &str) -> Self {
        self.cache_control = Some(cache_control.to_string());
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }
}

/// Body returned by a successful upload
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    /// `{bucket}/{path}` of the stored object.
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Id", default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageClient {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    http_client: Client,
}

impl StorageClient {
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            http_client,
        }
    }

    /// Uses the signed-in user's token so bucket policies see that user.
    pub fn with_auth(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn from(&self, bucket_id: &str) -> StorageBucketClient<'_> {
        StorageBucketClient {
            parent: self,
            bucket_id: bucket_id.to_string(),
        }
    }

    fn bearer(&self) -> String {
        format!(
            "Bearer {}",
            self.access_token.as_deref().unwrap_or(&self.api_key)
        )
    }
}

pub struct StorageBucketClient<'a> {
    parent: &'a StorageClient,
    bucket_id: String,
}

impl<'a> StorageBucketClient<'a> {
    /// Uploads `contents` under `path`.
    pub async fn upload(
        &self,
        path: &str,
        contents: Bytes,
        options: Option<FileOptions>,
    ) -> Result<UploadResponse> {
        let path = checked_path(path)?;
        let url = Url::parse(&format!(
            "{}/storage/v1/object/{}/{}",
            self.parent.base_url, self.bucket_id, path
        ))?;
        let options = options.unwrap_or_default();

        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let mut part = Part::bytes(contents.to_vec()).file_name(file_name);
        if let Some(content_type) = &options.content_type {
            part = part.mime_str(content_type)?;
        }
        let mut form = Form::new().part("", part);
        if let Some(cache_control) = &options.cache_control {
            form = form.text("cacheControl", cache_control.clone());
        }

        debug!(
            "uploading {} bytes to {}/{}",
            contents.len(),
            self.bucket_id,
            path
        );

        let response = self
            .parent
            .http_client
            .post(url)
            .header("apikey", &self.parent.api_key)
            .header("Authorization", self.parent.bearer())
            .header("x-upsert", options.upsert.unwrap_or(false).to_string())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("upload to {} failed with {}: {}", self.bucket_id, status, body);
            return Err(api_error(status, &body));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Deletes the objects at `paths`.
    pub async fn remove(&self, paths: &[&str]) -> Result<()> {
        let url = format!(
            "{}/storage/v1/object/{}",
            self.parent.base_url, self.bucket_id
        );

        let response = self
            .parent
            .http_client
            .delete(&url)
            .header("apikey", &self.parent.api_key)
            .header("Authorization", self.parent.bearer())
            .json(&serde_json::json!({ "prefixes": paths }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await?;
            Err(api_error(status, &body))
        }
    }

    pub fn get_public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.parent.base_url,
            self.bucket_id,
            path.trim_start_matches('/')
        )
    }
}

fn checked_path(path: &str) -> Result<&str> {
    let path = path.trim_start_matches('/');
    if path.is_empty() || path.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(path)
}

fn api_error(status: StatusCode, body: &str) -> StorageError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());
    StorageError::ApiError { status, message }
}

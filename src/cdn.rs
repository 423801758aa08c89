//! ImageKit upload client.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::model::RemoteRef;

const IMAGEKIT_UPLOAD_BASE: &str = "https://upload.imagekit.io/";
const IMAGEKIT_API_BASE: &str = "https://api.imagekit.io/";

/// Everything the CDN needs to store one photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file_name: String,
    pub folder: String,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub tags: Vec<String>,
    pub custom_metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait CdnUploader: Send + Sync {
    /// Store `request` under its fixed name, replacing any existing object.
    async fn upload(&self, request: &UploadRequest) -> Result<RemoteRef>;

    /// Cheap authenticated call used to check credentials before a run.
    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct ImageKitClient {
    http: Client,
    upload_base: Url,
    api_base: Url,
    private_key: String,
}

impl fmt::Debug for ImageKitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageKitClient")
            .field("upload_base", &self.upload_base)
            .finish_non_exhaustive()
    }
}

impl ImageKitClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let upload_base = Url::parse(IMAGEKIT_UPLOAD_BASE).context("invalid ImageKit upload URL")?;
        let api_base = Url::parse(IMAGEKIT_API_BASE).context("invalid ImageKit API URL")?;
        Self::with_base_urls(cfg.cdn.private_key.clone(), upload_base, api_base)
    }

    pub fn with_base_urls(private_key: String, upload_base: Url, api_base: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("media-sync/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build ImageKit HTTP client")?;
        Ok(Self {
            http,
            upload_base,
            api_base,
            private_key,
        })
    }

    fn upload_endpoint(&self) -> Result<Url> {
        self.upload_base
            .join("api/v1/files/upload")
            .context("invalid ImageKit upload URL")
    }

    /// Multipart form in the shape the ImageKit upload API expects.
    pub fn build_form(request: &UploadRequest) -> Result<multipart::Form> {
        let part = multipart::Part::bytes(request.bytes.clone())
            .file_name(request.file_name.clone())
            .mime_str(request.content_type)?;
        Ok(multipart::Form::new()
            .part("file", part)
            .text("fileName", request.file_name.clone())
            .text("folder", request.folder.clone())
            .text("tags", request.tags.join(","))
            .text("customMetadata", serde_json::to_string(&request.custom_metadata)?)
            .text("useUniqueFileName", "false")
            .text("overwriteFile", "true"))
    }
}

#[async_trait]
impl CdnUploader for ImageKitClient {
    #[instrument(skip_all, fields(file = %request.file_name))]
    async fn upload(&self, request: &UploadRequest) -> Result<RemoteRef> {
        let form = Self::build_form(request)?;
        let res = self
            .http
            .post(self.upload_endpoint()?)
            .basic_auth(&self.private_key, Some(""))
            .multipart(form)
            .send()
            .await
            .context("failed to reach ImageKit")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from ImageKit: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("imagekit error {}: {}", status, body));
        }

        let payload: UploadResponse = res.json().await.context("invalid ImageKit response")?;
        debug!(file_id = %payload.file_id, url = %payload.url, "uploaded to ImageKit");
        Ok(RemoteRef {
            remote_id: payload.file_id,
            url: payload.url,
        })
    }

    async fn ping(&self) -> Result<()> {
        let url = self.api_base.join("v1/files").context("invalid ImageKit API URL")?;
        let res = self
            .http
            .get(url)
            .basic_auth(&self.private_key, Some(""))
            .query(&[("limit", "1")])
            .send()
            .await
            .context("failed to reach ImageKit")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("imagekit ping failed {}: {}", status, body));
        }
        Ok(())
    }
}

/// MIME type for a photo extension; ImageKit sniffs content anyway.
pub fn content_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_id: String,
    url: String,
}

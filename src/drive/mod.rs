//! Read-only client for the Google Drive folder that holds product descriptors.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::drive::model::{DriveFile, FileListResp};
use crate::model::ProductDescriptor;

pub mod model;

const DRIVE_API_BASE: &str = "https://www.googleapis.com/";

/// A descriptor file as listed by the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub id: String,
    pub name: String,
    pub modified_time: Option<DateTime<Utc>>,
}

impl SourceEntry {
    /// De-duplication key: the store id, pinned to the revision when the store reports one.
    pub fn revision_key(&self) -> String {
        match self.modified_time {
            Some(ts) => format!("{}@{}", self.id, ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => self.id.clone(),
        }
    }

    /// Product id guessed from a `P-1001_2025_...json` style file name.
    pub fn fallback_product_id(&self) -> String {
        self.name
            .split('_')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .trim_end_matches(".json")
            .to_string()
    }
}

impl From<DriveFile> for SourceEntry {
    fn from(f: DriveFile) -> Self {
        Self {
            id: f.id,
            name: f.name,
            modified_time: f.modified_time.or(f.created_time),
        }
    }
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Recently modified descriptors, newest first, capped to `page_size`.
    async fn list_recent(&self, page_size: u32) -> Result<Vec<SourceEntry>>;

    async fn fetch_descriptor(&self, entry: &SourceEntry) -> Result<ProductDescriptor>;
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
    folder_id: String,
    name_filter: String,
    freshness_window: chrono::Duration,
}

impl fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveClient")
            .field("base_url", &self.base_url)
            .field("folder_id", &self.folder_id)
            .finish_non_exhaustive()
    }
}

impl DriveClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(DRIVE_API_BASE).context("invalid Drive base URL")?;
        Self::with_base_url(cfg, base_url)
    }

    pub fn with_base_url(cfg: &Config, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("media-sync/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Drive HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token: cfg.drive.access_token.clone(),
            folder_id: cfg.drive.folder_id.clone(),
            name_filter: cfg.drive.name_filter.clone(),
            freshness_window: cfg.freshness_window(),
        })
    }

    pub fn build_list_request(&self, page_size: u32, since: DateTime<Utc>) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("drive/v3/files")
            .context("invalid Drive base URL")?;
        let q = build_query(&self.folder_id, &self.name_filter, since);
        let page_size = page_size.to_string();
        self.http
            .get(endpoint)
            .bearer_auth(&self.token)
            .query(&[
                ("q", q.as_str()),
                ("spaces", "drive"),
                ("orderBy", "modifiedTime desc"),
                ("pageSize", page_size.as_str()),
                ("fields", "files(id,name,createdTime,modifiedTime)"),
            ])
            .build()
            .context("failed to build Drive list request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Google Drive")?;
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from Google Drive: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "Google Drive API error");
            return Err(anyhow!("drive error {}: {}", status, body));
        }
        Ok(res)
    }
}

/// Drive search expression for descriptor files in `folder_id` modified after `since`.
pub fn build_query(folder_id: &str, name_filter: &str, since: DateTime<Utc>) -> String {
    let mut q = format!(
        "'{}' in parents and mimeType='application/json' and trashed=false and modifiedTime > '{}'",
        escape(folder_id),
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    if !name_filter.trim().is_empty() {
        q.push_str(&format!(" and name contains '{}'", escape(name_filter.trim())));
    }
    q
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl DocumentSource for DriveClient {
    #[instrument(skip(self))]
    async fn list_recent(&self, page_size: u32) -> Result<Vec<SourceEntry>> {
        let since = Utc::now() - self.freshness_window;
        let request = self.build_list_request(page_size, since)?;
        let res = self.execute(request).await?;
        let payload: FileListResp = res.json().await.context("invalid Drive list response")?;
        debug!(count = payload.files.len(), more = payload.next_page_token.is_some(), "listed descriptors");
        Ok(payload
            .files
            .into_iter()
            .take(page_size as usize)
            .map(SourceEntry::from)
            .collect())
    }

    #[instrument(skip(self), fields(file_id = %entry.id))]
    async fn fetch_descriptor(&self, entry: &SourceEntry) -> Result<ProductDescriptor> {
        let url = self
            .base_url
            .join(&format!("drive/v3/files/{}", entry.id))
            .context("invalid Drive file URL")?;
        let request = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .build()
            .context("failed to build Drive download request")?;
        let body = self.execute(request).await?.bytes().await?;
        parse_descriptor(entry, &body)
    }
}

/// Decode a descriptor file, filling in the id from the file name when the body has none.
pub fn parse_descriptor(entry: &SourceEntry, body: &[u8]) -> Result<ProductDescriptor> {
    let mut descriptor: ProductDescriptor = serde_json::from_slice(body)
        .with_context(|| format!("Failed to parse JSON in {}", entry.name))?;
    if descriptor.id.trim().is_empty() {
        descriptor.id = entry.fallback_product_id();
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_cfg() -> Config {
        serde_yaml::from_str(crate::config::example()).unwrap()
    }

    fn entry(name: &str) -> SourceEntry {
        SourceEntry {
            id: "file-1".into(),
            name: name.into(),
            modified_time: None,
        }
    }

    #[test]
    fn query_filters_folder_freshness_and_name() {
        let since = Utc.with_ymd_and_hms(2025, 11, 20, 8, 0, 0).unwrap();
        let q = build_query("folder'1", "2025_", since);
        assert_eq!(
            q,
            "'folder\\'1' in parents and mimeType='application/json' and trashed=false \
             and modifiedTime > '2025-11-20T08:00:00Z' and name contains '2025_'"
        );
        assert!(!build_query("f", " ", since).contains("name contains"));
    }

    #[test]
    fn list_request_sets_auth_and_paging() {
        let client = DriveClient::from_config(&sample_cfg()).unwrap();
        let since = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let request = client.build_list_request(50, since).unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/drive/v3/files");
        let pairs: std::collections::HashMap<_, _> = request.url().query_pairs().into_owned().collect();
        assert_eq!(pairs.get("pageSize").map(String::as_str), Some("50"));
        assert_eq!(pairs.get("orderBy").map(String::as_str), Some("modifiedTime desc"));
        assert!(pairs["q"].contains("GOOGLE_DRIVE_PRODUCTS_FOLDER_ID"));
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer YOUR_DRIVE_ACCESS_TOKEN"
        );
    }

    #[test]
    fn revision_key_tracks_modification() {
        let mut e = entry("P-1_2025_a.json");
        assert_eq!(e.revision_key(), "file-1");
        e.modified_time = Some(Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap());
        assert_eq!(e.revision_key(), "file-1@2025-03-04T05:06:07.000Z");
    }

    #[test]
    fn parse_descriptor_falls_back_to_file_name() {
        let d = parse_descriptor(&entry("P-1009_2025_lamp.json"), br#"{"name":"Lamp"}"#).unwrap();
        assert_eq!(d.id, "P-1009");
        assert_eq!(entry("lamp.json").fallback_product_id(), "lamp");

        let err = parse_descriptor(&entry("bad.json"), b"{not json").unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}

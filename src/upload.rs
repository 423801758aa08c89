//! Single-photo upload: resolve the source bytes, push them to the CDN under a
//! deterministic name, retry transport failures with linear backoff.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cdn::{content_type, CdnUploader, UploadRequest};
use crate::model::{is_contained, PhotoRef, PhotoSource, PhotoStatus, RemoteRef, SyncOutcome};

const KNOWN_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Source resolution failures. These are never retried.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Path escapes media root: {0}")]
    OutsideRoot(String),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },
}

pub struct MediaUploadService {
    cdn: Arc<dyn CdnUploader>,
    http: reqwest::Client,
    media_root: PathBuf,
    folder_root: String,
    retry: RetryPolicy,
}

impl MediaUploadService {
    pub fn new(
        cdn: Arc<dyn CdnUploader>,
        media_root: PathBuf,
        folder_root: String,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("media-sync/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build photo download client")?;
        Ok(Self {
            cdn,
            http,
            media_root,
            folder_root,
            retry,
        })
    }

    /// Produce exactly one outcome for `photo`, whatever happens.
    pub async fn sync_photo(
        &self,
        product_id: &str,
        photo: &PhotoRef,
        ordinal: usize,
        index: usize,
    ) -> SyncOutcome {
        let sequence = photo.sequence.unwrap_or(index as i64);
        let mut outcome = SyncOutcome {
            source: photo.url.clone(),
            remote: None,
            ordinal,
            index,
            sequence,
            status: PhotoStatus::Failed,
            error: None,
            attempts: 0,
        };

        let bytes = match self.resolve(photo).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(product_id, url = %photo.url, %err, "photo source unresolvable");
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };

        let extension = photo
            .extension()
            .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()));
        let request = UploadRequest {
            file_name: remote_file_name(product_id, ordinal, extension.as_deref()),
            folder: remote_folder(&self.folder_root, product_id),
            bytes,
            content_type: content_type(extension.as_deref().or(Some("jpg"))),
            tags: vec![product_id.to_string(), "product".to_string()],
            custom_metadata: BTreeMap::from([
                ("product_id".to_string(), product_id.to_string()),
                ("sequence_order".to_string(), sequence.to_string()),
                ("ordinal".to_string(), ordinal.to_string()),
                ("alt_text".to_string(), photo.alt.clone().unwrap_or_default()),
            ]),
        };

        let (result, attempts) = self.upload_with_retry(&request).await;
        outcome.attempts = attempts;
        match result {
            Ok(remote) => {
                debug!(product_id, ordinal, url = %remote.url, "photo uploaded");
                outcome.status = PhotoStatus::Success;
                outcome.remote = Some(remote);
            }
            Err(err) => {
                warn!(product_id, ordinal, attempts, %err, "photo upload failed");
                outcome.error = Some(err);
            }
        }
        outcome
    }

    async fn upload_with_retry(&self, request: &UploadRequest) -> (Result<RemoteRef, String>, u32) {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.cdn.upload(request).await {
                Ok(remote) => return (Ok(remote), attempt),
                Err(err) if attempt >= max_attempts => return (Err(format!("{:#}", err)), attempt),
                Err(err) => {
                    let delay = self.retry.delay_for(attempt);
                    info!(
                        file = %request.file_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upload failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn resolve(&self, photo: &PhotoRef) -> Result<Vec<u8>, ResolveError> {
        match photo.source() {
            PhotoSource::Remote(url) => {
                let res = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| ResolveError::Download {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                if !res.status().is_success() {
                    return Err(ResolveError::Download {
                        url,
                        reason: res.status().to_string(),
                    });
                }
                let bytes = res.bytes().await.map_err(|e| ResolveError::Download {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
                Ok(bytes.to_vec())
            }
            PhotoSource::Local(relative) => {
                if !is_contained(&relative) {
                    return Err(ResolveError::OutsideRoot(photo.url.clone()));
                }
                let path = self.media_root.join(&relative);
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(ResolveError::NotFound(path.display().to_string()))
                    }
                    Err(source) => Err(ResolveError::Read {
                        path: path.display().to_string(),
                        source,
                    }),
                }
            }
        }
    }
}

/// Remote name depends only on the product id and ordinal, so re-syncs overwrite.
pub fn remote_file_name(product_id: &str, ordinal: usize, extension: Option<&str>) -> String {
    format!(
        "{}_{:02}.{}",
        sanitize(product_id),
        ordinal,
        extension.unwrap_or("jpg")
    )
}

pub fn remote_folder(folder_root: &str, product_id: &str) -> String {
    format!("{}/{}", folder_root.trim_end_matches('/'), sanitize(product_id))
}

fn sanitize(id: &str) -> String {
    id.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_names_are_deterministic() {
        assert_eq!(remote_file_name("P-1001", 1, None), "P-1001_01.jpg");
        assert_eq!(remote_file_name("P-1001", 12, Some("png")), "P-1001_12.png");
        assert_eq!(remote_file_name("a b/c", 3, None), "a_b_c_03.jpg");
        assert_eq!(remote_folder("/kollect-it/products/", "P-1001"), "/kollect-it/products/P-1001");
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(3000));
    }
}

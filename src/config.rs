//! Configuration loader and validator for the Drive→ImageKit media sync.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::upload::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub drive: Drive,
    pub cdn: Cdn,
    /// On-demand trigger surface; the HTTP server is not started when absent.
    #[serde(default)]
    pub trigger: Option<Trigger>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Local photo paths in descriptors are resolved relative to this directory.
    pub media_root: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    /// `sqlite` (default) or `jsonl`.
    #[serde(default)]
    pub log_store: LogStoreKind,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStoreKind {
    #[default]
    Sqlite,
    Jsonl,
}

/// Google Drive folder holding the product descriptors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Drive {
    pub access_token: String,
    pub folder_id: String,
    /// Only files whose name contains this fragment are considered. Empty means all.
    #[serde(default)]
    pub name_filter: String,
}

/// ImageKit credentials and upload behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cdn {
    pub private_key: String,
    pub folder_root: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// HTTP trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    pub listen: String,
    #[serde(default = "default_trigger_page_size")]
    pub page_size: u32,
    /// Shared secret accepted in `x-api-key` or `Authorization: Bearer`.
    #[serde(default)]
    pub api_key: String,
    /// HMAC secret for signed admin session cookies.
    #[serde(default)]
    pub session_secret: String,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

fn default_freshness_window_secs() -> u64 {
    24 * 3600
}

fn default_upload_concurrency() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_trigger_page_size() -> u32 {
    10
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.resolved_data_dir())
    }

    /// Data directory with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        expand_home(&self.app.data_dir)
    }

    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.app.media_root))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.app.poll_interval_secs)
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.app.freshness_window_secs as i64)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.cdn.max_retries,
            base_delay: Duration::from_millis(self.cdn.retry_base_delay_ms),
        }
    }

    /// Overlay secrets from the environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("DRIVE_ACCESS_TOKEN") {
            self.drive.access_token = v;
        }
        if let Some(v) = non_empty("GOOGLE_DRIVE_FOLDER_ID") {
            self.drive.folder_id = v;
        }
        if let Some(v) = non_empty("IMAGEKIT_PRIVATE_KEY") {
            // ImageKit dashboards hand out keys with a `private_` prefix that the API rejects.
            self.cdn.private_key = v.trim_start_matches("private_").to_string();
        }
        if let Some(trigger) = self.trigger.as_mut() {
            if let Some(v) = non_empty("PRODUCT_INGEST_API_KEY") {
                trigger.api_key = v;
            }
            if let Some(v) = non_empty("ADMIN_SESSION_SECRET") {
                trigger.session_secret = v;
            }
        }
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home.trim_end_matches('/'), rest);
        }
    }
    path.to_string()
}

/// Load configuration from a YAML file, overlay environment secrets and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_overrides(|key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.media_root.trim().is_empty() {
        return Err(ConfigError::Invalid("app.media_root must be non-empty"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.page_size == 0 || cfg.app.page_size > 1000 {
        return Err(ConfigError::Invalid("app.page_size must be within 1..=1000"));
    }
    if cfg.app.freshness_window_secs == 0 {
        return Err(ConfigError::Invalid("app.freshness_window_secs must be > 0"));
    }
    if cfg.app.upload_concurrency == 0 || cfg.app.upload_concurrency > 8 {
        return Err(ConfigError::Invalid("app.upload_concurrency must be within 1..=8"));
    }

    if cfg.drive.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("drive.access_token must be non-empty"));
    }
    if cfg.drive.folder_id.trim().is_empty() {
        return Err(ConfigError::Invalid("drive.folder_id must be non-empty"));
    }

    if cfg.cdn.private_key.trim().is_empty() {
        return Err(ConfigError::Invalid("cdn.private_key must be non-empty"));
    }
    if !cfg.cdn.folder_root.starts_with('/') {
        return Err(ConfigError::Invalid("cdn.folder_root must start with '/'"));
    }

    if let Some(trigger) = &cfg.trigger {
        if trigger.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("trigger.listen must be non-empty"));
        }
        if trigger.page_size == 0 {
            return Err(ConfigError::Invalid("trigger.page_size must be > 0"));
        }
        if trigger.api_key.trim().is_empty() && trigger.session_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "trigger requires api_key or session_secret",
            ));
        }
    }

    Ok(())
}

/// Example configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  media_root: "./public"
  poll_interval_secs: 30
  page_size: 50
  freshness_window_secs: 86400
  upload_concurrency: 3
  log_store: sqlite

drive:
  access_token: "YOUR_DRIVE_ACCESS_TOKEN"
  folder_id: "GOOGLE_DRIVE_PRODUCTS_FOLDER_ID"
  name_filter: "2025_"

cdn:
  private_key: "YOUR_IMAGEKIT_PRIVATE_KEY"
  folder_root: "/kollect-it/products"
  max_retries: 2
  retry_base_delay_ms: 1000

trigger:
  listen: "127.0.0.1:3000"
  page_size: 10
  api_key: "YOUR_PRODUCT_INGEST_API_KEY"
  session_secret: ""
"#
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Product categories accepted by the storefront.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FineArt,
    Collectibles,
    BooksAndManuscripts,
    Militaria,
}

impl Category {
    pub fn parse_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "fine_art" | "fine-art" => Some(Category::FineArt),
            "collectibles" => Some(Category::Collectibles),
            "books_and_manuscripts" | "rare-books" => Some(Category::BooksAndManuscripts),
            "militaria" | "militaria_and_historical" => Some(Category::Militaria),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Poor,
    Fair,
    Good,
    VeryGood,
    Excellent,
}

impl Condition {
    pub fn parse_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "poor" => Some(Condition::Poor),
            "fair" => Some(Condition::Fair),
            "good" => Some(Condition::Good),
            "very_good" => Some(Condition::VeryGood),
            "excellent" => Some(Condition::Excellent),
            _ => None,
        }
    }
}

/// A free-form metadata value. Upstream automation writes booleans, numbers
/// and strings; anything nested is kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl FieldValue {
    pub fn is_set(&self) -> bool {
        match self {
            FieldValue::Flag(b) => *b,
            FieldValue::Text(s) => s.trim().eq_ignore_ascii_case("true"),
            FieldValue::Number(_) | FieldValue::Other(_) => false,
        }
    }
}

/// One image belonging to a descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoRef {
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default, alias = "sequence_order", alias = "sequencePosition")]
    pub sequence: Option<i64>,
    #[serde(default, alias = "user_description")]
    pub note: Option<String>,
}

/// Where a photo's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoSource {
    Remote(String),
    Local(PathBuf),
}

impl PhotoRef {
    pub fn source(&self) -> PhotoSource {
        let url = self.url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            PhotoSource::Remote(url.to_string())
        } else {
            PhotoSource::Local(PathBuf::from(url.trim_start_matches('/')))
        }
    }

    /// Lowercased file extension of the source, if any.
    pub fn extension(&self) -> Option<String> {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|s| s.to_ascii_lowercase())
    }
}

/// True when `path` stays inside the directory it is joined onto.
pub fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// A candidate product awaiting media sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProductDescriptor {
    #[serde(default, alias = "product_id", deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub condition: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub photos: Vec<PhotoRef>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: BTreeMap<String, FieldValue>,
    #[serde(default, alias = "syncEligible", skip_serializing_if = "Option::is_none")]
    pub sync_eligible: Option<bool>,
    #[serde(default, alias = "validationPassed", skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ProductDescriptor {
    /// Ready for CDN upload: explicit flag first, then the upstream `imagekit_ready` marker.
    pub fn is_sync_eligible(&self) -> bool {
        self.sync_eligible.unwrap_or_else(|| {
            ["sync_eligible", "imagekit_ready"]
                .iter()
                .any(|key| self.metadata.get(*key).is_some_and(FieldValue::is_set))
        })
    }

    /// Upstream preparation verdict. Absent means nobody objected.
    pub fn upstream_validation_passed(&self) -> bool {
        self.validation_passed.unwrap_or_else(|| {
            self.metadata
                .get("validation_passed")
                .map(FieldValue::is_set)
                .unwrap_or(true)
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Success,
    Failed,
}

/// Remote object produced by a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteRef {
    pub remote_id: String,
    pub url: String,
}

/// Result of one photo's upload attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncOutcome {
    pub source: String,
    pub remote: Option<RemoteRef>,
    /// 1-based upload order within the descriptor.
    pub ordinal: usize,
    /// Position in the descriptor's photo array.
    pub index: usize,
    pub sequence: i64,
    pub status: PhotoStatus,
    pub error: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoError {
    pub photo: String,
    pub error: String,
}

/// Aggregate of all photo outcomes for one descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncResult {
    pub product_id: String,
    pub total: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub outcomes: Vec<SyncOutcome>,
    pub errors: Vec<PhotoError>,
}

impl SyncResult {
    pub fn from_outcomes(product_id: &str, outcomes: Vec<SyncOutcome>) -> Self {
        let uploaded = outcomes
            .iter()
            .filter(|o| o.status == PhotoStatus::Success)
            .count();
        let errors = outcomes
            .iter()
            .filter(|o| o.status == PhotoStatus::Failed)
            .map(|o| PhotoError {
                photo: o.source.clone(),
                error: o.error.clone().unwrap_or_default(),
            })
            .collect::<Vec<_>>();
        Self {
            product_id: product_id.to_string(),
            total: outcomes.len(),
            uploaded,
            failed: errors.len(),
            outcomes,
            errors,
        }
    }

    pub fn status(&self) -> SyncStatus {
        if self.failed == 0 {
            SyncStatus::Success
        } else if self.uploaded > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        }
    }

    pub fn remote_refs(&self) -> Vec<Option<&RemoteRef>> {
        self.outcomes.iter().map(|o| o.remote.as_ref()).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Partial,
    Skipped,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Partial => "partial",
            LogStatus::Skipped => "skipped",
            LogStatus::Error => "error",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LogStatus::Success),
            "partial" => Some(LogStatus::Partial),
            "skipped" => Some(LogStatus::Skipped),
            "error" => Some(LogStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Watch,
    Trigger,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Watch => "watch",
            LogSource::Trigger => "trigger",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub descriptor_id: String,
    pub status: LogStatus,
    pub message: String,
    pub sync_triggered: bool,
    pub source: LogSource,
}

//! Offline validation of a local batch of descriptors, summarised in a manifest.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument};

use crate::model::ProductDescriptor;
use crate::validate::validate_descriptor;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("batch file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("batch must be an array of descriptors")]
    NotAnArray,
    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub category: String,
    pub photos: usize,
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchManifest {
    pub batch_id: String,
    pub timestamp: DateTime<Utc>,
    pub total_products: usize,
    pub valid_products: usize,
    pub invalid_products: usize,
    pub total_photos: usize,
    pub products: Vec<ManifestEntry>,
}

/// Read the batch file into raw items. YAML for `.yaml`/`.yml`, JSON otherwise.
pub fn load_batch(path: &Path) -> Result<Vec<Value>, PreflightError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PreflightError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(PreflightError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let parsed: Value = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| PreflightError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| PreflightError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };

    match parsed {
        Value::Array(items) => Ok(items),
        _ => Err(PreflightError::NotAnArray),
    }
}

pub fn build_manifest(items: Vec<Value>, now: DateTime<Utc>) -> BatchManifest {
    let products: Vec<ManifestEntry> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| entry_for(index, item))
        .collect();
    let valid_products = products.iter().filter(|p| p.valid).count();
    BatchManifest {
        batch_id: new_batch_id(now),
        timestamp: now,
        total_products: products.len(),
        valid_products,
        invalid_products: products.len() - valid_products,
        total_photos: products.iter().map(|p| p.photos).sum(),
        products,
    }
}

fn entry_for(index: usize, item: Value) -> ManifestEntry {
    let name_hint = item
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    match serde_json::from_value::<ProductDescriptor>(item) {
        Ok(descriptor) => {
            let errors = validate_descriptor(&descriptor);
            ManifestEntry {
                index,
                id: descriptor.id,
                name: descriptor.name,
                category: descriptor.category,
                photos: descriptor.photos.len(),
                valid: errors.is_empty(),
                errors,
            }
        }
        Err(err) => ManifestEntry {
            index,
            id: String::new(),
            name: name_hint,
            category: String::new(),
            photos: 0,
            valid: false,
            errors: vec![format!("Malformed descriptor: {}", err)],
        },
    }
}

/// `batch_<millis>_<7 hex chars>`
fn new_batch_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", now.timestamp_millis(), &suffix[..7])
}

/// Write `<dir>/<batch_id>-manifest.json`. Refuses to replace an existing manifest.
pub fn write_manifest(dir: &Path, manifest: &BatchManifest) -> Result<PathBuf, PreflightError> {
    let path = dir.join(format!("{}-manifest.json", manifest.batch_id));
    let body = serde_json::to_vec_pretty(manifest)?;
    let write = |path: &Path| -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&body)?;
        file.sync_all()
    };
    write(&path).map_err(|source| PreflightError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Load, validate and persist. Invalid items never make this fail.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn run(input: &Path, output_dir: &Path) -> Result<(BatchManifest, PathBuf), PreflightError> {
    let items = load_batch(input)?;
    let manifest = build_manifest(items, Utc::now());
    let path = write_manifest(output_dir, &manifest)?;
    info!(
        batch_id = %manifest.batch_id,
        total = manifest.total_products,
        valid = manifest.valid_products,
        invalid = manifest.invalid_products,
        photos = manifest.total_photos,
        manifest = %path.display(),
        "preflight complete"
    );
    Ok((manifest, path))
}

//! Fetch → validate → eligibility → sync for one listed descriptor.
//!
//! Shared by the watch loop and the on-demand trigger so both produce the same
//! verdicts and log records for the same input.
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::cdn::CdnUploader;
use crate::config::Config;
use crate::drive::{DocumentSource, DriveClient, SourceEntry};
use crate::model::{LogRecord, LogSource, LogStatus, SyncResult, SyncStatus};
use crate::sync::SyncOrchestrator;
use crate::upload::MediaUploadService;
use crate::validate::validate_descriptor;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Synced,
    Partial,
    SyncFailed,
    ValidationFailed,
    UpstreamRejected,
    NotEligible,
    FetchError,
}

/// Verdict for one listed descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorReport {
    #[serde(skip)]
    pub entry: SourceEntry,
    pub descriptor_id: String,
    pub name: String,
    pub disposition: Disposition,
    pub message: String,
    pub violations: Vec<String>,
    /// Photo count of the fetched descriptor, 0 when the fetch failed.
    pub photo_count: usize,
    pub sync: Option<SyncResult>,
}

impl DescriptorReport {
    pub fn log_status(&self) -> LogStatus {
        match self.disposition {
            Disposition::Synced => LogStatus::Success,
            Disposition::Partial => LogStatus::Partial,
            Disposition::SyncFailed | Disposition::FetchError => LogStatus::Error,
            Disposition::ValidationFailed
            | Disposition::UpstreamRejected
            | Disposition::NotEligible => LogStatus::Skipped,
        }
    }

    pub fn sync_triggered(&self) -> bool {
        self.sync.is_some()
    }

    /// Passed the validator, regardless of what happened afterwards.
    pub fn is_valid(&self) -> bool {
        !matches!(
            self.disposition,
            Disposition::ValidationFailed | Disposition::FetchError
        )
    }

    pub fn to_record(&self, source: LogSource) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            descriptor_id: self.descriptor_id.clone(),
            status: self.log_status(),
            message: self.message.clone(),
            sync_triggered: self.sync_triggered(),
            source,
        }
    }
}

pub struct Pipeline {
    source: Arc<dyn DocumentSource>,
    orchestrator: SyncOrchestrator,
}

impl Pipeline {
    pub fn new(source: Arc<dyn DocumentSource>, orchestrator: SyncOrchestrator) -> Self {
        Self {
            source,
            orchestrator,
        }
    }

    /// Drive-backed pipeline uploading through `cdn`.
    pub fn from_config(cfg: &Config, cdn: Arc<dyn CdnUploader>) -> Result<Self> {
        let source = Arc::new(DriveClient::from_config(cfg)?);
        let uploader = MediaUploadService::new(
            cdn,
            cfg.media_root(),
            cfg.cdn.folder_root.clone(),
            cfg.retry_policy(),
        )?;
        let orchestrator = SyncOrchestrator::new(Arc::new(uploader), cfg.app.upload_concurrency);
        Ok(Self::new(source, orchestrator))
    }

    pub async fn discover(&self, page_size: u32) -> Result<Vec<SourceEntry>> {
        self.source.list_recent(page_size).await
    }

    /// Never fails: every problem becomes a disposition on the report.
    #[instrument(skip_all, fields(file_id = %entry.id, file = %entry.name))]
    pub async fn process(&self, entry: &SourceEntry) -> DescriptorReport {
        let descriptor = match self.source.fetch_descriptor(entry).await {
            Ok(d) => d,
            Err(err) => {
                warn!(error = %format!("{:#}", err), "descriptor fetch failed");
                return DescriptorReport {
                    entry: entry.clone(),
                    descriptor_id: entry.fallback_product_id(),
                    name: entry.name.clone(),
                    disposition: Disposition::FetchError,
                    message: format!("Failed to process: {:#}", err),
                    violations: Vec::new(),
                    photo_count: 0,
                    sync: None,
                };
            }
        };

        let mut report = DescriptorReport {
            entry: entry.clone(),
            descriptor_id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            disposition: Disposition::NotEligible,
            message: String::new(),
            violations: validate_descriptor(&descriptor),
            photo_count: descriptor.photos.len(),
            sync: None,
        };

        if !report.violations.is_empty() {
            report.disposition = Disposition::ValidationFailed;
            report.message = format!("skipped: validation failed: {}", report.violations.join("; "));
            info!(product_id = %report.descriptor_id, violations = report.violations.len(), "descriptor invalid");
            return report;
        }
        if !descriptor.upstream_validation_passed() {
            report.disposition = Disposition::UpstreamRejected;
            report.message = "skipped: upstream validation not passed".to_string();
            return report;
        }
        if !descriptor.is_sync_eligible() {
            report.disposition = Disposition::NotEligible;
            report.message = "skipped: not marked for sync".to_string();
            return report;
        }

        let result = self.orchestrator.sync(&descriptor).await;
        let (disposition, message) = match result.status() {
            SyncStatus::Success => (
                Disposition::Synced,
                format!(
                    "Synced {}/{} photos for {}",
                    result.uploaded, result.total, descriptor.name
                ),
            ),
            SyncStatus::Partial => (
                Disposition::Partial,
                format!(
                    "Synced {}/{} photos; failed: {}",
                    result.uploaded,
                    result.total,
                    result
                        .errors
                        .iter()
                        .map(|e| format!("{}: {}", e.photo, e.error))
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            ),
            SyncStatus::Failed => (
                Disposition::SyncFailed,
                format!("All {} photo uploads failed", result.total),
            ),
        };
        report.disposition = disposition;
        report.message = message;
        report.sync = Some(result);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(disposition: Disposition, sync: Option<SyncResult>) -> DescriptorReport {
        DescriptorReport {
            entry: SourceEntry {
                id: "f".into(),
                name: "P-1_2025.json".into(),
                modified_time: None,
            },
            descriptor_id: "P-1".into(),
            name: "Lamp".into(),
            disposition,
            message: "m".into(),
            violations: vec![],
            photo_count: 1,
            sync,
        }
    }

    #[test]
    fn dispositions_map_to_log_status() {
        assert_eq!(report(Disposition::Synced, None).log_status(), LogStatus::Success);
        assert_eq!(report(Disposition::Partial, None).log_status(), LogStatus::Partial);
        assert_eq!(report(Disposition::SyncFailed, None).log_status(), LogStatus::Error);
        assert_eq!(report(Disposition::FetchError, None).log_status(), LogStatus::Error);
        assert_eq!(report(Disposition::NotEligible, None).log_status(), LogStatus::Skipped);
        assert_eq!(report(Disposition::UpstreamRejected, None).log_status(), LogStatus::Skipped);
        assert_eq!(report(Disposition::ValidationFailed, None).log_status(), LogStatus::Skipped);
    }

    #[test]
    fn record_marks_sync_attempts() {
        let skipped = report(Disposition::NotEligible, None).to_record(LogSource::Watch);
        assert!(!skipped.sync_triggered);
        assert_eq!(skipped.source, LogSource::Watch);

        let synced = report(
            Disposition::Synced,
            Some(SyncResult::from_outcomes("P-1", vec![])),
        )
        .to_record(LogSource::Trigger);
        assert!(synced.sync_triggered);
        assert_eq!(synced.descriptor_id, "P-1");
    }

    #[test]
    fn validity_ignores_later_outcomes() {
        assert!(report(Disposition::NotEligible, None).is_valid());
        assert!(report(Disposition::SyncFailed, None).is_valid());
        assert!(!report(Disposition::ValidationFailed, None).is_valid());
        assert!(!report(Disposition::FetchError, None).is_valid());
    }
}

use chrono::{DateTime, Utc};

use crate::model::{LogRecord, LogSource, LogStatus};

/// Raw `sync_log` row. Status and source stay strings until mapped.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncLogRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub descriptor_id: String,
    pub status: String,
    pub message: String,
    pub sync_triggered: bool,
    pub source: String,
}

impl SyncLogRow {
    pub fn into_record(self) -> Option<LogRecord> {
        let source = match self.source.as_str() {
            "watch" => LogSource::Watch,
            "trigger" => LogSource::Trigger,
            _ => return None,
        };
        Some(LogRecord {
            timestamp: self.timestamp,
            descriptor_id: self.descriptor_id,
            status: LogStatus::parse_status(&self.status)?,
            message: self.message,
            sync_triggered: self.sync_triggered,
            source,
        })
    }
}

//! Append-only sync log. SQLite by default, a JSONL file as the lightweight option.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{Config, LogStoreKind};
use crate::db::{self, Pool};
use crate::model::LogRecord;

#[async_trait]
pub trait SyncLog: Send + Sync {
    async fn append(&self, record: &LogRecord) -> Result<()>;
}

pub struct SqliteSyncLog {
    pool: Pool,
}

impl SqliteSyncLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncLog for SqliteSyncLog {
    async fn append(&self, record: &LogRecord) -> Result<()> {
        db::insert_log_record(&self.pool, record).await?;
        Ok(())
    }
}

/// One JSON object per line. The mutex keeps concurrent writers from interleaving lines.
pub struct JsonlSyncLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSyncLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SyncLog for JsonlSyncLog {
    async fn append(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open sync log {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Open the configured store. `DATABASE_URL` overrides the default SQLite file.
pub async fn open(cfg: &Config) -> Result<Box<dyn SyncLog>> {
    let data_dir = cfg.resolved_data_dir();
    match cfg.app.log_store {
        LogStoreKind::Sqlite => {
            let url = std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| format!("sqlite://{}/media-sync.db", data_dir));
            let pool = db::init_pool(&url).await?;
            db::run_migrations(&pool).await?;
            info!(%url, "sync log: sqlite");
            Ok(Box::new(SqliteSyncLog::new(pool)))
        }
        LogStoreKind::Jsonl => {
            let path = Path::new(&data_dir).join("logs").join("sync.log");
            info!(path = %path.display(), "sync log: jsonl");
            Ok(Box::new(JsonlSyncLog::new(path)))
        }
    }
}

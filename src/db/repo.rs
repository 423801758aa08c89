use super::model::SyncLogRow;
use crate::model::LogRecord;
use anyhow::Result;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // WAL lets the watch loop and trigger requests append concurrently.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs, make sure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all, fields(descriptor_id = %record.descriptor_id))]
pub async fn insert_log_record(pool: &Pool, record: &LogRecord) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO sync_log (timestamp, descriptor_id, status, message, sync_triggered, source) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(record.timestamp)
    .bind(&record.descriptor_id)
    .bind(record.status.as_str())
    .bind(&record.message)
    .bind(record.sync_triggered)
    .bind(record.source.as_str())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn log_records_for(pool: &Pool, descriptor_id: &str) -> Result<Vec<LogRecord>> {
    let rows = sqlx::query_as::<_, SyncLogRow>(
        "SELECT id, timestamp, descriptor_id, status, message, sync_triggered, source \
         FROM sync_log WHERE descriptor_id = ? ORDER BY id",
    )
    .bind(descriptor_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().filter_map(SyncLogRow::into_record).collect())
}

pub async fn count_log_records(pool: &Pool) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sync_log")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn file_urls_gain_create_mode() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("sync.db");
        let url = format!("sqlite://{}", path.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(path.parent().unwrap().exists());

        let with_mode = format!("sqlite://{}?mode=ro", path.display());
        assert_eq!(prepare_sqlite_url(&with_mode), with_mode);
    }
}

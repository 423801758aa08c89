//! On-demand discovery pass: authorization and the summary it returns.
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::config::Trigger as TriggerConfig;
use crate::model::LogSource;
use crate::pipeline::{Disposition, Pipeline};
use crate::sync_log::SyncLog;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "ms_admin";
const SESSION_DURATION_SECS: i64 = 12 * 3600;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("document store integration is not configured")]
    NotConfigured,
    #[error("failed to list descriptors: {0}")]
    Source(String),
}

/// Credentials accepted by the trigger. Empty secrets disable that path.
#[derive(Clone)]
pub struct Authorizer {
    api_key: String,
    session_secret: String,
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer").finish_non_exhaustive()
    }
}

impl Authorizer {
    pub fn new(api_key: impl Into<String>, session_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            session_secret: session_secret.into(),
        }
    }

    pub fn from_config(cfg: &TriggerConfig) -> Self {
        Self::new(cfg.api_key.trim(), cfg.session_secret.trim())
    }

    /// `api_key` is the `x-api-key` header, `bearer` the token after `Bearer `,
    /// `cookie` the raw `Cookie` header.
    pub fn authorize(
        &self,
        api_key: Option<&str>,
        bearer: Option<&str>,
        cookie: Option<&str>,
    ) -> Result<(), TriggerError> {
        if !self.api_key.is_empty() {
            let presented = api_key.or(bearer).map(str::trim).unwrap_or("");
            if !presented.is_empty()
                && constant_time_eq(presented.as_bytes(), self.api_key.as_bytes())
            {
                return Ok(());
            }
        }
        if !self.session_secret.is_empty() {
            if let Some(value) = cookie.and_then(|c| parse_cookie(c, SESSION_COOKIE)) {
                if verify_session(value, &self.session_secret, Utc::now()).is_some() {
                    return Ok(());
                }
            }
        }
        Err(TriggerError::Unauthorized)
    }
}

/// Signed session value: `user|expiry|signature`.
pub fn create_session(user: &str, secret: &str, now: DateTime<Utc>) -> Option<String> {
    let expiry = now.timestamp() + SESSION_DURATION_SECS;
    let payload = format!("{user}|{expiry}");
    let sig = sign(&payload, secret)?;
    Some(format!("{payload}|{sig}"))
}

/// Returns the user when the signature matches and the session has not expired.
pub fn verify_session(value: &str, secret: &str, now: DateTime<Utc>) -> Option<String> {
    let mut parts = value.splitn(3, '|');
    let (user, expiry, sig) = (parts.next()?, parts.next()?, parts.next()?);
    let expected = sign(&format!("{user}|{expiry}"), secret)?;
    if !constant_time_eq(sig.as_bytes(), expected.as_bytes()) {
        return None;
    }
    let expiry: i64 = expiry.parse().ok()?;
    if now.timestamp() > expiry {
        return None;
    }
    Some(user.to_string())
}

fn sign(payload: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(name)?.strip_prefix('='))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TriggerItem {
    pub id: String,
    pub name: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSummary {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub products_checked: usize,
    pub products_valid: usize,
    pub results: Vec<TriggerItem>,
}

/// One discovery pass without de-duplication. Per-item failures stay inside the summary.
#[instrument(skip_all, fields(page_size = page_size))]
pub async fn run_once(
    pipeline: &Pipeline,
    log: &dyn SyncLog,
    page_size: u32,
) -> Result<TriggerSummary, TriggerError> {
    let entries = pipeline
        .discover(page_size)
        .await
        .map_err(|e| TriggerError::Source(format!("{:#}", e)))?;

    let mut results = Vec::with_capacity(entries.len());
    let mut products_valid = 0;
    for entry in &entries {
        let report = pipeline.process(entry).await;
        if report.is_valid() {
            products_valid += 1;
        }
        let record = report.to_record(LogSource::Trigger);
        if let Err(err) = log.append(&record).await {
            error!(?err, product_id = %record.descriptor_id, "failed to append sync log record");
        }
        results.push(TriggerItem {
            id: report.descriptor_id,
            name: report.name,
            status: item_status(report.disposition).to_string(),
            message: report.message,
        });
    }

    info!(checked = entries.len(), valid = products_valid, "trigger pass complete");
    Ok(TriggerSummary {
        success: true,
        timestamp: Utc::now(),
        products_checked: entries.len(),
        products_valid,
        results,
    })
}

fn item_status(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Synced => "synced",
        Disposition::Partial => "partial",
        Disposition::SyncFailed | Disposition::FetchError => "error",
        Disposition::ValidationFailed => "invalid",
        Disposition::UpstreamRejected | Disposition::NotEligible => "skipped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn api_key_accepted_from_header_or_bearer() {
        let auth = Authorizer::new("k-123", "");
        assert!(auth.authorize(Some("k-123"), None, None).is_ok());
        assert!(auth.authorize(None, Some("k-123"), None).is_ok());
        assert!(auth.authorize(Some("k-124"), None, None).is_err());
        assert!(auth.authorize(None, None, None).is_err());
    }

    #[test]
    fn empty_key_never_matches() {
        let auth = Authorizer::new("", "");
        assert!(matches!(
            auth.authorize(Some(""), None, None),
            Err(TriggerError::Unauthorized)
        ));
    }

    #[test]
    fn session_cookie_roundtrip_and_expiry() {
        let now = Utc::now();
        let value = create_session("admin", "s3cret", now).unwrap();
        assert_eq!(verify_session(&value, "s3cret", now).as_deref(), Some("admin"));
        assert!(verify_session(&value, "other", now).is_none());
        let later = now + Duration::seconds(SESSION_DURATION_SECS + 1);
        assert!(verify_session(&value, "s3cret", later).is_none());

        let auth = Authorizer::new("", "s3cret");
        let header = format!("theme=dark; {SESSION_COOKIE}={value}");
        assert!(auth.authorize(None, None, Some(&header)).is_ok());
    }

    #[test]
    fn tampered_session_rejected() {
        let now = Utc::now();
        let value = create_session("admin", "s3cret", now).unwrap();
        let forged = value.replacen("admin", "root", 1);
        assert!(verify_session(&forged, "s3cret", now).is_none());
    }
}

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pipeline::Pipeline;
use crate::sync_log::SyncLog;
use crate::trigger::{self, Authorizer, TriggerError};

pub const TRIGGER_PATH: &str = "/api/products/sync-from-google-drive";

pub struct AppState {
    /// `None` when the document store is not wired up.
    pub pipeline: Option<Arc<Pipeline>>,
    pub log: Arc<dyn SyncLog>,
    pub auth: Authorizer,
    pub page_size: u32,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(TRIGGER_PATH, post(sync_from_drive))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn sync_from_drive(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let api_key = header_str(&headers, "x-api-key");
    let bearer = header_str(&headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "));
    let cookie = header_str(&headers, header::COOKIE.as_str());
    if let Err(err) = state.auth.authorize(api_key, bearer, cookie) {
        warn!("trigger request rejected");
        return error_response(err);
    }

    let Some(pipeline) = state.pipeline.as_ref() else {
        return error_response(TriggerError::NotConfigured);
    };
    match trigger::run_once(pipeline, state.log.as_ref(), state.page_size).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => error_response(err),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn error_response(err: TriggerError) -> Response {
    let status = match err {
        TriggerError::Unauthorized => StatusCode::UNAUTHORIZED,
        TriggerError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        TriggerError::Source(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(serde_json::json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}

/// Serve until `cancel` fires; in-flight requests are allowed to finish.
pub async fn serve(addr: &str, state: Arc<AppState>, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind trigger listener on {addr}"))?;
    info!(%addr, path = TRIGGER_PATH, "trigger server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("trigger server failed")?;
    Ok(())
}

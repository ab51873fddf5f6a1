//! HTTP entry points.
//!
//! # Endpoints
//!
//! - `GET|POST /build/{secret}` - a push event (`POST` with a JSON body
//!   carrying `after`) builds that commit; anything else queues a full cycle
//! - `GET /health` - returns 200 while the server is up

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use preview_build::BuildError;
use preview_core::CommitSha;

use crate::dispatch::{CycleRequest, Dispatcher};
use crate::error::DaemonError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    secret: String,
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(secret: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                secret: secret.into(),
                dispatcher,
            }),
        }
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Access denied")]
    AccessDenied,

    #[error("invalid push payload: {0}")]
    BadPayload(String),

    #[error("Branch not found for commit {0}")]
    BranchNotFound(CommitSha),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpError::AccessDenied => StatusCode::FORBIDDEN,
            HttpError::BadPayload(_) => StatusCode::BAD_REQUEST,
            HttpError::BranchNotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

impl From<DaemonError> for HttpError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::Build(BuildError::BranchNotFound { commit }) => {
                HttpError::BranchNotFound(commit)
            }
            other => HttpError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    after: String,
}

#[derive(Debug, Serialize)]
struct CommitBuildStarted {
    commit: String,
    branch: String,
}

#[derive(Debug, Serialize)]
struct CycleStarted {
    built: &'static str,
}

pub fn build_router(state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/build/{secret}", get(build_handler).post(build_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Webhook handler.
///
/// A JSON `POST` resolves `after` to the branch it is the tip of and starts
/// a commit build, answering `{"commit": .., "branch": ..}`. Any other
/// authorised request queues a full cycle and answers `{"built":"started"}`.
pub async fn build_handler(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    if secret != state.inner.secret {
        tracing::warn!(%method, "webhook with wrong secret");
        return Err(HttpError::AccessDenied);
    }

    if method == Method::POST && is_json(&headers) {
        let event: PushEvent = serde_json::from_slice(&body)
            .map_err(|err| HttpError::BadPayload(err.to_string()))?;
        let commit =
            CommitSha::parse(&event.after).map_err(|err| HttpError::BadPayload(err.to_string()))?;
        tracing::info!(commit = %commit, "push event");

        let branch = state.dispatcher().resolve_commit(commit.clone()).await?;
        state
            .dispatcher()
            .start_commit_build(commit.clone(), branch.name.clone());
        return Ok(Json(CommitBuildStarted {
            commit: commit.to_string(),
            branch: branch.name.to_string(),
        })
        .into_response());
    }

    state.dispatcher().request_cycle(CycleRequest::Webhook)?;
    Ok(Json(CycleStarted { built: "started" }).into_response())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

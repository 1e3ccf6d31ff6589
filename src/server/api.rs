use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::jobs::{ArtifactLookup, JobRegistry, JobStatus};
use crate::errors::{ErrorKind, PipelineError};
use crate::pipeline::CorrelationId;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub jobs: JobRegistry,
    /// Suggested file name for downloads, overriding the produced name.
    pub download_name: Option<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateGenerationRequest {
    pub prompt: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err.kind {
            ErrorKind::InvalidPrompt => ApiError::BadRequest(err.message),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/generations", get(list_generations).post(create_generation))
        .route("/api/generations/{id}", get(get_generation))
        .route("/api/generations/{id}/artifact", get(download_artifact))
        .route("/api/generations/{id}/cancel", post(cancel_generation))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

fn parse_id(id: &str) -> Result<CorrelationId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::NotFound(format!("Generation {} not found", id)))
}

async fn create_generation(
    State(state): State<SharedState>,
    Json(req): Json<CreateGenerationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.jobs.submit(&req.prompt).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"id": id, "status": JobStatus::Running})),
    ))
}

async fn list_generations(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.jobs.list().await)
}

async fn get_generation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let view = state
        .jobs
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Generation {} not found", id)))?;
    Ok(Json(view))
}

async fn download_artifact(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let artifact = state.jobs.artifact(id).await.map_err(|lookup| match lookup {
        ArtifactLookup::Unknown => ApiError::NotFound(format!("Generation {} not found", id)),
        ArtifactLookup::Running => {
            ApiError::Conflict(format!("Generation {} is still running", id))
        }
        ArtifactLookup::Unavailable(status) => ApiError::NotFound(format!(
            "Generation {} {} and has no artifact",
            id, status
        )),
    })?;

    let download = artifact
        .download(state.download_name.as_deref())
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read artifact: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, download.mime_type),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&download.filename),
            ),
        ],
        download.bytes,
    ))
}

/// An attachment header for `filename`. Anything but printable ASCII, and the
/// quote and backslash, become `_` so the value is always a valid header.
fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' '..='~' => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

async fn cancel_generation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let view = state
        .jobs
        .cancel(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Generation {} not found", id)))?;
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_content_disposition_plain_name() {
        assert_eq!(
            content_disposition("cats.pptx"),
            "attachment; filename=\"cats.pptx\""
        );
    }

    #[test]
    fn test_content_disposition_is_always_a_valid_header() {
        for name in [
            "a\nb.pptx",
            "tab\there.pptx",
            "bell\u{7}.pptx",
            "del\u{7f}.pptx",
            "qu\"ote\\.pptx",
            "présentation.pptx",
            "スライド.pptx",
        ] {
            let value = content_disposition(name);
            assert!(HeaderValue::from_str(&value).is_ok(), "{value:?}");
            assert!(value.is_ascii());
        }
        assert_eq!(
            content_disposition("a\nb\u{7f}\".pptx"),
            "attachment; filename=\"a_b__.pptx\""
        );
    }
}

//! JSON HTTP API.
//!
//! Every response uses the `{ success, data?, error? }` envelope; typed pipeline errors are
//! mapped to status codes here and nowhere else.

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path as AxumPath, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::signal;

use crate::store::TranscriptionRecord;
use crate::transcribe::{TranscriptionPipeline, TranscriptionRequest};
use crate::uploads::{PresignedUpload, UploadBroker};
use crate::TranscriptorError;

/// Shared handler state; everything inside is cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TranscriptionPipeline>,
    pub uploads: Option<Arc<UploadBroker>>,
    pub max_body_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

impl ApiResponse<()> {
    fn done() -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            error: None,
        })
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<TranscriptorError> for ApiError {
    fn from(err: TranscriptorError) -> Self {
        let status = match &err {
            TranscriptorError::InvalidRequest(_) | TranscriptorError::UnsupportedUrl(_) => StatusCode::BAD_REQUEST,
            TranscriptorError::NotFound(_) => StatusCode::NOT_FOUND,
            TranscriptorError::NotTranscribable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TranscriptorError::GenerationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TranscriptorError::Config(_)
            | TranscriptorError::GenerationFailed(_)
            | TranscriptorError::Storage(_)
            | TranscriptorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        TranscriptorError::from_anyhow(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        } else {
            tracing::warn!(status = %self.status, error = %self.message, "Request rejected");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn internal(err: std::io::Error) -> ApiError {
    anyhow::Error::from(err).into()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeBody {
    #[serde(default)]
    video_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody {
    file_name: String,
    #[serde(default)]
    content_type: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/transcribe", post(transcribe))
        .route("/transcriptions", get(list_transcriptions))
        .route("/transcriptions/{id}", get(get_transcription).delete(delete_transcription))
        .route("/uploads", post(create_upload))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install Ctrl+C handler");
    }
    tracing::info!("Shutting down");
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "endpoint not found")
}

async fn health() -> Json<ApiResponse<()>> {
    ApiResponse::done()
}

async fn transcribe(State(state): State<AppState>, request: Request) -> ApiResult<Json<ApiResponse<TranscriptionRecord>>> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    // Staged uploads must outlive the pipeline run
    let (job, _staging) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let Json(body) = Json::<TranscribeBody>::from_request(request, &state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        (TranscriptionRequest::Url(body.video_url.unwrap_or_default()), None)
    };

    let record = state.pipeline.process(job).await?;
    Ok(ApiResponse::ok(record))
}

/// Stage the `file` field on disk, or fall back to a `videoUrl` text field
async fn read_multipart(mut multipart: Multipart) -> ApiResult<(TranscriptionRequest, Option<TempDir>)> {
    let mut video_url = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(|n| n.to_string())
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "upload".to_string());

                let staging = tempfile::Builder::new()
                    .prefix("tubescribe-upload-")
                    .tempdir()
                    .map_err(internal)?;
                let path = staging.path().join("upload");
                let mut file = fs_err::File::create(&path).map_err(internal)?;

                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?
                {
                    file.write_all(&chunk).map_err(internal)?;
                }
                file.flush().map_err(internal)?;

                tracing::info!(file_name = %file_name, "Received audio upload");
                return Ok((TranscriptionRequest::Upload { file_name, path }, Some(staging)));
            }
            Some("videoUrl") => {
                video_url = Some(field.text().await.map_err(|e| ApiError::bad_request(e.body_text()))?);
            }
            _ => {}
        }
    }

    match video_url {
        Some(url) => Ok((TranscriptionRequest::Url(url), None)),
        None => Err(ApiError::bad_request("multipart body needs a file or videoUrl field")),
    }
}

async fn list_transcriptions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ApiResponse<Vec<TranscriptionRecord>>>> {
    let limit = match params.limit.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| ApiError::bad_request(format!("limit must be a non-negative integer, got {}", raw)))?,
        ),
        None => None,
    };

    let records = state.pipeline.store().list(limit).await?;
    Ok(ApiResponse::ok(records))
}

async fn get_transcription(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<ApiResponse<TranscriptionRecord>>> {
    let record = state
        .pipeline
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| TranscriptorError::NotFound(id.clone()))?;
    Ok(ApiResponse::ok(record))
}

async fn delete_transcription(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    if !state.pipeline.store().delete(&id).await? {
        return Err(TranscriptorError::NotFound(id).into());
    }

    tracing::info!(id = %id, "Deleted transcription");
    Ok(ApiResponse::done())
}

async fn create_upload(
    State(state): State<AppState>,
    body: Result<Json<UploadBody>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Json<ApiResponse<PresignedUpload>>> {
    let Json(body) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let broker = state
        .uploads
        .as_ref()
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "uploads are not enabled"))?;

    let upload = broker.presign(&body.file_name, body.content_type.as_deref()).await?;
    Ok(ApiResponse::ok(upload))
}

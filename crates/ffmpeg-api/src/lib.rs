use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError,
        rejection::QueryRejection,
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod jobs;
pub mod range;
pub mod sampling;
pub mod state;
pub mod workspace;

pub use engine::{Engine, EngineError, EngineHandle, EngineStatus, SharedEngine};
pub use error::JobError;
pub use jobs::{Clip, ClipKind, Frames, Jobs};
pub use range::ClipRange;
pub use sampling::{FrameRate, Sampling, compute_sampling};
pub use state::{AppState, Config};
pub use workspace::{JobScope, Workspace};

/// Multipart field carrying the uploaded video.
pub const VIDEO_FIELD: &str = "video";

/// Room for multipart boundaries and part headers on top of the file limit.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(config: &Config) -> anyhow::Result<Router> {
    let state = AppState::new(config)?;
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let limit = state.max_upload_bytes;

    Router::new()
        .route("/frames", post(frames_handler))
        .route("/trim", post(trim_handler))
        .route("/thumbnail", post(thumbnail_handler))
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(limit.saturating_add(MULTIPART_OVERHEAD_BYTES)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct FramesQuery {
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipQuery {
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramesResponse {
    pub count: usize,
    pub sampling_rate_hz: f64,
    /// Base64 encoded PNG images in capture order.
    pub frames: Vec<String>,
}

fn upload_error(e: MultipartError) -> JobError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        JobError::TooLarge
    } else {
        JobError::Upload(e.body_text())
    }
}

fn query_error(e: QueryRejection) -> JobError {
    JobError::Query(e.body_text())
}

/// Reads the `video` field, refusing files larger than `limit` bytes.
async fn read_video(mut multipart: Multipart, limit: usize) -> Result<Bytes, JobError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(upload_error)?
    {
        if field.name() == Some(VIDEO_FIELD) {
            let mut data = BytesMut::new();
            while let Some(chunk) = field.chunk().await.map_err(upload_error)? {
                if data.len() + chunk.len() > limit {
                    return Err(JobError::TooLarge);
                }
                data.extend_from_slice(&chunk);
            }
            if data.is_empty() {
                return Err(JobError::Upload("video field is empty".to_string()));
            }
            tracing::info!("Received upload ({} bytes)", data.len());
            return Ok(data.freeze());
        }
    }
    Err(JobError::MissingField(VIDEO_FIELD))
}

async fn frames_handler(
    State(state): State<AppState>,
    query: Result<Query<FramesQuery>, QueryRejection>,
    multipart: Multipart,
) -> Result<Json<FramesResponse>, JobError> {
    let Query(params) = query.map_err(query_error)?;
    compute_sampling(params.duration)?;
    let video = read_video(multipart, state.max_upload_bytes).await?;
    let frames = state.jobs.extract_frames(&video, params.duration).await?;

    Ok(Json(FramesResponse {
        count: frames.images.len(),
        sampling_rate_hz: frames.sampling.rate.as_hz(),
        frames: frames.images.iter().map(|png| STANDARD.encode(png)).collect(),
    }))
}

async fn trim_handler(
    State(state): State<AppState>,
    query: Result<Query<ClipQuery>, QueryRejection>,
    multipart: Multipart,
) -> Result<Response, JobError> {
    let Query(params) = query.map_err(query_error)?;
    clip_handler(state, ClipKind::Trim, params, multipart).await
}

async fn thumbnail_handler(
    State(state): State<AppState>,
    query: Result<Query<ClipQuery>, QueryRejection>,
    multipart: Multipart,
) -> Result<Response, JobError> {
    let Query(params) = query.map_err(query_error)?;
    clip_handler(state, ClipKind::Thumbnail, params, multipart).await
}

async fn clip_handler(
    state: AppState,
    kind: ClipKind,
    params: ClipQuery,
    multipart: Multipart,
) -> Result<Response, JobError> {
    let range = ClipRange::parse(&params.start_time, &params.end_time)?;
    let video = read_video(multipart, state.max_upload_bytes).await?;

    let clip = match kind {
        ClipKind::Trim => state.jobs.trim(&video, &range).await?,
        ClipKind::Thumbnail => state.jobs.thumbnail(&video, &range).await?,
    };

    Ok(clip_response(clip))
}

fn clip_response(clip: Clip) -> Response {
    (
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", clip.filename),
            ),
            (header::CONTENT_LENGTH, clip.content_length().to_string()),
        ],
        clip.bytes,
    )
        .into_response()
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "engine": state.engine().status(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub engine_version: Option<String>,
}

async fn info_handler(State(state): State<AppState>) -> Json<ServerInfo> {
    Json(ServerInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine_version: state.engine().loaded().map(|e| e.version().to_string()),
    })
}

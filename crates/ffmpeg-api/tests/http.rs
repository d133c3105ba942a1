//! End-to-end tests of the HTTP surface against a scripted engine.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tower::ServiceExt;

use ffmpeg_api::{AppState, Engine, EngineError, EngineHandle, SharedEngine, Workspace, router};

const BOUNDARY: &str = "ffmpeg-api-test-boundary";

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Produces one fake PNG per requested frame, or a fake MP4 prefixed with
/// the requested window.
#[derive(Debug, Default)]
struct ScriptedEngine {
    runs: AtomicUsize,
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn run(&self, cwd: &Path, args: &[String]) -> Result<(), EngineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        let input = arg_after(args, "-i").expect("input");
        let data = tokio::fs::read(cwd.join(input)).await?;
        if data.starts_with(b"corrupt") {
            return Err(EngineError::Failed {
                code: Some(1),
                stderr: "moov atom not found".to_string(),
            });
        }

        let output = args.last().expect("output");
        if output.contains("%d") {
            let count: u32 = arg_after(args, "-frames:v")
                .expect("frame limit")
                .parse()
                .expect("number");
            for n in 1..=count {
                let name = output.replace("%d", &n.to_string());
                tokio::fs::write(cwd.join(name), format!("PNG frame {n}")).await?;
            }
        } else {
            let start = arg_after(args, "-ss").expect("start");
            let end = arg_after(args, "-to").expect("end");
            let mut clip = format!("mp4 {start}-{end} ").into_bytes();
            clip.extend_from_slice(&data);
            tokio::fs::write(cwd.join(output), clip).await?;
        }
        Ok(())
    }

    fn version(&self) -> &str {
        "scripted 1.0"
    }
}

struct Harness {
    app: Router,
    engine: Arc<ScriptedEngine>,
    workspace: Arc<Workspace>,
}

fn harness(name: &str, max_upload_bytes: usize) -> Harness {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let root = std::env::temp_dir().join(format!("ffmpeg-api-http-{name}-{id}"));
    let _ = std::fs::remove_dir_all(&root);

    let engine = Arc::new(ScriptedEngine::default());
    let workspace = Arc::new(Workspace::open(root).expect("workspace"));
    let handle = EngineHandle::ready(Arc::clone(&engine) as SharedEngine);
    let state = AppState::with_engine(Arc::new(handle), Arc::clone(&workspace), max_upload_bytes);

    Harness {
        app: router(state),
        engine,
        workspace,
    }
}

fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"clip.mp4\"\r\nContent-Type: video/mp4\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(uri: &str, field: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(field, data)))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn assert_json_bad_request(response: axum::response::Response) -> String {
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(content_type, "application/json");
    let json = body_json(response).await;
    json["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn frames_for_twelve_seconds_returns_nine_pngs() {
    let h = harness("frames", 1024 * 1024);

    let response = h
        .app
        .oneshot(upload("/frames?duration=12", "video", b"video bytes"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["count"], 9);
    assert_eq!(json["samplingRateHz"], 1.0);

    let frames = json["frames"].as_array().unwrap();
    assert_eq!(frames.len(), 9);
    let first = STANDARD.decode(frames[0].as_str().unwrap()).unwrap();
    assert_eq!(first, b"PNG frame 1".to_vec());

    assert!(h.workspace.entries().unwrap().is_empty());
}

#[tokio::test]
async fn frames_outside_the_table_are_rejected_before_the_engine() {
    let h = harness("frames-too-long", 1024 * 1024);

    let response = h
        .app
        .oneshot(upload("/frames?duration=70", "video", b"video bytes"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("70"));
    assert_eq!(h.engine.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn trim_returns_attachment_with_exact_length() {
    let h = harness("trim", 1024 * 1024);

    let response = h
        .app
        .oneshot(upload(
            "/trim?startTime=00:00:01&endTime=00:00:03",
            "video",
            b"video bytes",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=output.mp4"
    );

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"mp4 00:00:01.000-00:00:03.000 video bytes");
    assert_eq!(
        headers[header::CONTENT_LENGTH].to_str().unwrap(),
        body.len().to_string()
    );
    assert!(h.workspace.entries().unwrap().is_empty());
}

#[tokio::test]
async fn thumbnail_and_trim_produce_identical_clips() {
    let h = harness("thumbnail", 1024 * 1024);
    let uri = "startTime=2&endTime=00:00:04.5";

    let trim = h
        .app
        .clone()
        .oneshot(upload(&format!("/trim?{uri}"), "video", b"same input"))
        .await
        .unwrap();
    let thumb = h
        .app
        .oneshot(upload(&format!("/thumbnail?{uri}"), "video", b"same input"))
        .await
        .unwrap();

    assert_eq!(trim.status(), StatusCode::OK);
    assert_eq!(thumb.status(), StatusCode::OK);
    let trim = to_bytes(trim.into_body(), usize::MAX).await.unwrap();
    let thumb = to_bytes(thumb.into_body(), usize::MAX).await.unwrap();
    assert_eq!(trim, thumb);
}

#[tokio::test]
async fn engine_failure_is_a_bare_server_error() {
    let h = harness("corrupt", 1024 * 1024);

    let response = h
        .app
        .oneshot(upload("/trim?startTime=1&endTime=3", "video", b"corrupt data"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
    assert!(h.workspace.entries().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_time_range_is_rejected() {
    let h = harness("bad-range", 1024 * 1024);

    let response = h
        .app
        .oneshot(upload("/trim?startTime=00:00:05&endTime=-f", "video", b"video"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.engine.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_video_field_is_rejected() {
    let h = harness("no-field", 1024 * 1024);

    let response = h
        .app
        .oneshot(upload("/frames?duration=5", "file", b"video"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("video"));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let h = harness("too-large", 64);

    let response = h
        .app
        .oneshot(upload("/trim?startTime=1&endTime=3", "video", &[0u8; 4096]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(h.engine.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upload_at_the_limit_is_accepted() {
    let h = harness("at-limit", 1024);

    let response = h
        .app
        .oneshot(upload("/trim?startTime=1&endTime=3", "video", &[7u8; 1024]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.engine.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsupported_duration_is_rejected_before_reading_the_upload() {
    let h = harness("early-reject", 64);

    // Larger than the whole-body limit, so reading it would answer 413.
    let response = h
        .app
        .oneshot(upload("/frames?duration=70", "video", &[0u8; 70_000]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("70"));
    assert_eq!(h.engine.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_numeric_duration_is_a_json_bad_request() {
    let h = harness("bad-duration", 1024 * 1024);

    let response = h
        .app
        .oneshot(upload("/frames?duration=abc", "video", b"video"))
        .await
        .unwrap();

    let error = assert_json_bad_request(response).await;
    assert!(error.starts_with("invalid query"), "{error}");
    assert_eq!(h.engine.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_end_time_is_a_json_bad_request() {
    let h = harness("no-end", 1024 * 1024);

    let response = h
        .app
        .oneshot(upload("/trim?startTime=1", "video", b"video"))
        .await
        .unwrap();

    let error = assert_json_bad_request(response).await;
    assert!(error.contains("endTime"), "{error}");
    assert_eq!(h.engine.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn health_reports_engine_state() {
    let h = harness("health", 1024);

    let response = h
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["engine"]["state"], "ready");
}

#[tokio::test]
async fn info_reports_engine_version() {
    let h = harness("info", 1024);

    let response = h
        .app
        .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["engine_version"], "scripted 1.0");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

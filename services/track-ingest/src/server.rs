//!
//! src/server.rs  Oct 18th, 2026
//!
//! HTTP surface: a welcome route, a hello route, static files and the
//! fingerprint endpoint which takes a multipart audio upload and returns
//! the hashed fingerprint alongside the raw fpcalc payload.
//!

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::errors::IngestError;
use crate::fingerprint::FingerprintExtractor;
use crate::hasher::{dedup_key, md5_digest};
use crate::types::FingerprintRecord;

pub const ALLOWED_MIME_TYPES: [&str; 6] = [
    "audio/mpeg", "audio/wav", "audio/ogg", "audio/flac", "audio/mp3", "audio/x-m4a"
];

pub struct AppState {
    pub extractor: Arc<dyn FingerprintExtractor>,
    pub uploads_dir: PathBuf
}

pub fn router(state: Arc<AppState>, cfg: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/api/hello", get(hello))
        .route("/api/fingerprint", post(fingerprint))
        .fallback_service(ServeDir::new(&cfg.public_dir))
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until the token is cancelled
pub async fn serve(app: Router, port: u16, shutdown: CancellationToken) ->
    Result<(), IngestError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "server.listen");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("server.exit");
    Ok(())
}

async fn welcome() -> Json<Value> {
    Json(json!({ "message": "Welcome to the Audio Fingerprinting Server!" }))
}

async fn hello() -> Json<Value> {
    Json(json!({ "message": "Hello, World!" }))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn multipart_error(e: MultipartError) -> Response {
    warn!(error = %e, "fingerprint.multipart");
    error_response(e.status(), &e.body_text())
}

struct Upload {
    content_type: Option<String>,
    file_name: Option<String>,
    bytes: axum::body::Bytes
}

/// First field named `audio`; other fields are drained and ignored
async fn read_audio_field(multipart: &mut Multipart) -> Result<Option<Upload>, Response> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("audio") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Some(Upload { content_type, file_name, bytes }));
    }
    Ok(None)
}

/// `<uuid><ext>`, keeping only a plain alphanumeric extension
fn upload_name(original: Option<&str>) -> String {
    let ext = original
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{}{ext}", Uuid::new_v4())
}

/// fpcalc payload with the fingerprint swapped for its sha-256
pub fn hashed_payload(record: &FingerprintRecord) -> Value {
    let mut data = match &record.raw {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new()
    };
    data.insert("duration".into(), json!(record.duration_seconds));
    data.insert("originalFingerprint".into(), json!(record.raw_fingerprint));
    data.insert("fingerprint".into(), json!(dedup_key(&record.raw_fingerprint).as_str()));
    data.insert("md5".into(), json!(md5_digest(&record.raw_fingerprint)));
    Value::Object(data)
}

async fn fingerprint(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let upload = match read_audio_field(&mut multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return error_response(StatusCode::BAD_REQUEST, "No audio file uploaded"),
        Err(resp) => return resp
    };

    let mime = upload.content_type.as_deref().unwrap_or_default();
    if !ALLOWED_MIME_TYPES.contains(&mime) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid file type. Only audio files are allowed."
        );
    }

    let path = state.uploads_dir.join(upload_name(upload.file_name.as_deref()));
    let saved = async {
        tokio::fs::create_dir_all(&state.uploads_dir).await?;
        tokio::fs::write(&path, &upload.bytes).await
    }.await;
    if let Err(e) = saved {
        error!(error = %e, path = %path.display(), "fingerprint.save");
        let _ = tokio::fs::remove_file(&path).await;
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
    }

    let result = state.extractor.extract(&path).await;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!(error = %e, path = %path.display(), "fingerprint.cleanup");
    }

    match result {
        Ok(record) => Json(json!({
            "success": true,
            "message": "Fingerprint generated and hashed successfully",
            "data": hashed_payload(&record)
        })).into_response(),
        Err(IngestError::Parse(e)) => {
            error!(error = %e, "fingerprint.parse");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to parse fingerprint data")
        }
        Err(e) => {
            let diagnostics = state.extractor.diagnose().await;
            let message = if diagnostics.fpcalc_not_found {
                "Failed to generate fingerprint: fpcalc not found. \
                 Please make sure Chromaprint is installed."
            } else {
                "Failed to generate fingerprint"
            };

            let mut body = json!({
                "error": message,
                "details": e.to_string(),
                "command": state.extractor.command_line(&path),
                "path": path.display().to_string()
            });
            if let (Some(out), Ok(Value::Object(extra))) =
                (body.as_object_mut(), serde_json::to_value(&diagnostics)) {
                out.extend(extra);
            }

            error!(diagnostics = %body, "fingerprint.failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::fingerprint::Diagnostics;

    #[derive(Clone, Copy)]
    enum Mode {
        Ok,
        Malformed,
        Missing
    }

    struct StubExtractor {
        mode: Mode,
        seen: Mutex<Vec<PathBuf>>
    }

    #[async_trait]
    impl FingerprintExtractor for StubExtractor {
        async fn extract(&self, path: &Path) -> Result<FingerprintRecord, IngestError> {
            assert!(path.exists());
            self.seen.lock().unwrap().push(path.to_path_buf());
            match self.mode {
                Mode::Ok => crate::fingerprint::parse_fpcalc_output(
                    r#"{"duration": 180, "fingerprint": "abc"}"#
                ),
                Mode::Malformed => crate::fingerprint::parse_fpcalc_output("oops"),
                Mode::Missing => Err(IngestError::Extraction("No such file or directory".into()))
            }
        }

        async fn diagnose(&self) -> Diagnostics {
            Diagnostics {
                os: "linux".into(),
                fpcalc_version_error: Some("not found".into()),
                fpcalc_not_found: true,
                ..Diagnostics::default()
            }
        }
    }

    fn app(mode: Mode) -> (Router, Arc<StubExtractor>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(StubExtractor { mode, seen: Mutex::new(vec![]) });
        let state = Arc::new(AppState {
            extractor: extractor.clone(),
            uploads_dir: dir.path().join("uploads")
        });
        let cfg = ServerConfig { public_dir: dir.path().join("public"), ..ServerConfig::default() };
        (router(state, &cfg), extractor, dir)
    }

    fn multipart_request(field: &str, file_name: &str, mime: &str) -> Request<Body> {
        let body = format!(
            "--XYZ\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: {mime}\r\n\r\nID3fakeaudio\r\n--XYZ--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/api/fingerprint")
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn welcome_and_hello() {
        let (app, _, _dir) = app(Mode::Ok);
        let resp = app.clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["message"], "Welcome to the Audio Fingerprinting Server!");

        let resp = app.oneshot(Request::get("/api/hello").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(json_body(resp).await["message"], "Hello, World!");
    }

    #[tokio::test]
    async fn fingerprint_returns_hashes_and_removes_upload() {
        let (app, extractor, _dir) = app(Mode::Ok);
        let resp = app.oneshot(multipart_request("audio", "song.mp3", "audio/mpeg")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["originalFingerprint"], "abc");
        assert_eq!(body["data"]["fingerprint"], dedup_key("abc").as_str());
        assert_eq!(body["data"]["md5"], "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(body["data"]["duration"], 180.0);

        let seen = extractor.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].extension().unwrap(), "mp3");
        assert!(!seen[0].exists());
    }

    #[tokio::test]
    async fn missing_field_and_bad_mime_are_rejected() {
        let (app, extractor, _dir) = app(Mode::Ok);
        let resp = app.clone()
            .oneshot(multipart_request("file", "song.mp3", "audio/mpeg"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "No audio file uploaded");

        let resp = app.oneshot(multipart_request("audio", "notes.txt", "text/plain")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "Invalid file type. Only audio files are allowed.");

        assert!(extractor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_failure_reports_diagnostics() {
        let (app, extractor, _dir) = app(Mode::Missing);
        let resp = app.oneshot(multipart_request("audio", "song.wav", "audio/wav")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(resp).await;
        assert!(body["error"].as_str().unwrap().contains("fpcalc not found"));
        assert_eq!(body["fpcalcNotFound"], true);
        assert_eq!(body["os"], "linux");
        assert!(body["command"].as_str().unwrap().starts_with("fpcalc -json"));
        assert!(body.get("fpcalcVersion").is_none());
        assert!(!extractor.seen.lock().unwrap()[0].exists());
    }

    #[tokio::test]
    async fn malformed_tool_output_is_a_500() {
        let (app, _, _dir) = app(Mode::Malformed);
        let resp = app.oneshot(multipart_request("audio", "song.flac", "audio/flac")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(resp).await["error"], "Failed to parse fingerprint data");
    }

    #[test]
    fn upload_names_keep_simple_extensions() {
        assert!(upload_name(Some("a.mp3")).ends_with(".mp3"));
        assert!(!upload_name(Some("a.m p3")).contains('.'));
        assert_eq!(upload_name(None).len(), 36);
    }
}

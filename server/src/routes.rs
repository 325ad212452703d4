//! HTTP handlers.

use std::io;
use std::path::Path;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use mirrortv_capture::{suggest, WindowCandidate, DEFAULT_SUGGESTION_LIMIT};
use mirrortv_encoder::MAX_CLIENT_ID_BYTES;
use mirrortv_ipc::{ClientId, ErrorKind, ErrorRecord, StartRequest, WindowInfo, WindowSuggestion};
use mirrortv_playback::{FileManifestSource, ReadinessGate};

use crate::error::ApiError;
use crate::events::sse_handler;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Build the application router. Anything not matched is served from
/// `public_dir`.
pub fn router(state: AppState, public_dir: &Path) -> Router {
    Router::new()
        .route("/api/windows", get(list_windows))
        .route("/api/windows/suggest", get(suggest_windows))
        .route("/api/client-id", get(new_client_id))
        .route("/api/stream/start", post(start_stream))
        .route("/api/stream/stop", post(stop_stream))
        .route("/api/stream/status/{client_id}", get(stream_status))
        .route("/api/stream/ready/{client_id}", get(stream_ready))
        .route("/api/streams/all", get(all_streams))
        .route("/api/streams/stop-all", post(stop_all_streams))
        .route("/api/errors", get(list_errors))
        .route("/api/errors/clear", post(clear_errors))
        .route("/api/events", get(sse_handler))
        .route("/stream/{client_id}/{file}", get(stream_file))
        .with_state(state)
        .fallback_service(ServeDir::new(public_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run blocking engine or OS work off the async runtime.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("Worker task failed: {e}")))
}

async fn list_windows(State(state): State<AppState>) -> ApiResult<Json<Vec<WindowInfo>>> {
    let windows = state.windows.clone();
    match blocking(move || windows.list_windows()).await? {
        Ok(list) => Ok(Json(list.iter().map(WindowCandidate::to_window_info).collect())),
        Err(e) => {
            warn!("Error fetching windows: {}", e);
            state.error_log.append(ErrorRecord::new(
                ErrorKind::WindowEnumeration,
                format!("Failed to fetch windows: {e}"),
                None,
            ));
            Err(ApiError::internal("Failed to fetch windows"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SuggestQuery {
    target: String,
    limit: Option<usize>,
}

async fn suggest_windows(
    State(state): State<AppState>,
    Query(query): Query<SuggestQuery>,
) -> ApiResult<Json<Vec<WindowSuggestion>>> {
    let windows = state.windows.clone();
    let limit = query.limit.unwrap_or(DEFAULT_SUGGESTION_LIMIT);
    let suggestions = blocking(move || {
        let candidates = windows.list_windows_or_empty();
        suggest(&query.target, &candidates, limit)
    })
    .await?;
    Ok(Json(suggestions))
}

async fn new_client_id() -> Json<Value> {
    Json(json!({ "clientId": Uuid::new_v4().to_string() }))
}

/// Body of a start request. Fields are optional here so a missing id is
/// reported as a 400 with a readable message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBody {
    client_id: Option<String>,
    window_title: Option<String>,
    window_id: Option<String>,
    display_label: Option<String>,
}

#[instrument(name = "http_start_stream", skip(state, body))]
async fn start_stream(
    State(state): State<AppState>,
    Json(body): Json<StartBody>,
) -> ApiResult<Json<Value>> {
    let client_id = required(body.client_id, "Client ID is required")?;
    let window_title = required(body.window_title, "Window title is required")?;

    let request = StartRequest {
        client_id: ClientId::new(client_id),
        window_title,
        window_id: body.window_id,
        display_label: body.display_label,
    };
    info!(client_id = %request.client_id, window = %request.window_title, "Start requested");

    let engine = state.engine.clone();
    let session = blocking(move || engine.start(request)).await??;

    Ok(Json(json!({
        "success": true,
        "message": "Stream started",
        "clientId": session.client_id,
        "session": session,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopBody {
    client_id: Option<String>,
}

#[instrument(name = "http_stop_stream", skip(state, body))]
async fn stop_stream(
    State(state): State<AppState>,
    Json(body): Json<StopBody>,
) -> ApiResult<Json<Value>> {
    let client_id = ClientId::new(required(body.client_id, "Client ID is required")?);

    let engine = state.engine.clone();
    blocking(move || engine.stop(&client_id)).await??;

    Ok(Json(json!({ "success": true, "message": "Stream stopped" })))
}

async fn stream_status(
    State(state): State<AppState>,
    UrlPath(client_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let client_id = ClientId::new(client_id);
    let engine = state.engine.clone();
    let session = blocking(move || engine.session(&client_id)).await??;

    Ok(Json(json!({
        "isActive": session.is_some(),
        "session": session,
    })))
}

/// Wait until the client's stream is worth handing to a player.
#[instrument(name = "http_stream_ready", skip(state))]
async fn stream_ready(
    State(state): State<AppState>,
    UrlPath(client_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let client_id = ClientId::new(client_id);
    if client_id.as_str().len() > MAX_CLIENT_ID_BYTES {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "No stream for this client"));
    }

    let playlist_url = stream_url(&client_id, &state.playlist_name)?;
    let source = FileManifestSource::new(state.playlist_path(&client_id));
    let gate = ReadinessGate::new(source, state.readiness.clone());

    let readiness = blocking(move || {
        let policy = gate.policy().clone();
        gate.wait_with(|progress| debug!("{}", progress.message(&policy)))
    })
    .await??;

    Ok(Json(json!({
        "ready": true,
        "playlistUrl": playlist_url,
        "readiness": readiness,
    })))
}

/// Path of a file under `/stream/{client_id}/`, with each segment
/// percent-encoded.
fn stream_url(client_id: &ClientId, file: &str) -> ApiResult<String> {
    let mut url = Url::parse("http://localhost/")
        .map_err(|e| ApiError::internal(format!("Failed to build stream URL: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ApiError::internal("Failed to build stream URL"))?
        .pop_if_empty()
        .extend(["stream", client_id.as_str(), file]);
    Ok(url.path().to_string())
}

async fn all_streams(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let engine = state.engine.clone();
    let roster = blocking(move || engine.list_active()).await??;
    Ok(Json(roster))
}

async fn stop_all_streams(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let engine = state.engine.clone();
    let count = blocking(move || engine.stop_all()).await??;

    Ok(Json(json!({
        "success": true,
        "message": format!("Stopped {count} stream(s)"),
        "count": count,
    })))
}

async fn list_errors(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.error_log.snapshot())
}

async fn clear_errors(State(state): State<AppState>) -> Json<Value> {
    state.error_log.clear();
    Json(json!({ "success": true, "message": "Error log cleared" }))
}

/// Serve a manifest or segment from a client's output directory.
async fn stream_file(
    State(state): State<AppState>,
    UrlPath((client_id, file)): UrlPath<(String, String)>,
) -> Response {
    if !is_plain_file_name(&file) || client_id.len() > MAX_CLIENT_ID_BYTES {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state.session_dir(&ClientId::new(client_id)).join(&file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, content_type(&file)),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(path = %path.display(), "Failed to read stream file: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn required(value: Option<String>, message: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(message))
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

fn content_type(file: &str) -> &'static str {
    match Path::new(file).extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use mirrortv_capture::{StaticWindowSource, WindowSource};
    use mirrortv_encoder::EncoderConfig;
    use mirrortv_engine::{spawn_engine, EngineConfig, ErrorLog};
    use mirrortv_playback::ReadinessPolicy;

    fn setup() -> (AppState, Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let stream_root = dir.path().join("stream");
        let config = EngineConfig {
            stream_root: stream_root.clone(),
            encoder: EncoderConfig::custom("/nonexistent/mirrortv-encoder", Vec::new()),
            ..Default::default()
        };
        let windows: Arc<dyn WindowSource> = Arc::new(StaticWindowSource::from_titles([
            "Foo - Bar (1)",
            "YouTube - Cats Video",
        ]));
        let error_log = Arc::new(ErrorLog::in_memory());
        let (engine, _thread) =
            spawn_engine(config, Arc::clone(&windows), Arc::clone(&error_log)).unwrap();

        let state = AppState {
            engine,
            windows,
            error_log,
            stream_root: Arc::new(stream_root),
            playlist_name: "playlist.m3u8".into(),
            readiness: ReadinessPolicy {
                max_attempts: 2,
                retry_interval: Duration::from_millis(10),
                buffer_poll_interval: Duration::from_millis(10),
                buffer_ceiling: Duration::from_millis(50),
                ..Default::default()
            },
        };
        let app = router(state.clone(), &PathBuf::from(dir.path()));
        (state, app, dir)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_client_id_is_uuid() {
        let (_state, app, _dir) = setup();
        let (status, json) = send(&app, get_req("/api/client-id")).await;

        assert_eq!(status, StatusCode::OK);
        let id = json["clientId"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_windows_lists_source() {
        let (_state, app, _dir) = setup();
        let (status, json) = send(&app, get_req("/api/windows")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().map(Vec::len), Some(2));
        assert_eq!(json[0]["title"], "Foo - Bar (1)");
    }

    #[tokio::test]
    async fn test_suggest_ranks_by_overlap() {
        let (_state, app, _dir) = setup();
        let (status, json) =
            send(&app, get_req("/api/windows/suggest?target=cats%20music%20video")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["title"], "YouTube - Cats Video");
    }

    #[tokio::test]
    async fn test_start_requires_client_id() {
        let (_state, app, _dir) = setup();
        let (status, json) = send(
            &app,
            post_json("/api/stream/start", json!({ "windowTitle": "Foo" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Client ID is required");
    }

    #[tokio::test]
    async fn test_start_unknown_window_returns_suggestions() {
        let (state, app, _dir) = setup();
        let (status, json) = send(
            &app,
            post_json(
                "/api/stream/start",
                json!({ "clientId": "a", "windowTitle": "Cats Playlist Music Radio" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["suggestions"][0]["title"], "YouTube - Cats Video");
        assert_eq!(state.error_log.len(), 1);
    }

    #[tokio::test]
    async fn test_start_with_missing_encoder_is_500() {
        let (_state, app, _dir) = setup();
        let (status, json) = send(
            &app,
            post_json("/api/stream/start", json!({ "clientId": "a", "windowTitle": "Bar" })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("Failed to start encoder"));
    }

    #[tokio::test]
    async fn test_stop_unknown_client_is_404() {
        let (_state, app, _dir) = setup();
        let (status, _) = send(&app, post_json("/api/stream/stop", json!({ "clientId": "ghost" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, post_json("/api/stream/stop", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_and_roster_when_idle() {
        let (_state, app, _dir) = setup();

        let (status, json) = send(&app, get_req("/api/stream/status/a")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["isActive"], false);

        let (_, json) = send(&app, get_req("/api/streams/all")).await;
        assert_eq!(json["total"], 0);
        assert_eq!(json["max"], 10);

        let (_, json) = send(&app, post_json("/api/streams/stop-all", json!({}))).await;
        assert_eq!(json["count"], 0);
    }

    #[tokio::test]
    async fn test_errors_can_be_cleared() {
        let (state, app, _dir) = setup();
        state
            .error_log
            .append(ErrorRecord::new(ErrorKind::SpawnFailed, "boom", None));

        let (_, json) = send(&app, get_req("/api/errors")).await;
        assert_eq!(json["errors"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["errors"][0]["type"], "SpawnFailed");

        let (status, _) = send(&app, post_json("/api/errors/clear", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.error_log.is_empty());
    }

    #[tokio::test]
    async fn test_stream_file_content_types() {
        let (state, app, _dir) = setup();
        let client = ClientId::from("client-1");
        let dir = state.session_dir(&client);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("playlist.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(dir.join("segment_000.ts"), [0x47u8; 188]).unwrap();

        let response = app
            .clone()
            .oneshot(get_req("/stream/client-1/playlist.m3u8"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/vnd.apple.mpegurl"
        );

        let response = app
            .clone()
            .oneshot(get_req("/stream/client-1/segment_000.ts"))
            .await
            .unwrap();
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp2t");

        let (status, _) = send(&app, get_req("/stream/client-1/missing.ts")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, get_req("/stream/client-1/..")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ready_times_out_without_manifest() {
        let (_state, app, _dir) = setup();
        let (status, json) = send(&app, get_req("/api/stream/ready/nobody")).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["attempts"], 2);
    }

    #[tokio::test]
    async fn test_ready_reports_playable_manifest() {
        let (state, app, _dir) = setup();
        let client = ClientId::from("client-1");
        std::fs::create_dir_all(state.session_dir(&client)).unwrap();
        std::fs::write(
            state.playlist_path(&client),
            "#EXTM3U\n#EXTINF:1.0,\na.ts\n#EXTINF:1.5,\nb.ts\n",
        )
        .unwrap();

        let (status, json) = send(&app, get_req("/api/stream/ready/client-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["playlistUrl"], "/stream/client-1/playlist.m3u8");
        assert_eq!(json["readiness"]["ceilingReached"], false);
    }

    #[tokio::test]
    async fn test_ready_encodes_client_id_in_playlist_url() {
        let (state, app, _dir) = setup();
        let client = ClientId::from("a b/c?d");
        std::fs::create_dir_all(state.session_dir(&client)).unwrap();
        std::fs::write(
            state.playlist_path(&client),
            "#EXTM3U\n#EXTINF:2.0,\na.ts\n",
        )
        .unwrap();

        let (status, json) = send(&app, get_req("/api/stream/ready/a%20b%2Fc%3Fd")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["playlistUrl"], "/stream/a%20b%2Fc%3Fd/playlist.m3u8");
    }

    #[tokio::test]
    async fn test_overlong_client_id_has_no_stream() {
        let (_state, app, _dir) = setup();
        let long_id = "x".repeat(MAX_CLIENT_ID_BYTES + 1);

        let (status, _) = send(&app, get_req(&format!("/api/stream/ready/{long_id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get_req(&format!("/stream/{long_id}/playlist.m3u8"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(
            &app,
            post_json("/api/stream/start", json!({ "clientId": long_id, "windowTitle": "Bar" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("clientId"));
    }
}

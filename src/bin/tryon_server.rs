//! Try-on server: streams the camera as MJPEG with the selected garment
//! composited onto the detected torso, and exposes the selection API.
//!
//! Routes: GET /video_feed, POST /try_on, GET /clothes_images/{filename}.

use std::convert::Infallible;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use kisekae_mirror::camera::OpenCvCamera;
use kisekae_mirror::config::Config;
use kisekae_mirror::pose::PoseDetector;
use kisekae_mirror::stream::{self, Selection, StreamOptions, MJPEG_CONTENT_TYPE};

const CONFIG_PATH: &str = "tryon_server.toml";

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

type LogFile = Arc<Mutex<std::io::BufWriter<std::fs::File>>>;

fn open_log_file() -> Result<LogFile> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = format!("logs/tryon_{}.log", ts);
    let file = std::fs::File::create(&path)?;
    eprintln!("Log: {}", path);
    Ok(Arc::new(Mutex::new(std::io::BufWriter::new(file))))
}

macro_rules! log {
    ($logfile:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        eprintln!("{}", msg);
        if let Ok(mut f) = $logfile.lock() {
            let _ = writeln!(f, "{}", msg);
            let _ = f.flush();
        }
    }};
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    selection: Selection,
    logfile: LogFile,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// MJPEG配信。クライアントごとに専用のキャプチャスレッドを立てる。
async fn video_feed(State(state): State<AppState>) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(4);

    let config = state.config.clone();
    let selection = state.selection.clone();
    let logfile = state.logfile.clone();

    // OpenCV/ortのブロッキング呼び出しはtokioランタイムの外で回す
    std::thread::spawn(move || {
        log!(logfile, "[stream] client connected");
        match stream_worker(&config, &selection, tx) {
            Ok(()) => log!(logfile, "[stream] client disconnected"),
            Err(e) => log!(logfile, "[stream] worker failed: {e:#}"),
        }
    });

    (
        [(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

fn stream_worker(
    config: &Config,
    selection: &Selection,
    tx: tokio::sync::mpsc::Sender<Result<Bytes, Infallible>>,
) -> Result<()> {
    let mut camera = OpenCvCamera::open(
        config.camera.index,
        config.camera.width,
        config.camera.height,
    )?;
    let mut detector = PoseDetector::new(&config.pose.model)?;
    let opts = StreamOptions {
        mirror: config.camera.mirror,
        jpeg_quality: config.stream.jpeg_quality,
        min_confidence: config.pose.min_confidence,
    };

    stream::run_stream(
        &mut camera,
        &mut detector,
        selection,
        Path::new(&config.stream.clothes_dir),
        &opts,
        // 送信失敗 = クライアント切断。ループを終わらせてカメラを解放する
        |chunk| tx.blocking_send(Ok(Bytes::from(chunk))).is_ok(),
    )
}

#[derive(Debug, Deserialize)]
struct TryOnRequest {
    cloth_filename: Option<String>,
}

/// 服の選択。名前が無い・空のリクエストは400で拒否する。
async fn try_on(State(state): State<AppState>, Json(req): Json<TryOnRequest>) -> Response {
    let Some(name) = req.cloth_filename else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "cloth_filename required"})),
        )
            .into_response();
    };

    match state.selection.select(&name) {
        Ok(()) => {
            log!(state.logfile, "[select] {}", name);
            Json(json!({"message": format!("Selected {} for try-on", name)})).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// 服画像サムネイルの配信
async fn serve_cloth_image(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Response {
    // パストラバーサル対策
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    }

    let path = Path::new(&state.config.stream.clothes_dir).join(&filename);
    match tokio::fs::read(&path).await {
        Ok(data) => {
            let mime = match path.extension().and_then(|e| e.to_str()) {
                Some("png") => "image/png",
                Some("jpg") | Some("jpeg") => "image/jpeg",
                Some("webp") => "image/webp",
                _ => "application/octet-stream",
            };
            ([(header::CONTENT_TYPE, mime)], data).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH);
    let logfile = open_log_file()?;
    log!(logfile, "Try-On Server ({})", env!("GIT_VERSION"));
    log!(
        logfile,
        "[config] listen_addr={} camera={} clothes_dir={} model={}",
        config.listen_addr,
        config.camera.index,
        config.stream.clothes_dir,
        config.pose.model
    );

    let listen_addr = config.listen_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        selection: Selection::new(),
        logfile: logfile.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/video_feed", get(video_feed))
        .route("/try_on", post(try_on))
        .route("/clothes_images/:filename", get(serve_cloth_image))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    log!(logfile, "[http] listening on {}", listen_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

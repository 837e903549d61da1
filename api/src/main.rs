use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use member_scan_camera::HttpCamera;
use member_scan_common::config::Config;
use member_scan_common::member_id::MemberId;
use member_scan_scanner::detect::{FrameDecoder, RqrrDetector};
use member_scan_scanner::session::PollTiming;
use member_scan_scanner::{MemberDb, MemberRegistry, Scanner, ScannerError};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    scanner: Scanner,
    preview_quality: u8,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /scanner
async fn get_scanner(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scanner.snapshot())
}

/// POST /scanner/toggle: open the scanner, or ask it to close.
async fn toggle_scanner(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.scanner.toggle().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(ScannerError::Transition(e)) => {
            warn!(error = %e, "toggle rejected");
            (StatusCode::CONFLICT, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "toggle failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /scanner/frame.jpg: latest annotated frame of the video panel.
async fn scanner_frame(State(state): State<Arc<AppState>>) -> Response {
    let Some(annotated) = state.scanner.latest_frame() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let quality = state.preview_quality;
    let result = tokio::task::spawn_blocking(move || annotated.frame.encode_jpeg(quality)).await;

    match result {
        Ok(Ok(jpeg)) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "preview encode failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /members?q=: the searchable member picker.
async fn search_members(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SearchQuery>,
) -> impl IntoResponse {
    Json(state.scanner.search(q.q.as_deref().unwrap_or("")))
}

/// GET /members/:member_id
async fn get_member(
    State(state): State<Arc<AppState>>,
    AxumPath(raw_id): AxumPath<String>,
) -> Response {
    match MemberId::parse(&raw_id) {
        Ok(id) => member_response(state.scanner.registry(), id).await,
        Err(e) => (StatusCode::BAD_REQUEST, format!("{raw_id}: {e}")).into_response(),
    }
}

/// GET /selected: the member chosen by the last successful scan.
async fn get_selected(State(state): State<Arc<AppState>>) -> Response {
    match state.scanner.selected_id() {
        Some(id) => member_response(state.scanner.registry(), id).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn member_response(registry: Arc<dyn MemberRegistry>, id: MemberId) -> Response {
    let result = tokio::task::spawn_blocking(move || registry.lookup(&id)).await;

    match result {
        Ok(Ok(Some(member))) => Json(member).into_response(),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "member lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/scanner", get(get_scanner))
        .route("/scanner/toggle", post(toggle_scanner))
        .route("/scanner/frame.jpg", get(scanner_frame))
        .route("/members", get(search_members))
        .route("/members/:member_id", get(get_member))
        .route("/selected", get(get_selected))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn build_scanner(config: &Config, db_path: &Path) -> Result<Scanner, String> {
    let db = MemberDb::open(db_path).map_err(|e| format!("failed to open member database: {e}"))?;
    let camera =
        HttpCamera::from_config(&config.camera).map_err(|e| format!("failed to set up camera: {e}"))?;
    let decoder = FrameDecoder::new(Box::new(RqrrDetector::new(config.scanner.max_dimension)));
    Ok(Scanner::new(
        Arc::new(camera),
        decoder,
        Arc::new(db),
        PollTiming::from(&config.scanner),
    ))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera_url = config.camera.url,
        camera_mode = config.camera.mode,
        db = config.database.path,
        poll_ms = config.scanner.poll_interval_ms,
        "starting member scanner"
    );

    let scanner = build_scanner(&config, Path::new(&config.database.path)).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });
    if let Err(e) = scanner.refresh_index().await {
        // The picker stays empty; scans still resolve against the registry.
        error!(error = %e, "failed to load member index");
    }

    let state = Arc::new(AppState {
        scanner,
        preview_quality: config.scanner.preview_quality,
    });
    let app = router(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr, "member scanner API starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "API server error");
    }

    state.scanner.shutdown().await;
}

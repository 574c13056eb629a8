//! # HTTP Façade
//!
//! A thin axum adapter over the core: session identity rides on an opaque
//! `session_id` cookie, uploads run per-file with partial success,
//! analysis/transform/export endpoints delegate straight to the kernels,
//! and the XAS routes operate on the process-singleton project handle.
//!
//! The façade owns exactly two long-lived pieces of state: the session
//! manager and the optional open project, both inside [`AppState`]. A
//! single background task reaps expired sessions at the configured
//! cadence.

use std::sync::{Arc, Mutex};

use axum::http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::session::{SessionManager, SessionState};
use crate::xas::store::BeamlineConfig;
use crate::xas::XasProject;

mod echem;
mod error;
mod xas;

pub use error::ApiError;

/// Cookie carrying the session identity.
pub const SESSION_COOKIE: &str = "session_id";

/// The open project together with the beamline preset it was opened for.
pub struct OpenProject {
    /// The project database handle
    pub project: XasProject,
    /// Channel layout used for every store access
    pub beamline: BeamlineConfig,
}

/// Shared server state.
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Session registry
    pub sessions: Arc<SessionManager>,
    /// The open XAS project; opening a new one replaces (closes) the old
    pub project: Mutex<Option<OpenProject>>,
}

impl AppState {
    /// Build state from a config.
    pub fn new(config: AppConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(config.session_limits()));
        Self { config, sessions, project: Mutex::new(None) }
    }
}

/// Resolve (or mint) the caller's session from the cookie header.
pub(crate) fn resolve_session(
    state: &AppState,
    headers: &HeaderMap,
) -> (String, Arc<Mutex<SessionState>>) {
    let presented = cookie_value(headers, SESSION_COOKIE);
    state.sessions.get_or_create(presented.as_deref())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Attach the session cookie to a response (`Max-Age` = TTL, `HttpOnly`,
/// `SameSite=Lax`).
pub(crate) fn with_session_cookie(
    state: &AppState,
    session_id: &str,
    response: impl IntoResponse,
) -> Response {
    let max_age = state.sessions.limits().ttl.num_seconds();
    let cookie =
        format!("{SESSION_COOKIE}={session_id}; Max-Age={max_age}; Path=/; HttpOnly; SameSite=Lax");
    let mut response = response.into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

/// Build the router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/session", get(echem::session_info).delete(echem::delete_session))
        .route("/api/admin/stats", get(echem::admin_stats))
        .route("/api/upload", post(echem::upload))
        .route("/api/files", get(echem::list_files))
        .route("/api/files/:filename", get(echem::file_data).delete(echem::delete_file))
        .route("/api/files/:filename/metadata", patch(echem::update_metadata))
        .route("/api/files/:filename/analysis", post(echem::analyze))
        .route("/api/files/:filename/transform", post(echem::transform))
        .route("/api/export", post(echem::export_session))
        .route("/api/import", post(echem::import_session))
        .route("/api/plot-code", post(echem::plot_code))
        .route("/api/xas/project/open", post(xas::open_project))
        .route("/api/xas/project", get(xas::project_summary).delete(xas::close_project))
        .route("/api/xas/datasets", get(xas::list_datasets))
        .route("/api/xas/channels", post(xas::channels))
        .route("/api/xas/direct", post(xas::direct_read))
        .route("/api/xas/expression", post(xas::evaluate))
        .route("/api/xas/valid-scans", post(xas::valid_scans))
        .route("/api/xas/normalize", post(xas::normalize))
        .route("/api/xas/scan-params", post(xas::upsert_scan_params))
        .route("/api/xas/average", post(xas::average))
        .route("/api/xas/derivative", post(xas::derivative))
        .route("/api/xas/peakfit", post(xas::peakfit))
        .route("/api/xas/rois", get(xas::list_rois).post(xas::upsert_roi))
        .route("/api/xas/rois/:name", delete(xas::delete_roi))
        .route("/api/xas/references", get(xas::list_references).post(xas::upsert_reference))
        .route("/api/xas/references/:name", delete(xas::delete_reference))
        .route("/api/xas/codegen", post(xas::codegen_script))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Run the server until shutdown, with the background session reaper.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let bind = config.bind_address.clone();
    let cleanup_interval = config.session.cleanup_interval_min;
    let state = Arc::new(AppState::new(config));

    // Single cooperative reaper task; unique by construction.
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(cleanup_interval.max(1) * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            sessions.cleanup_expired();
        }
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; session_id=abc-123; other=1"),
        );
        assert_eq!(cookie_value(&headers, SESSION_COOKIE).as_deref(), Some("abc-123"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn cookie_attributes() {
        let state = AppState::new(AppConfig::default());
        let response = with_session_cookie(&state, "abc", "ok");
        let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("session_id=abc"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=86400"));
    }
}

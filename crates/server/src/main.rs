use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use integrations::HttpDeviceStore;
use server_api::{authenticate_scan, control_device, office_access, read_device, ApiContext};
use shared::{
    domain::DeviceId,
    error::{ApiError, ErrorCode},
    protocol::{
        DeviceControlRequest, DeviceControlResponse, DeviceStateResponse, OfficeAccessRequest,
        OfficeAccessResponse, ScanAuthRequest, ScanAuthResponse,
    },
    transport::{login_cookies, TransportSession},
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod guard;

use crate::config::load_settings;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

type ApiFailure = (StatusCode, Json<ApiError>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings(None)?;
    let devices = HttpDeviceStore::new(settings.device_store()).map_err(|error| {
        error!(url = %settings.device_store_url, %error, "invalid device store configuration");
        error
    })?;
    let api = ApiContext {
        devices: Arc::new(devices),
        credential: settings.credential(),
        token: settings.token(),
    };
    let app = build_router(Arc::new(AppState { api }), settings.body_limit_bytes);

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(landing_page))
        .route("/auth", get(auth_page))
        .route("/dashboard", get(dashboard_page))
        .route("/controls", get(controls_page))
        .route("/api/auth", post(http_authenticate_scan))
        .route("/api/auth/office-access", post(http_office_access))
        .route("/api/devices/control", post(http_control_device))
        .route("/api/devices/:device", get(http_read_device))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(middleware::from_fn(guard::route_guard))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn landing_page() -> Html<&'static str> {
    Html("<h1>VoiceOps</h1><p><a href=\"/auth\">Scan to sign in</a></p>")
}

async fn auth_page() -> Html<&'static str> {
    Html("<h1>Sign in</h1><p>Hold your access code up to the camera.</p>")
}

async fn dashboard_page(headers: HeaderMap) -> Html<String> {
    let session = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(TransportSession::from_cookie_header)
        .unwrap_or_default();
    let user = session.user.unwrap_or_default();
    Html(format!("<h1>Dashboard</h1><p>Signed in as {}</p>", escape_html(&user)))
}

async fn controls_page() -> Html<&'static str> {
    Html("<h1>Controls</h1><p>fan, lights, party, buzzer, servo</p>")
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn http_authenticate_scan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanAuthRequest>,
) -> Result<(HeaderMap, Json<ScanAuthResponse>), ApiFailure> {
    let response = authenticate_scan(&state.api, &req)
        .await
        .map_err(api_failure)?;

    let mut headers = HeaderMap::new();
    for cookie in login_cookies(&response.user, response.expires_at, Utc::now()) {
        let value = HeaderValue::from_str(&cookie).map_err(|e| {
            api_failure(ApiError::new(ErrorCode::Internal, e.to_string()))
        })?;
        headers.append(header::SET_COOKIE, value);
    }
    Ok((headers, Json(response)))
}

async fn http_office_access(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OfficeAccessRequest>,
) -> Result<Json<OfficeAccessResponse>, ApiFailure> {
    let response = office_access(&state.api, &req)
        .await
        .map_err(api_failure)?;
    Ok(Json(response))
}

async fn http_control_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceControlRequest>,
) -> Result<Json<DeviceControlResponse>, ApiFailure> {
    let response = control_device(&state.api, &req)
        .await
        .map_err(api_failure)?;
    Ok(Json(response))
}

async fn http_read_device(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
) -> Result<Json<DeviceStateResponse>, ApiFailure> {
    let response = read_device(&state.api, DeviceId::new(device))
        .await
        .map_err(api_failure)?;
    Ok(Json(response))
}

fn api_failure(err: ApiError) -> ApiFailure {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unavailable => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

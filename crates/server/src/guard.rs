//! Per-request session check. Reads only the transport cookies; the durable
//! record never reaches the server.

use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use shared::{error::ApiError, transport::TransportSession};
use tracing::debug;

pub const AUTH_PAGE: &str = "/auth";
pub const HOME_PAGE: &str = "/dashboard";

const PUBLIC_PAGES: [&str; 2] = ["/", AUTH_PAGE];
const PUBLIC_API_PREFIX: &str = "/api/auth";
const PROTECTED_PAGE_PREFIXES: [&str; 2] = ["/dashboard", "/controls"];
const API_PREFIX: &str = "/api/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    PublicPage,
    PublicApi,
    ProtectedPage,
    ProtectedApi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Pass,
    Redirect(String),
    Reject,
}

/// First matching rule wins; public rules are checked before protected ones.
/// Paths matching nothing are treated as public pages.
pub fn classify(path: &str) -> RouteClass {
    if PUBLIC_PAGES.contains(&path) {
        RouteClass::PublicPage
    } else if path.starts_with(PUBLIC_API_PREFIX) {
        RouteClass::PublicApi
    } else if path.starts_with(API_PREFIX) {
        RouteClass::ProtectedApi
    } else if PROTECTED_PAGE_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        RouteClass::ProtectedPage
    } else {
        RouteClass::PublicPage
    }
}

pub fn decide(path: &str, session: &TransportSession) -> GuardDecision {
    let authenticated = session.is_authenticated();
    if path == AUTH_PAGE && authenticated {
        return GuardDecision::Redirect(HOME_PAGE.to_string());
    }
    match classify(path) {
        RouteClass::PublicPage | RouteClass::PublicApi => GuardDecision::Pass,
        _ if authenticated => GuardDecision::Pass,
        RouteClass::ProtectedApi => GuardDecision::Reject,
        RouteClass::ProtectedPage => GuardDecision::Redirect(login_redirect(path)),
    }
}

fn login_redirect(path: &str) -> String {
    let target = path.replace('%', "%25").replace('&', "%26").replace('+', "%2B");
    format!("{AUTH_PAGE}?redirect={target}")
}

fn session_from_headers(headers: &HeaderMap) -> TransportSession {
    let joined = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    TransportSession::from_cookie_header(&joined)
}

pub async fn route_guard(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let session = session_from_headers(request.headers());
    match decide(&path, &session) {
        GuardDecision::Pass => next.run(request).await,
        GuardDecision::Redirect(location) => {
            debug!(%path, %location, "guard redirect");
            Redirect::temporary(&location).into_response()
        }
        GuardDecision::Reject => {
            debug!(%path, "guard rejected unauthenticated api call");
            (StatusCode::UNAUTHORIZED, Json(ApiError::auth_required())).into_response()
        }
    }
}

#[cfg(test)]
#[path = "tests/guard_tests.rs"]
mod tests;

//! Cross-cutting request layers: logging, security headers, sessions and
//! panic recovery.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::errors::{status_text, AppError, ServerErrorReport, ServerFault};
use crate::routes::AppState;
use crate::session::{token_from_cookie_header, Session};

/// Log every request and every server error it produced. In debug mode the
/// error detail and trace replace the generic 500 body.
pub async fn log_request(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.to_string())
        .unwrap_or_else(|| "-".to_string());
    let proto = format!("{:?}", req.version());
    let method = req.method().clone();
    let uri = req.uri().clone();

    log::info!(
        "received request ip={} proto={} method={} uri={}",
        ip,
        proto,
        method,
        uri
    );

    let mut response = next.run(req).await;

    if let Some(report) = response.extensions_mut().remove::<ServerErrorReport>() {
        log::error!(
            "{} method={} uri={} trace={}",
            report.message,
            method,
            uri,
            report.trace
        );
        if state.config.debug {
            response.headers_mut().remove(header::CONTENT_LENGTH);
            *response.body_mut() = Body::from(format!("{}\n{}", report.message, report.trace));
        }
    }

    response
}

pub async fn common_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; style-src 'self' fonts.googleapis.com; font-src fonts.gstatic.com",
        ),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("origin-when-cross-origin"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("deny"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("0"));
    headers.insert(header::SERVER, HeaderValue::from_static("memobin"));
    response
}

/// Attach a [`Session`] to the request and send the cookie back if the token
/// was issued or renewed while handling it.
pub async fn load_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(token_from_cookie_header);

    let session = Session::new(state.sessions.clone(), token);
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    if let Some(cookie) = session.pending_cookie() {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => log::warn!("Dropping unencodable session cookie: {}", e),
        }
    }
    response
}

/// Turn a handler panic into a 500 with `Connection: close`. The report is
/// logged by [`log_request`] like any other server error.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    let mut response = AppError::server(ServerFault::Panic(detail)).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Fallback for unmatched routes.
pub async fn not_found() -> impl IntoResponse {
    status_text(StatusCode::NOT_FOUND)
}

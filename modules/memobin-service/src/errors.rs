//! Request-level error taxonomy and its mapping onto HTTP responses.
//!
//! Client errors answer with a bare status text. Server errors answer 500
//! and attach a [`ServerErrorReport`] to the response so the request logger,
//! which knows the method and URI, can log it.

use std::backtrace::Backtrace;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::db::DbError;
use crate::decoder::DecodeError;
use crate::session::SessionError;
use crate::templates::TemplateError;

#[derive(Debug, Error)]
pub enum ServerFault {
    #[error(transparent)]
    Database(DbError),

    #[error(transparent)]
    Template(TemplateError),

    #[error(transparent)]
    Session(SessionError),

    #[error(transparent)]
    Decoder(DecodeError),

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("blocking task failed: {0}")]
    Blocking(tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(DecodeError),

    /// The form's CSRF token is missing or does not match the session's.
    #[error("missing or mismatched CSRF token")]
    InvalidCsrfToken,

    #[error("not found")]
    NotFound,

    #[error("{fault}")]
    Server { fault: ServerFault, trace: String },
}

impl AppError {
    pub fn server(fault: ServerFault) -> Self {
        AppError::Server {
            fault,
            trace: Backtrace::force_capture().to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::InvalidCsrfToken => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Server { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NoRecord => AppError::NotFound,
            other => AppError::server(ServerFault::Database(other)),
        }
    }
}

impl From<DecodeError> for AppError {
    fn from(e: DecodeError) -> Self {
        if e.is_client_error() {
            AppError::BadRequest(e)
        } else {
            AppError::server(ServerFault::Decoder(e))
        }
    }
}

impl From<TemplateError> for AppError {
    fn from(e: TemplateError) -> Self {
        AppError::server(ServerFault::Template(e))
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::server(ServerFault::Session(e))
    }
}

/// Detail of a 500 response, carried in the response extensions.
#[derive(Debug, Clone)]
pub struct ServerErrorReport {
    pub message: String,
    pub trace: String,
}

/// Plain-text response carrying only the canonical reason phrase.
pub fn status_text(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or("Error")).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::Server { fault, trace } => {
                let mut response = status_text(status);
                response.extensions_mut().insert(ServerErrorReport {
                    message: fault.to_string(),
                    trace,
                });
                response
            }
            _ => status_text(status),
        }
    }
}

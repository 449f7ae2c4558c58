use std::convert::Infallible;

use bytes::Bytes;
use cca_selection_config::ConfigError;
use cca_selection_database::DatabaseError;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response, StatusCode};
use http_body_util::Full;
use tracing::{debug, error};

use crate::admission::ImportError;
use crate::confirmation::ConfirmError;
use crate::ledger::LedgerError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    File(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("webserver error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("http error: {0}")]
    Http(#[from] http::Error),
    #[error("request body error: {0}")]
    Body(Box<dyn std::error::Error + Send + Sync>),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Import(#[from] ImportError),
    #[error("{0}")]
    Confirm(#[from] ConfirmError),
    #[error("not logged in")]
    NoSession,
    #[error("session expired, please log in again")]
    UnknownSession,
    #[error("only staff may do this")]
    StaffOnly,
    #[error("only students may do this")]
    StudentsOnly,
    #[error("course selections are closed")]
    SelectionsClosed,
    #[error("expected a websocket upgrade request")]
    NotWebSocket,
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl From<Infallible> for AppError {
    fn from(value: Infallible) -> Self {
        match value {}
    }
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Json(_) | Self::Body(_) | Self::NotWebSocket => StatusCode::BAD_REQUEST,
            Self::Import(ImportError::DuplicateCourse(_) | ImportError::UnknownGroup { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::NoSession
            | Self::UnknownSession
            | Self::Confirm(ConfirmError::UnknownUser(_)) => StatusCode::UNAUTHORIZED,
            Self::StaffOnly | Self::StudentsOnly => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::SelectionsClosed
            | Self::Import(ImportError::NotClosed)
            | Self::Confirm(ConfirmError::SelectionsClosed | ConfirmError::Unmet { .. }) => {
                StatusCode::CONFLICT
            }
            Self::File(_)
            | Self::Hyper(_)
            | Self::Http(_)
            | Self::Config(_)
            | Self::Database(_)
            | Self::Ledger(_)
            | Self::Import(ImportError::Ledger(_))
            | Self::Confirm(ConfirmError::Ledger(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain text error response. Server side failures are logged and not detailed
    /// to the client.
    #[must_use]
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error".to_owned()
        } else {
            debug!(error = %self, %status, "request rejected");
            self.to_string()
        };
        let mut response = Response::new(Full::new(Bytes::from(message)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

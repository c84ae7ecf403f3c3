use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to read request body: {0}")]
    InvalidBody(String),

    #[error("missing `{0}` field in form data")]
    MissingField(&'static str),

    #[error("invalid `epoch` field value '{0}' in form data, only `s` is supported")]
    InvalidEpoch(String),

    #[error("invalid query format: {0}")]
    InvalidQueryFormat(String),

    #[error("failed to query upstream: {0}")]
    UpstreamQueryFailed(String),

    #[error("upstream query returned {0} series, expected at most one")]
    AmbiguousResult(usize),

    #[error("upstream response was not a scalar or vector, actual type: {0}")]
    UnsupportedResultType(String),

    #[error("failed to encode response: {0}")]
    EncodingFailed(String),

    #[error("upstream unavailable: {0}")]
    Proxy(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidBody(_)
            | ServiceError::MissingField(_)
            | ServiceError::InvalidEpoch(_)
            | ServiceError::InvalidQueryFormat(_) => StatusCode::BAD_REQUEST,
            ServiceError::UpstreamQueryFailed(_)
            | ServiceError::AmbiguousResult(_)
            | ServiceError::UnsupportedResultType(_)
            | ServiceError::EncodingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Proxy(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        if !self.is_client_error() {
            error!(error = %self, %status, "request failed");
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{self}\n"),
        )
            .into_response()
    }
}

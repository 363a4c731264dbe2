//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bcd_core::{BcdError, ErrorKind};
use tracing::{error, warn};

use super::types::ErrorResponse;

/// An error rendered as `{"detail": ...}` with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Message placed in `detail`.
    pub detail: String,
}

impl ApiError {
    /// Error with an explicit status.
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// `500 Internal Server Error`.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl From<BcdError> for ApiError {
    fn from(err: BcdError) -> Self {
        let status = match err.kind() {
            ErrorKind::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::State => StatusCode::BAD_REQUEST,
            ErrorKind::Initialization | ErrorKind::Input | ErrorKind::Computation => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, detail = %self.detail, "request failed");
        } else {
            warn!(status = %self.status, detail = %self.detail, "request rejected");
        }
        (self.status, Json(ErrorResponse { detail: self.detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (BcdError::not_initialized("no weights"), StatusCode::SERVICE_UNAVAILABLE),
            (BcdError::state("no session"), StatusCode::BAD_REQUEST),
            (BcdError::input("bad image"), StatusCode::INTERNAL_SERVER_ERROR),
            (BcdError::computation("nan"), StatusCode::INTERNAL_SERVER_ERROR),
            (BcdError::initialization("checksum"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let message = err.to_string();
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.detail, message);
        }
    }
}

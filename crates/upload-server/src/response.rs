use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use chunkyard_transfer::{ErrorClass, TransferError};

/// Error returned by the request handlers, rendered as a plain-text body.
#[derive(Debug)]
pub struct ApiError(pub TransferError);

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TransferError::NoActiveUpload(_) => StatusCode::NOT_FOUND,
            TransferError::SessionEnded(_) | TransferError::WritesInFlight { .. } => {
                StatusCode::CONFLICT
            }
            TransferError::PayloadRead(e) if e.kind() == io::ErrorKind::TimedOut => {
                StatusCode::REQUEST_TIMEOUT
            }
            e => match e.class() {
                ErrorClass::ClientProtocol => StatusCode::BAD_REQUEST,
                ErrorClass::Storage | ErrorClass::InternalInconsistency => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.0.to_string()).into_response()
    }
}

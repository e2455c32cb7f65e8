//! API error responses.

use axum::{
    Json,
    response::{IntoResponse, Response},
};

use crate::error::Error;

/// API error response body.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse { error: self.to_string() };
        (status, Json(body)).into_response()
    }
}

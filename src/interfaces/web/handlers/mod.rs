pub mod directories;
pub mod files;
pub mod tasks;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::core::error::CoreError;

/// Transport-boundary wrapper: maps the core's semantic errors onto HTTP
/// statuses. Handlers bubble `CoreError` up with `?`.
pub struct ApiError(pub CoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_rejection() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

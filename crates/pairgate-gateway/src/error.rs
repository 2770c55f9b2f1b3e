use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pairgate_core::PairgateError;
use tracing::{error, warn};

/// A [`PairgateError`] on its way out as an HTTP response.
///
/// The body is always `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError(pub PairgateError);

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match self.0 {
            PairgateError::NotFound(_) => StatusCode::NOT_FOUND,
            PairgateError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            PairgateError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PairgateError::Transport(_)
            | PairgateError::Config(_)
            | PairgateError::Json(_)
            | PairgateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for a 400 response.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(PairgateError::InvalidArgument(message.into()))
    }
}

impl From<PairgateError> for ApiError {
    fn from(err: PairgateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            warn!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

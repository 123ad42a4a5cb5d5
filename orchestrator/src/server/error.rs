//! Error responses

use api_models::ErrorResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use crate::errors::OrchError;

impl OrchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            OrchError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchError::RunnerFailure(_) | OrchError::StagingFailure(_) => StatusCode::BAD_GATEWAY,
            OrchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OrchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

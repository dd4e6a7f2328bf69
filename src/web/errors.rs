use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::app::ChatError;

/// JSON error response
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(error: ChatError) -> Self {
        Self(error)
    }
}

pub fn status_for(error: &ChatError) -> StatusCode {
    match error {
        ChatError::EmptyMessage | ChatError::MessageTooLong { .. } => StatusCode::BAD_REQUEST,
        ChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Busy => StatusCode::CONFLICT,
        ChatError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Message shown to the user. Internal details stay in the log.
pub fn public_message(error: &ChatError) -> String {
    match error {
        ChatError::Internal(detail) => {
            error!("Internal error: {}", detail);
            "Something went wrong. Please try again.".to_string()
        }
        ChatError::ModelUnavailable(_) => {
            "Failed to load the chatbot model. Please refresh the page and try again.".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (status, Json(json!({ "error": public_message(&self.0) }))).into_response()
    }
}

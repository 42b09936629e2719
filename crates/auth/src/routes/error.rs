use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::auth::AuthError;

#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.code,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

impl From<AuthError> for ErrorResponse {
    fn from(error: AuthError) -> Self {
        let status = classify_auth_error(&error);
        let message = match &error {
            AuthError::Store(_) => "credential store unavailable".to_string(),
            AuthError::Cache(_) => "session cache unavailable".to_string(),
            other => other.to_string(),
        };
        ErrorResponse::new(status, error.code(), message)
    }
}

fn classify_auth_error(error: &AuthError) -> StatusCode {
    match error {
        AuthError::UnsupportedProvider(_)
        | AuthError::StateMismatch
        | AuthError::MissingCode { .. } => StatusCode::BAD_REQUEST,
        AuthError::ProviderExchangeFailed { .. } | AuthError::ProviderProfileFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        AuthError::Store(_) | AuthError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::SessionNotFound | AuthError::SessionExpired => StatusCode::UNAUTHORIZED,
        AuthError::UserNotFound(_) => StatusCode::NOT_FOUND,
    }
}

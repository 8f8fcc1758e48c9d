use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use veil_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad or missing credential.  On the gateway path this refuses the
    /// handshake outright; the socket never enters the registry.
    #[error("Unauthorized")]
    AuthenticationFailed,

    #[error("Not a member of this group")]
    NotAMember,

    #[error("You have been removed from this group")]
    RemovedFromGroup,

    /// Anonymous-name collision retries exceeded; surfaced as a failed join.
    #[error("Could not assign a unique anonymous name")]
    NameAssignmentExhausted,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::AuthenticationFailed => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::NotAMember
            | ServerError::RemovedFromGroup
            | ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NameAssignmentExhausted => (StatusCode::CONFLICT, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Record not found".to_string())
            }
            ServerError::Store(StoreError::Conflict) => {
                (StatusCode::CONFLICT, "Record already exists".to_string())
            }
            ServerError::Store(_) | ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

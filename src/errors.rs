use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::acl::AclError;
use crate::state::StateError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = self.to_string();
        let error = match &self {
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        };

        if status.is_server_error() {
            tracing::error!(error, %message, "request failed");
        }

        let payload = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(payload)).into_response()
    }
}

impl From<AclError> for AppError {
    fn from(value: AclError) -> Self {
        match value {
            AclError::PermissionDenied(what) => Self::PermissionDenied(what),
            err @ (AclError::TokenNotFound | AclError::RootNotAllowed) => Self::Forbidden(err.to_string()),
            err @ (AclError::InvalidPolicy(_)
            | AclError::InvalidAccessLevel(_)
            | AclError::InvalidResource(_)
            | AclError::InvalidEnforceRequest { .. }) => Self::BadRequest(err.to_string()),
            AclError::Configuration(message) => Self::Configuration(message),
            err @ AclError::Source(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StateError> for AppError {
    fn from(value: StateError) -> Self {
        match value {
            err @ (StateError::MissingNode | StateError::MissingService) => Self::NotFound(err.to_string()),
            err @ (StateError::MissingCaRootId | StateError::ActiveCaRootCount(_)) => {
                Self::BadRequest(err.to_string())
            }
            err => Self::Internal(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

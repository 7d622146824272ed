use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use snow_ai::AiError;
use snow_db::DatabaseError;
use snow_types::api::ErrorResponse;
use thiserror::Error;
use tracing::error;

/// Failures surfaced by the services and rendered by the HTTP layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("username is already taken")]
    DuplicateUsername,

    #[error("invalid username or password")]
    AuthenticationFailed,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("completion failed: {0}")]
    CompletionFailed(String),

    #[error("image generation timed out")]
    GenerationTimeout,

    #[error("image generation failed: {0}")]
    GenerationFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateUsername => StatusCode::CONFLICT,
            Self::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::CompletionFailed(_) | Self::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::GenerationTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<AiError> for ServiceError {
    fn from(e: AiError) -> Self {
        match e {
            AiError::CompletionFailed { cause } => Self::CompletionFailed(cause),
            AiError::GenerationTimeout { .. } => Self::GenerationTimeout,
            AiError::GenerationFailed { cause } => Self::GenerationFailed(cause),
            AiError::Configuration(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use serde::Serialize;

use crate::storage::StoreError;

/// Error surface of the HTTP layer. Every variant maps to one status code;
/// bodies are `{ "message": ... }` plus the single structured `code` case
/// for duplicate client phones.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("phone number already registered")]
    PhoneExists,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Conflict(String),

    #[error("internal error")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            // Conflicts surface as 400 to match the observed wire behavior.
            ApiError::Validation(_) | ApiError::PhoneExists | ApiError::Conflict(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(detail) = self {
            log::error!("internal error: {detail}");
        }
        let code = match self {
            ApiError::PhoneExists => Some("PHONE_ALREADY_EXISTS"),
            _ => None,
        };
        let mut builder = HttpResponse::build(self.status_code());
        if matches!(self, ApiError::Unauthenticated) {
            builder.insert_header((
                header::WWW_AUTHENTICATE,
                format!("Basic realm=\"{}\"", crate::auth::AUTH_REALM),
            ));
        }
        builder.json(ErrorBody {
            message: self.to_string(),
            code,
        })
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Invalid(msg) => ApiError::Validation(msg),
            StoreError::Database(detail) => ApiError::Internal(detail),
        }
    }
}

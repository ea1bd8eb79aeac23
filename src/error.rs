use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use crate::auth::repo::StoreError;

/// Error taxonomy for the auth flows. Every variant maps to one HTTP status;
/// anything unexpected falls into `Internal` and is rendered as a generic 500.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("user with given email already exists")]
    DuplicateEmail,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("please verify your email before logging in")]
    EmailNotVerified,
    #[error("invalid or expired token")]
    InvalidOrExpiredToken { status: StatusCode },
    #[error("authentication required")]
    Unauthorized,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Token failure in the email-verification flow (401 per the API contract).
    pub fn invalid_verification_token() -> Self {
        Self::InvalidOrExpiredToken {
            status: StatusCode::UNAUTHORIZED,
        }
    }

    /// Token failure in the password-reset flow (400 per the API contract).
    pub fn invalid_reset_token() -> Self {
        Self::InvalidOrExpiredToken {
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::EmailNotVerified => StatusCode::FORBIDDEN,
            Self::InvalidOrExpiredToken { status } => *status,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            // Uniqueness is decided at the repository boundary; email is the
            // only unique field in the schema.
            StoreError::DuplicateKey(field) if field == "email" => Self::DuplicateEmail,
            StoreError::DuplicateKey(field) => {
                Self::Validation(format!("duplicate value for field: {field}"))
            }
            other => Self::Internal(other.into()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match &self {
            // Never leak internals to the client; the source is logged instead.
            Self::Internal(err) => {
                error!(error = %err, "internal error");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(json!({ "success": false, "message": message })),
        )
            .into_response()
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::error;

/// Domain errors of the credential subsystem.
///
/// Enumeration-sensitive failures are deliberately coarse here: unknown
/// email and wrong password both surface as `InvalidCredentials`, and the
/// recovery flows collapse unknown/expired/consumed tokens into
/// `InvalidToken`. The richer internal distinction lives on the audit
/// path (`events::AuthEvent`), not in this type.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account temporarily locked")]
    AccountLocked { locked_until: OffsetDateTime },

    #[error("invalid refresh token")]
    InvalidRefresh,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("{0}")]
    Validation(String),

    #[error("user store unavailable")]
    Store(#[source] anyhow::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::DuplicateEmail => (
                StatusCode::CONFLICT,
                "DUPLICATE_EMAIL",
                self.to_string(),
            ),
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                self.to_string(),
            ),
            AuthError::AccountLocked { .. } => (
                StatusCode::LOCKED,
                "ACCOUNT_LOCKED",
                self.to_string(),
            ),
            AuthError::InvalidRefresh => (
                StatusCode::UNAUTHORIZED,
                "INVALID_REFRESH",
                self.to_string(),
            ),
            AuthError::InvalidToken => (
                StatusCode::BAD_REQUEST,
                "INVALID_TOKEN",
                self.to_string(),
            ),
            AuthError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AuthError::Store(e) => {
                error!(error = %e, "user store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_UNAVAILABLE",
                    "service temporarily unavailable".to_string(),
                )
            }
            AuthError::Internal(e) => {
                error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        // Lockout responses carry the expiry for UX, never the reason.
        if let AuthError::AccountLocked { locked_until } = &self {
            body["locked_until"] = locked_until.format(&Rfc3339).ok().into();
        }

        (status, Json(body)).into_response()
    }
}

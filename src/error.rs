use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Every failure the link and account services can report.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid URL")]
    InvalidUrl,

    #[error("invalid email format")]
    InvalidEmail,

    #[error("password must be at least 8 characters and contain a letter and a digit")]
    InvalidPassword,

    #[error("short code must be 3-20 letters, digits, '-' or '_'")]
    InvalidShortCode,

    #[error("link not found")]
    LinkNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("link has expired")]
    LinkExpired,

    #[error("not the owner of this link")]
    Unauthorized,

    #[error("short code already exists")]
    ShortCodeExists,

    #[error("a user with this email already exists")]
    UserExists,

    #[error("expiration date cannot be in the past")]
    ExpirationInPast,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("missing, invalid or expired token")]
    InvalidToken,

    #[error("no free short code after {0} attempts")]
    CodeSpaceExhausted(usize),

    #[error("random source failure: {0}")]
    Random(#[from] rand::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServiceError::InvalidUrl => (StatusCode::BAD_REQUEST, "INVALID_URL"),
            ServiceError::InvalidEmail => (StatusCode::BAD_REQUEST, "INVALID_EMAIL"),
            ServiceError::InvalidPassword => (StatusCode::BAD_REQUEST, "INVALID_PASSWORD"),
            ServiceError::InvalidShortCode => (StatusCode::BAD_REQUEST, "INVALID_SHORT_CODE"),
            ServiceError::ExpirationInPast => (StatusCode::BAD_REQUEST, "EXPIRATION_IN_PAST"),
            ServiceError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            ServiceError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
            ServiceError::Unauthorized => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ServiceError::LinkNotFound => (StatusCode::NOT_FOUND, "LINK_NOT_FOUND"),
            ServiceError::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            ServiceError::ShortCodeExists => (StatusCode::CONFLICT, "SHORT_CODE_EXISTS"),
            ServiceError::UserExists => (StatusCode::CONFLICT, "USER_EXISTS"),
            ServiceError::LinkExpired => (StatusCode::GONE, "LINK_EXPIRED"),
            ServiceError::CodeSpaceExhausted(_)
            | ServiceError::Random(_)
            | ServiceError::PasswordHash(_)
            | ServiceError::Token(_)
            | ServiceError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_and_code().0 == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal details stay in the log, never in the response body.
        let message = if self.is_internal() {
            tracing::error!(error = %self, code, "Request failed");
            "Internal server error".to_owned()
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
            self.to_string()
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

/// `true` when a sqlx error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (ServiceError::InvalidUrl, StatusCode::BAD_REQUEST),
            (ServiceError::ExpirationInPast, StatusCode::BAD_REQUEST),
            (ServiceError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ServiceError::Unauthorized, StatusCode::FORBIDDEN),
            (ServiceError::LinkNotFound, StatusCode::NOT_FOUND),
            (ServiceError::ShortCodeExists, StatusCode::CONFLICT),
            (ServiceError::UserExists, StatusCode::CONFLICT),
            (ServiceError::LinkExpired, StatusCode::GONE),
            (
                ServiceError::CodeSpaceExhausted(16),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn internal_errors_are_flagged() {
        assert!(ServiceError::Database(sqlx::Error::RowNotFound).is_internal());
        assert!(ServiceError::PasswordHash("boom".into()).is_internal());
        assert!(!ServiceError::UserExists.is_internal());
    }
}

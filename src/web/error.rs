use hyper::StatusCode;
use thiserror::Error;

/// Application error kinds shared across services and route handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    InputTooLarge(String),

    #[error("{0}")]
    Policy(String),

    #[error("{0}")]
    Timeout(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InputTooLarge(_) => StatusCode::BAD_REQUEST,
            AppError::Policy(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Upstream("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::InputTooLarge("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_display_preserves_message() {
        let err = AppError::Upstream("provider returned malformed payload".into());
        assert_eq!(err.to_string(), "provider returned malformed payload");
    }
}

//! Server error types

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use redi_core::Language;
use thiserror::Error;

use crate::cache::CacheError;
use crate::rate_limit::Tier;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Model unavailable for {language}: {reason}")]
    ModelUnavailable { language: Language, reason: String },

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("Rate limit exceeded for language '{language}' ({tier} tier: {limit} requests per {window_secs}s). Try again later.")]
    RateLimited {
        language: Language,
        tier: Tier,
        limit: usize,
        window_secs: u64,
        retry_after_secs: u64,
    },

    #[error("Timed out after {0}s waiting for the {1} model")]
    Timeout(u64, Language),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CacheError> for ServerError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::ModelUnavailable { language, reason } => {
                ServerError::ModelUnavailable { language, reason }
            }
            CacheError::UnsupportedLanguage(language) => {
                ServerError::UnsupportedLanguage(language.to_string())
            }
        }
    }
}

impl From<redi_core::Error> for ServerError {
    fn from(err: redi_core::Error) -> Self {
        match err {
            redi_core::Error::UnsupportedLanguage(code) => ServerError::UnsupportedLanguage(code),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::ModelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized => StatusCode::FORBIDDEN,
            ServerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Timeout(..) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Startup(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            ServerError::RateLimited {
                retry_after_secs, ..
            } => {
                let retry_after = (*retry_after_secs).max(1).to_string();
                (status, [(header::RETRY_AFTER, retry_after)], self.to_string()).into_response()
            }
            ServerError::Internal(_) | ServerError::Io(_) | ServerError::Startup(_) => {
                tracing::error!(error = %self, "Request failed");
                (status, "Processing error").into_response()
            }
            _ => (status, self.to_string()).into_response(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::UnsupportedLanguage("de".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServerError::Unauthorized.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServerError::Timeout(30, Language::Sl).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let err = ServerError::RateLimited {
            language: Language::Hr,
            tier: Tier::Protected,
            limit: 10,
            window_secs: 60,
            retry_after_secs: 42,
        };
        assert!(err.to_string().contains("'hr'"));
        assert!(err.to_string().contains("protected tier"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn test_cache_error_conversion() {
        let err: ServerError = CacheError::ModelUnavailable {
            language: Language::Sr,
            reason: "missing".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

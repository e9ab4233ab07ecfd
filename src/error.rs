//! Error taxonomy shared by the OAuth flow, the config store and the adapters.
//!
//! Every variant maps to one HTTP status and one user-facing message.
//! Cryptographic, state-store and database failures never expose their
//! internal detail through [`SourceError::public_message`]; callers log the
//! full error with tenant and operation context instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::credentials::CipherError;

/// Why a state token could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFailure {
    NotFound,
    Expired,
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// Missing or malformed caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Server misconfiguration (missing OAuth client or master key).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("oauth state {0:?}")]
    State(StateFailure),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("decryption failed")]
    Decryption,

    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream provider failure (rate limit, 5xx, timeout).
    #[error("provider error ({status:?}): {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = SourceError> = std::result::Result<T, E>;

impl SourceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SourceError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        SourceError::NotFound(msg.into())
    }

    pub fn provider(status: Option<u16>, msg: impl Into<String>) -> Self {
        SourceError::Provider {
            status,
            message: msg.into(),
        }
    }

    /// Short error class name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Validation(_) => "validation",
            SourceError::Configuration(_) => "configuration",
            SourceError::State(_) => "state",
            SourceError::TokenExchange(_) => "token_exchange",
            SourceError::Refresh(_) => "refresh",
            SourceError::Decryption => "decryption",
            SourceError::NotFound(_) => "not_found",
            SourceError::Provider { .. } => "provider",
            SourceError::Storage(_) => "storage",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SourceError::Validation(_) | SourceError::State(_) => StatusCode::BAD_REQUEST,
            SourceError::Configuration(_)
            | SourceError::Decryption
            | SourceError::Refresh(_)
            | SourceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SourceError::TokenExchange(_) => StatusCode::BAD_GATEWAY,
            SourceError::NotFound(_) => StatusCode::NOT_FOUND,
            SourceError::Provider { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        }
    }

    /// Message safe to show an end user.
    pub fn public_message(&self) -> String {
        match self {
            SourceError::Validation(msg) => msg.clone(),
            SourceError::Configuration(_) => {
                "Spreadsheet integration is not configured on this server.".to_string()
            }
            SourceError::State(StateFailure::Expired) => {
                "This connection link has expired. Please start the connection again.".to_string()
            }
            SourceError::State(StateFailure::NotFound) => {
                "This connection link is invalid or was already used. Please start the connection again."
                    .to_string()
            }
            SourceError::TokenExchange(msg) => {
                format!("Could not connect your account ({}). Please reconnect your account.", msg)
            }
            SourceError::Refresh(msg) => {
                format!("Your account access could not be renewed ({}). Please reconnect your account.", msg)
            }
            SourceError::Decryption => "Stored credentials are unreadable. Please reconnect your account.".to_string(),
            SourceError::NotFound(msg) => msg.clone(),
            SourceError::Provider { message, .. } => format!("Data source error: {}", message),
            SourceError::Storage(_) => "An internal error occurred.".to_string(),
        }
    }
}

impl From<CipherError> for SourceError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::InvalidKey => {
                SourceError::Configuration("master encryption key is empty".to_string())
            }
            CipherError::Encryption | CipherError::Decryption => SourceError::Decryption,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for SourceError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.public_message(),
        });
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SourceError::validation("tenantId is required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SourceError::State(StateFailure::Expired).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SourceError::not_found("no config").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SourceError::provider(Some(429), "rate limited").status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            SourceError::provider(Some(200), "odd").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            SourceError::provider(None, "timeout").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            SourceError::Refresh("invalid_grant".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SourceError::TokenExchange("invalid_grant".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let err = SourceError::Storage(anyhow::anyhow!("disk I/O error at /var/lib/db"));
        assert!(!err.public_message().contains("/var/lib/db"));

        let err = SourceError::Decryption;
        assert!(!err.public_message().to_lowercase().contains("tag"));
    }

    #[test]
    fn test_state_failures_distinguished() {
        let expired = SourceError::State(StateFailure::Expired).public_message();
        let missing = SourceError::State(StateFailure::NotFound).public_message();
        assert_ne!(expired, missing);
        assert!(expired.contains("expired"));
    }
}

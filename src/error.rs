//! Error model for the session core.
//! `AuthError` is what `login` surfaces to callers; `VerifyError` is what a
//! verification collaborator reports back. Authorization denials are never errors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("validation already in progress")]
    AlreadyValidating,
    #[error("superseded by a newer session operation")]
    Superseded,
}

impl AuthError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::ValidationFailed(_) => "validation_failed",
            AuthError::TransportError(_) => "transport_error",
            AuthError::AlreadyValidating => "already_validating",
            AuthError::Superseded => "superseded",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::InvalidCredentials | AuthError::ValidationFailed(_) => 401,
            AuthError::TransportError(_) => 503,
            AuthError::AlreadyValidating | AuthError::Superseded => 409,
        }
    }

    /// Failures that leave the session in the Invalid state.
    pub fn is_fail_closed(&self) -> bool {
        matches!(self, AuthError::InvalidCredentials | AuthError::ValidationFailed(_) | AuthError::TransportError(_))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The collaborator looked at the credential and said no.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("transport: {0}")]
    Transport(String),
}

impl VerifyError {
    /// Mapping for an email/secret login attempt.
    pub fn into_login_error(self) -> AuthError {
        match self {
            VerifyError::Rejected(_) => AuthError::InvalidCredentials,
            VerifyError::Malformed(m) => AuthError::ValidationFailed(m),
            VerifyError::Transport(m) => AuthError::TransportError(m),
        }
    }

    /// Mapping for a bearer-token re-check.
    pub fn into_token_error(self) -> AuthError {
        match self {
            VerifyError::Rejected(m) | VerifyError::Malformed(m) => AuthError::ValidationFailed(m),
            VerifyError::Transport(m) => AuthError::TransportError(m),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;

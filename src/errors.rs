//! errors
//!
//! Error taxonomy shared by every layer of the service.
//!
//! # Design
//!
//! Adapters annotate upstream failures with context (project, owner/repo)
//! and attach one of these variants; dispatchers and services pass errors
//! through unchanged, and the HTTP boundary maps each variant to a status
//! code and a `{code, message}` body.
//!
//! The enum is `Clone` because cache single-flight fans a failed fetch out
//! to every waiter.

use thiserror::Error;

/// Errors produced by the service core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GfError {
    /// Malformed input: bad project format, malformed Bitbucket token,
    /// unsupported cache endpoint, invalid variables JSON.
    #[error("{0}")]
    BadRequest(String),

    /// Upstream returned 401, or the stored token is unusable.
    #[error("{0}")]
    Unauthorized(String),

    /// The Git server, secret, or upstream resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The capability is not implemented by the selected provider.
    #[error("{0}")]
    Unsupported(String),

    /// Any other upstream, transport, or parse failure.
    #[error("{0}")]
    Internal(String),
}

impl GfError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GfError::BadRequest(_) => "bad_request",
            GfError::Unauthorized(_) => "unauthorized",
            GfError::NotFound(_) => "not_found",
            GfError::Unsupported(_) | GfError::Internal(_) => "internal_error",
        }
    }
}

impl From<reqwest::Error> for GfError {
    fn from(err: reqwest::Error) -> Self {
        GfError::Internal(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_message_verbatim() {
        let err = GfError::NotFound("repository acme/widget: not found".into());
        assert_eq!(err.to_string(), "repository acme/widget: not found");
    }

    #[test]
    fn codes() {
        assert_eq!(GfError::BadRequest(String::new()).code(), "bad_request");
        assert_eq!(GfError::Unauthorized(String::new()).code(), "unauthorized");
        assert_eq!(GfError::NotFound(String::new()).code(), "not_found");
        assert_eq!(GfError::Unsupported(String::new()).code(), "internal_error");
        assert_eq!(GfError::Internal(String::new()).code(), "internal_error");
    }
}

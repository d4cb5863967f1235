//! Error taxonomy shared by every studio component.

use thiserror::Error;

pub type StudioResult<T> = Result<T, StudioError>;

/// Coarse classification used by callers that map errors onto transport
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    BadRequest,
    Unsupported,
    Upstream,
    Internal,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StudioError {
    /// A run, resource, config variable, prompt, sleep or alias target is missing.
    #[error("{message}")]
    NotFound { message: String },

    /// Malformed input or an invalid state transition.
    #[error("{message}")]
    BadRequest { message: String },

    /// The operation cannot be performed on this machine or for this kind.
    #[error("{message}")]
    Unsupported { message: String },

    /// The remote API or binary storage failed.
    #[error("{context}: {message}")]
    Upstream { context: String, message: String },

    /// Encoding, decoding or local IO failures.
    #[error("{context}: {message}")]
    Internal { context: String, message: String },
}

impl StudioError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported { message: message.into() }
    }

    /// Wrap a remote failure with a short description of what was attempted.
    pub fn upstream(context: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Upstream {
            context: context.into(),
            message: format!("{error:#}"),
        }
    }

    pub fn internal(context: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Internal {
            context: context.into(),
            message: format!("{error:#}"),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::BadRequest { .. } => ErrorClass::BadRequest,
            Self::Unsupported { .. } => ErrorClass::Unsupported,
            Self::Upstream { .. } => ErrorClass::Upstream,
            Self::Internal { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

impl From<serde_json::Error> for StudioError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal("json", error)
    }
}

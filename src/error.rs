//! Error types for authentication, authorization and configuration.
//!
//! Per-request failures ([`Error::UnknownIssuer`], [`Error::InvalidToken`],
//! [`Error::Unauthorized`], [`Error::Forbidden`]) are converted to HTTP status
//! codes at the access layer boundary with [`Error::status_code`].
//! [`Error::Configuration`] is only produced while building the security
//! configuration at startup.

use http::StatusCode;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The token's `iss` claim has no registered issuer configuration.
    #[error("Unknown issuer: {issuer}")]
    UnknownIssuer {
        /// Issuer claim read from the unverified token.
        issuer: String,
    },

    /// Signature invalid, token expired or malformed, or signing keys unavailable.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// No credentials were presented on a protected path.
    #[error("Authentication required")]
    Unauthorized,

    /// A valid principal lacks the authority the path requires.
    #[error("Access denied: requires {required}")]
    Forbidden {
        /// Human readable description of the missing requirement.
        required: String,
    },

    /// Malformed security configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Outbound HTTP middleware failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an [`Error::UnknownIssuer`].
    pub fn unknown_issuer(issuer: impl Into<String>) -> Self {
        Self::UnknownIssuer {
            issuer: issuer.into(),
        }
    }

    /// Create an [`Error::InvalidToken`].
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }

    /// Create an [`Error::Forbidden`].
    pub fn forbidden(required: impl Into<String>) -> Self {
        Self::Forbidden {
            required: required.into(),
        }
    }

    /// Create an [`Error::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an [`Error::Http`].
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http(message.into())
    }

    /// Create an [`Error::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status code this error is surfaced as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownIssuer { .. } | Self::InvalidToken(_) | Self::Unauthorized => {
                StatusCode::UNAUTHORIZED
            },
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error means the caller's identity is absent or bad.
    pub fn is_authentication_failure(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(format!("TOML parse error: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

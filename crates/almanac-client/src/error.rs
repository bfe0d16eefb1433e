//! Client errors.

#![allow(missing_docs)]

use thiserror::Error;

/// Generic text shown when a request fails without a usable server message.
pub const GENERIC_FAILURE: &str = "request failed";

/// Errors surfaced by the dashboard controller.
///
/// `Display` is the operator-facing text: server messages are carried
/// verbatim so they can be shown as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Input rejected before any request was issued.
    #[error("{0}")]
    Validation(String),

    /// Network unreachable, timeout, or a non-2xx response without a body.
    #[error("{GENERIC_FAILURE}: {0}")]
    Transport(String),

    /// The server answered `success: false`.
    #[error("{message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },

    /// The server refused the operation for lack of a permission.
    #[error("{message}")]
    PermissionDenied { message: String },

    /// No valid session backs the request.
    #[error("{message}")]
    Unauthenticated { message: String },

    /// The account's validity window has passed.
    #[error("{message}")]
    AccountExpired { message: String },

    /// A response body did not match the documented contract.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// True when the error means the session is gone and the operator must
    /// sign in again.
    #[must_use]
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated { .. } | Self::AccountExpired { .. }
        )
    }

    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Text shown for a failure of an operation on `feature`.
    ///
    /// Permission refusals get a tailored notice naming the feature; all
    /// other failures show their own message.
    #[must_use]
    pub fn operator_notice(&self, feature: &str) -> String {
        match self {
            Self::PermissionDenied { .. } => {
                format!("You do not have permission to use {feature}.")
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

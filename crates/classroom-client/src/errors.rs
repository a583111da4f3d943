//! Classroom client error types.
//!
//! Errors are split by the layer that produces them. Only credential and
//! transport failures can change `Session.state`; device errors stay local to
//! one capture resource. Internal details are logged but not shown to users;
//! use `client_message()` / `user_message()` for UI text.

use crate::lifecycle::session::SessionState;
use std::time::Duration;
use thiserror::Error;

/// Top-level error returned by the lifecycle controller handle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation is not valid in the current session state.
    #[error("{operation} is not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Credential acquisition failed.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Transport SDK call failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Capture device failed.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// The controller has been disposed.
    #[error("Lifecycle controller has been disposed")]
    Disposed,

    /// Internal error (channel failures and similar).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Returns a user-facing message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::InvalidState { .. } => {
                "That action is not available right now".to_string()
            }
            SessionError::Credential(e) => e.client_message(),
            SessionError::Transport(_) => {
                "The connection to the class was lost".to_string()
            }
            SessionError::Device(e) => e.user_message(),
            SessionError::Disposed | SessionError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

/// Retry classification for credential failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialErrorKind {
    /// The user must sign in again; never retried.
    Unauthorized,
    /// Timeouts, unreachable service, 5xx and malformed responses.
    Transient,
}

/// Credential service errors.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// The credential service rejected the local session token (401/403).
    #[error("Credential request unauthorized: {0}")]
    Unauthorized(String),

    /// No local session token is available to present.
    #[error("No local session token")]
    MissingSessionToken,

    /// The request did not complete within the timeout.
    #[error("Credential request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("Credential service returned status {status}")]
    Service { status: u16 },

    /// The response body could not be parsed.
    #[error("Invalid credential response: {0}")]
    InvalidResponse(String),
}

impl CredentialError {
    /// Classify the error for the retry policy.
    #[must_use]
    pub fn kind(&self) -> CredentialErrorKind {
        match self {
            CredentialError::Unauthorized(_) | CredentialError::MissingSessionToken => {
                CredentialErrorKind::Unauthorized
            }
            CredentialError::Timeout(_)
            | CredentialError::Network(_)
            | CredentialError::Service { .. }
            | CredentialError::InvalidResponse(_) => CredentialErrorKind::Transient,
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == CredentialErrorKind::Transient
    }

    /// Returns a user-facing message.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self.kind() {
            CredentialErrorKind::Unauthorized => {
                "Your sign-in has expired, please sign in again".to_string()
            }
            CredentialErrorKind::Transient => {
                "Could not reach the classroom service".to_string()
            }
        }
    }
}

/// Capture device errors. Recoverable at the resource level.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// The user or the platform denied access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No such device, or it is in use by another application.
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    /// Releasing the device failed.
    #[error("Failed to close device: {0}")]
    Close(String),
}

impl DeviceError {
    /// Returns a user-facing message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            DeviceError::PermissionDenied(_) => {
                "Permission to use the device was denied".to_string()
            }
            DeviceError::Unavailable(_) => {
                "The device is unavailable or in use by another application".to_string()
            }
            DeviceError::Close(_) => "The device could not be released".to_string(),
        }
    }

    /// Bounded label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            DeviceError::PermissionDenied(_) => "permission_denied",
            DeviceError::Unavailable(_) => "unavailable",
            DeviceError::Close(_) => "close",
        }
    }
}

/// Transport SDK errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Join failed: {0}")]
    Join(String),

    #[error("Leave failed: {0}")]
    Leave(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Unpublish failed: {0}")]
    Unpublish(String),

    #[error("Token renewal failed: {0}")]
    Renew(String),

    /// Error reported by the SDK after the connection was established.
    #[error("Transport runtime error: {0}")]
    Runtime(String),

    /// The SDK dropped the connection without a local leave.
    #[error("Disconnected: {0}")]
    Disconnected(String),
}

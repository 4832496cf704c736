//! Unified error types for the latchkey core library.
//!
//! This module provides a unified error type [`CoreError`] covering all
//! failure modes across the access core. Variants follow a small taxonomy:
//!
//! - **Validation** errors are local, never reach the backend, and are
//!   immediately recoverable.
//! - **Not-found** errors are terminal for the current flow.
//! - **Conflict** is recovered automatically by the issuance retry loop
//!   and only surfaces once the retry cap is exceeded.
//! - **Authorization** errors mean a token or grant was rejected and the
//!   user can retry with different credentials.
//! - **Transport** errors mean the backend was unreachable or returned a
//!   malformed response; recoverable by manual retry.
//!
//! No error here is fatal to the process; all are scoped to the current
//! attempt.

use thiserror::Error;

use crate::backend::BackendError;

/// The unified error type for all latchkey core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    // =========================================================================
    // VALIDATION (local, never sent to the backend)
    // =========================================================================
    /// A required input was missing or empty.
    #[error("Required input is missing: {0}")]
    MissingInput(&'static str),

    /// A supplied timestamp could not be parsed.
    #[error("Invalid timestamp: '{0}'. Expected ISO 8601, e.g. '2024-01-31T23:59'.")]
    InvalidTimestamp(String),

    /// An access window with `window_start > window_end`.
    #[error("Invalid access window: start must not be after end")]
    InvalidWindow,

    /// A submitted token code contains characters outside the code alphabet.
    #[error("Token code must be alphanumeric")]
    MalformedCode,

    // =========================================================================
    // NOT FOUND
    // =========================================================================
    /// The property has no associated lock.
    #[error("No lock is associated with this property")]
    LockNotFound,

    /// The target property could not be resolved.
    #[error("Property not found")]
    PropertyNotFound,

    /// The referenced guest does not exist.
    #[error("Guest not found")]
    GuestNotFound,

    // =========================================================================
    // ISSUANCE
    // =========================================================================
    /// The token-creation retry loop exceeded its attempt cap.
    #[error("Could not issue a unique token code after {attempts} attempts")]
    IssuanceExhausted {
        /// Number of creation requests performed before giving up.
        attempts: u32,
    },

    // =========================================================================
    // AUTHORIZATION
    // =========================================================================
    /// The backend rejected a token or grant as invalid, expired, or exhausted.
    #[error("Access denied: {0}")]
    Rejected(String),

    // =========================================================================
    // TRANSPORT
    // =========================================================================
    /// The backend was unreachable or returned a malformed response.
    #[error("Cannot reach the server: {0}")]
    Transport(String),
}

/// A specialized [`Result`] type for latchkey core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Returns `true` if this error was produced by local input validation.
    #[inline]
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::MissingInput(_)
                | Self::InvalidTimestamp(_)
                | Self::InvalidWindow
                | Self::MalformedCode
        )
    }

    /// Returns `true` if the target entity was absent.
    #[inline]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::LockNotFound | Self::PropertyNotFound | Self::GuestNotFound
        )
    }

    /// Returns `true` if the user can recover without owner intervention
    /// (fix the input, retry, or wait for connectivity).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !self.is_not_found()
    }

    /// Returns a machine-readable error code for logs and API surfaces.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "MISSING_INPUT",
            Self::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            Self::InvalidWindow => "INVALID_WINDOW",
            Self::MalformedCode => "MALFORMED_CODE",
            Self::LockNotFound => "LOCK_NOT_FOUND",
            Self::PropertyNotFound => "PROPERTY_NOT_FOUND",
            Self::GuestNotFound => "GUEST_NOT_FOUND",
            Self::IssuanceExhausted { .. } => "ISSUANCE_EXHAUSTED",
            Self::Rejected(_) => "ACCESS_REJECTED",
            Self::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound => Self::PropertyNotFound,
            BackendError::GuestNotFound => Self::GuestNotFound,
            BackendError::InvalidWindow => Self::InvalidWindow,
            // A conflict escaping the issuance loop means the loop gave up;
            // callers outside the loop should never observe a raw conflict.
            BackendError::Conflict => Self::IssuanceExhausted { attempts: 0 },
            BackendError::Rejected(reason) => Self::Rejected(reason),
            BackendError::Transport(message) => Self::Transport(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(CoreError::MissingInput("code").is_validation_error());
        assert!(CoreError::InvalidTimestamp("nope".into()).is_validation_error());
        assert!(CoreError::InvalidWindow.is_validation_error());
        assert!(CoreError::MalformedCode.is_validation_error());
        assert!(!CoreError::LockNotFound.is_validation_error());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(CoreError::LockNotFound.is_not_found());
        assert!(CoreError::PropertyNotFound.is_not_found());
        assert!(CoreError::GuestNotFound.is_not_found());
        assert!(!CoreError::Rejected("expired".into()).is_not_found());
    }

    #[test]
    fn test_recoverable() {
        assert!(CoreError::Transport("timeout".into()).is_recoverable());
        assert!(CoreError::Rejected("expired".into()).is_recoverable());
        assert!(!CoreError::LockNotFound.is_recoverable());
    }

    #[test]
    fn test_error_codes_and_messages() {
        let err = CoreError::IssuanceExhausted { attempts: 20 };
        assert_eq!(err.error_code(), "ISSUANCE_EXHAUSTED");
        assert!(err.to_string().contains("20 attempts"));

        let err = CoreError::Rejected("token expired".into());
        assert!(err.to_string().contains("token expired"));
    }

    #[test]
    fn test_backend_error_conversion() {
        let err: CoreError = BackendError::Rejected("token expired".into()).into();
        assert!(matches!(err, CoreError::Rejected(_)));

        let err: CoreError = BackendError::Transport("connection refused".into()).into();
        assert!(matches!(err, CoreError::Transport(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<CoreError>();
        assert_sync::<CoreError>();
    }
}

//! Error types for elembus.
//!
//! All errors are strongly typed using thiserror. Provider callbacks report
//! [`ProviderError`]; the bus wraps those into [`BusError`] together with the
//! element they were raised for.

use thiserror::Error;

/// Errors returned by provider capability callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider does not implement this capability.
    #[error("capability not supported")]
    Unsupported,

    /// The provider refused the request.
    #[error("{0}")]
    Rejected(String),

    /// The addressed element does not exist on the provider side.
    #[error("element not found on provider")]
    NotFound,
}

impl ProviderError {
    /// Creates a rejection with a message.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Top-level error type for bus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("Element not found: {path}")]
    NotFound {
        path: String,
    },

    #[error("Duplicate name: {name}")]
    DuplicateName {
        name: String,
    },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Invalid element name '{name}': {reason}")]
    InvalidName {
        name: String,
        reason: String,
    },

    #[error("Element '{element}' is a {actual}, expected {expected}")]
    WrongKind {
        element: String,
        expected: String,
        actual: String,
    },

    #[error("Provider rejected request on '{element}': {reason}")]
    ProviderRejected {
        element: String,
        reason: String,
    },

    #[error("Operation '{operation}' not supported by '{element}'")]
    Unsupported {
        operation: String,
        element: String,
    },

    #[error("Listener '{listener}' is not subscribed to '{event_name}'")]
    NotSubscribed {
        listener: String,
        event_name: String,
    },

    #[error("Listener '{listener}' is already subscribed to '{event_name}'")]
    AlreadySubscribed {
        listener: String,
        event_name: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl BusError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a not-found error for a path.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Wraps a provider callback failure for `element`.
    #[must_use]
    pub fn from_provider(err: ProviderError, operation: &str, element: &str) -> Self {
        match err {
            ProviderError::Unsupported => Self::Unsupported {
                operation: operation.to_string(),
                element: element.to_string(),
            },
            ProviderError::NotFound => Self::not_found(element),
            ProviderError::Rejected(reason) => Self::ProviderRejected {
                element: element.to_string(),
                reason,
            },
        }
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the error originated in a provider callback.
    #[must_use]
    pub const fn is_provider_error(&self) -> bool {
        matches!(self, Self::ProviderRejected { .. } | Self::Unsupported { .. })
    }

    /// Returns true if the error is caused by malformed input.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPattern { .. }
                | Self::InvalidName { .. }
                | Self::WrongKind { .. }
                | Self::DuplicateName { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

//! Communicator error types

use propstore::PropertiesError;
use thiserror::Error;

use crate::proxy::InvocationMode;

/// Errors raised by the communicator and its collaborators
#[derive(Debug, Error)]
pub enum CommunicatorError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Cannot parse proxy `{input}`: {reason}")]
    ProxyParse { input: String, reason: String },

    #[error("Cannot parse identity `{input}`: {reason}")]
    IdentityParse { input: String, reason: String },

    #[error("Cannot parse endpoint `{input}`: {reason}")]
    EndpointParse { input: String, reason: String },

    #[error("Communicator has been destroyed")]
    AlreadyDestroyed,

    #[error("Communicator has been shut down")]
    ShutDown,

    #[error("{kind} `{id}` is already registered")]
    AlreadyRegistered { kind: &'static str, id: String },

    #[error("{kind} `{id}` is not registered")]
    NotRegistered { kind: &'static str, id: String },

    #[error("Plugin `{name}` failed: {reason}")]
    Plugin { name: String, reason: String },

    #[error("Object adapter `{name}` is deactivated")]
    AdapterDeactivated { name: String },

    #[error("Object adapter `{name}` is holding requests")]
    AdapterHolding { name: String },

    #[error("Proxy `{proxy}` uses {mode} invocation, expected a batch mode")]
    InvalidMode { proxy: String, mode: InvocationMode },

    #[error("Properties error: {0}")]
    Properties(#[from] PropertiesError),
}

/// Result type for communicator operations
pub type Result<T> = std::result::Result<T, CommunicatorError>;

impl CommunicatorError {
    /// Check if the operation was rejected because the runtime is gone
    pub fn is_destroyed(&self) -> bool {
        matches!(self, CommunicatorError::AlreadyDestroyed)
    }

    /// Check if this is an initialization failure
    pub fn is_initialization(&self) -> bool {
        matches!(self, CommunicatorError::Initialization(_))
    }

    /// Check if this error came from a malformed string form
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            CommunicatorError::ProxyParse { .. }
                | CommunicatorError::IdentityParse { .. }
                | CommunicatorError::EndpointParse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_registered_message() {
        let err = CommunicatorError::AlreadyRegistered {
            kind: "object adapter",
            id: "Printer".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("object adapter"));
        assert!(msg.contains("Printer"));
    }

    #[test]
    fn test_classification() {
        assert!(CommunicatorError::AlreadyDestroyed.is_destroyed());
        assert!(!CommunicatorError::ShutDown.is_destroyed());
        assert!(CommunicatorError::Initialization("x".to_string()).is_initialization());
        assert!(
            CommunicatorError::IdentityParse {
                input: "/".to_string(),
                reason: "empty".to_string()
            }
            .is_parse()
        );
        assert!(!CommunicatorError::AlreadyDestroyed.is_parse());
    }

    #[test]
    fn test_invalid_mode_message() {
        let err = CommunicatorError::InvalidMode {
            proxy: "printer -t".to_string(),
            mode: InvocationMode::Twoway,
        };
        assert!(err.to_string().contains("twoway"));
    }
}

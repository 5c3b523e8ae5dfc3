//! Property store error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or updating properties
#[derive(Debug, Error)]
pub enum PropertiesError {
    #[error("Cannot read property file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Property key must not be empty")]
    EmptyKey,
}

/// Result type for property store operations
pub type Result<T> = std::result::Result<T, PropertiesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_message_names_path() {
        let err = PropertiesError::Io {
            path: PathBuf::from("/etc/missing.cfg"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };

        assert!(err.to_string().contains("/etc/missing.cfg"));
        assert!(std::error::Error::source(&err).is_some());
    }
}

//! Error types shared across the ETL workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by shared infrastructure (configuration parsing, logging setup)
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl CommonError {
    /// Build a configuration error from anything printable
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = CommonError::config("LOG_LEVEL must be one of trace|debug|info|warn|error");
        assert!(err.to_string().starts_with("Configuration error:"));
    }

    #[test]
    fn test_io_error_wraps() {
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "logs");
        let err: CommonError = inner.into();
        assert!(err.to_string().contains("IO error"));
    }
}

//! Error types shared by the Zero planner services.

use thiserror::Error;

/// Result type alias using the Zero error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Service-level error.
///
/// Evaluation outcomes such as an infeasible sequence are never errors; this
/// type covers requests that cannot be served at all.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request exceeds a configured ceiling
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::LimitExceeded(_) => 400,
            Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::InvalidInput("test".into()).status_code(), 400);
        assert_eq!(Error::LimitExceeded("test".into()).status_code(), 400);
        assert_eq!(Error::Internal("test".into()).status_code(), 500);
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::LimitExceeded("paths".into()).is_client_error());
        assert!(!Error::Internal("pool".into()).is_client_error());
        assert_eq!(
            Error::LimitExceeded("paths: at most 1000 allowed, got 1001".into()).to_string(),
            "Limit exceeded: paths: at most 1000 allowed, got 1001"
        );
    }
}

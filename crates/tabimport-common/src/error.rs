//! Error types shared across tabimport crates

use thiserror::Error;

/// Errors raised by shared infrastructure code
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported payload version {found} (expected {expected})")]
    UnsupportedVersion { expected: u16, found: u16 },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_version_message() {
        let err = CommonError::UnsupportedVersion {
            expected: 1,
            found: 7,
        };
        assert_eq!(err.to_string(), "Unsupported payload version 7 (expected 1)");
    }

    #[test]
    fn test_serialization_error_converts() {
        let err: CommonError = serde_json::from_str::<u16>("\"x\"").unwrap_err().into();
        assert!(matches!(err, CommonError::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }
}

//! Error types for METS/MODS operations
//!
//! This module defines all error types used throughout the toolkit.

use thiserror::Error;

/// Error types for METS/MODS operations
#[derive(Debug, Error)]
pub enum MetsError {
    /// Invalid or missing preferences entry (undeclared namespace prefix,
    /// unknown type name, bad substitution pattern)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structural defect in the document (duplicate structure maps, missing
    /// logical map, malformed struct-link entries)
    #[error("Structural error: {0}")]
    Structure(String),

    /// Bad path expression handed to the path engine
    #[error("Bad path: {0}")]
    BadPath(String),

    /// Anchor chain resolution failure (missing sibling file, unresolved
    /// identifier, cyclic chain)
    #[error("Anchor error: {0}")]
    AnchorError(String),

    /// XML parsing failed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),
}

/// Result type alias for METS/MODS operations
pub type MetsResult<T> = Result<T, MetsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MetsError::Config("missing prefix".to_string());
        assert!(err
            .to_string()
            .contains("Configuration error: missing prefix"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let mets_err: MetsError = io_err.into();
        assert!(matches!(mets_err, MetsError::IoError(_)));
    }
}

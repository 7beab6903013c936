//! STRATA - Custom Error Types
//! Defines the error hierarchy for the SSTable persistence layer.

use thiserror::Error;

/// Custom Result type for the Strata crate.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Error types for the SSTable persistence layer.
#[derive(Error, Debug)]
pub enum StrataError {
    /// I/O errors from the underlying file handle, forwarded unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A varint's declared length was not satisfied by the input.
    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    /// A decoded value does not fit its domain once combined with the header.
    #[error("Malformed sstable: {0}")]
    MalformedSstable(String),

    /// The component set of an instance does not match its version.
    #[error("Component integrity error in generation {generation}: {reason}")]
    ComponentIntegrity { generation: u64, reason: String },

    /// Write-side encoding errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Large-data event sink failure.
    #[error("Event sink error: {0}")]
    Sink(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StrataError {
    /// Returns true for errors that indicate corrupt or mismatched data on
    /// disk rather than a failing environment.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StrataError::MalformedStream(_)
                | StrataError::MalformedSstable(_)
                | StrataError::ComponentIntegrity { .. }
        )
    }
}

impl From<bincode::Error> for StrataError {
    fn from(err: bincode::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        assert!(StrataError::MalformedStream("eof".into()).is_corruption());
        assert!(StrataError::MalformedSstable("ttl".into()).is_corruption());
        assert!(StrataError::ComponentIntegrity {
            generation: 3,
            reason: "missing Data".into()
        }
        .is_corruption());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert!(!StrataError::from(io).is_corruption());
        assert!(!StrataError::Sink("down".into()).is_corruption());
    }

    #[test]
    fn test_display_mentions_kind() {
        let err = StrataError::MalformedSstable("Too big ttl: 5".into());
        assert_eq!(err.to_string(), "Malformed sstable: Too big ttl: 5");
    }
}

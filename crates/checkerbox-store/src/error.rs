//! Error types for checkerbox-store

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while persisting or reading back run records
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem failure on a backing file
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored line could not be decoded back into a record
    #[error("Corrupt record in {path} at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mentions_path() {
        let err = StorageError::io(
            "/tmp/reports.jsonl",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/reports.jsonl"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_corrupt_error_display() {
        let err = StorageError::Corrupt {
            path: PathBuf::from("log.jsonl"),
            line: 3,
            reason: "expected value".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt record in log.jsonl at line 3: expected value"
        );
    }
}

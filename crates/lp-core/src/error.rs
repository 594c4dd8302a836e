//! Error type shared by the lp-* crates for configuration, naming and I/O.
//!
//! Stage-specific failures of the remux engine live in `lp-pair`; this type
//! covers what every crate needs before a pipeline even starts.

use std::path::{Path, PathBuf};

/// Failure modes for identifiers, paths and configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A string cannot be used as a shared identifier.
    #[error("Invalid shared identifier {value:?}: {reason}")]
    InvalidIdentifier {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A path that must be a directory is not one.
    #[error("Not a directory: {}", path.display())]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Convenience constructor for [`Error::InvalidIdentifier`].
    pub fn invalid_identifier(value: impl Into<String>, reason: &'static str) -> Self {
        Error::InvalidIdentifier {
            value: value.into(),
            reason,
        }
    }

    /// Convenience constructor for [`Error::NotADirectory`].
    pub fn not_a_directory(path: impl AsRef<Path>) -> Self {
        Error::NotADirectory {
            path: path.as_ref().to_path_buf(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_display() {
        let err = Error::invalid_identifier("a/b", "contains a path separator");
        assert_eq!(
            err.to_string(),
            "Invalid shared identifier \"a/b\": contains a path separator"
        );
    }

    #[test]
    fn not_a_directory_display() {
        let err = Error::not_a_directory("/tmp/file.txt");
        assert_eq!(err.to_string(), "Not a directory: /tmp/file.txt");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
    }
}

//! Error types for lp-media.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for lp-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for container and image metadata operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid movie file structure.
    #[error("Invalid movie: {0}")]
    InvalidMovie(String),

    /// Missing required atom in a movie file.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Invalid or unsupported JPEG data.
    #[error("Invalid JPEG: {0}")]
    InvalidJpeg(String),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A writer refuses to replace an existing file.
    #[error("Output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    /// The directory an output would be written into does not exist.
    #[error("Output directory does not exist: {}", .0.display())]
    MissingParent(PathBuf),

    /// An operation was called in the wrong writer state.
    #[error("Writer is {state}; cannot {operation}")]
    WriterState {
        state: &'static str,
        operation: &'static str,
    },

    /// A sample or operation referenced a track the writer does not have.
    #[error("Unknown track id {0}")]
    UnknownTrack(u32),

    /// A sample was appended with a decode time before the previous one.
    #[error("Track {track_id}: decode time {decode_time} precedes {previous}")]
    OutOfOrder {
        track_id: u32,
        decode_time: i64,
        previous: i64,
    },
}

impl Error {
    /// Create an invalid movie error.
    pub fn invalid_movie(msg: impl Into<String>) -> Self {
        Self::InvalidMovie(msg.into())
    }

    /// Create an invalid JPEG error.
    pub fn invalid_jpeg(msg: impl Into<String>) -> Self {
        Self::InvalidJpeg(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a writer-state error.
    pub fn writer_state(state: &'static str, operation: &'static str) -> Self {
        Self::WriterState { state, operation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::MissingAtom("moov").to_string(),
            "Missing required atom: moov"
        );
        assert_eq!(
            Error::writer_state("finished", "append samples").to_string(),
            "Writer is finished; cannot append samples"
        );
        assert_eq!(
            Error::OutputExists(PathBuf::from("/tmp/a.mov")).to_string(),
            "Output already exists: /tmp/a.mov"
        );
    }
}

//! Error types for each pairing stage.
//!
//! Failures that happen after a file was written carry the outcome of the
//! attempt to remove it: `cleanup: None` means the file is gone.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::copier::TrackKind;
use crate::decoder::ComponentType;

/// A cloneable, thread-safe underlying error.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Why a source asset's tracks could not be resolved.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("loading the asset was cancelled")]
    LoadCancelled,

    #[error("the asset is still loading")]
    LoadBusy,

    #[error("the asset has no visual track")]
    NoVisualTrack,

    #[error("the visual track has no frames")]
    EmptyTrack,

    #[error("loading the asset failed: {0}")]
    LoadFailed(#[source] SharedError),

    #[error("loading the asset ended in an unknown state")]
    Unknown(#[source] Option<SharedError>),
}

/// Failure of one sample copy loop.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("{kind} sink closed before the copy finished")]
    SinkClosed { kind: TrackKind },

    #[error("{kind} copy worker failed: {message}")]
    Worker { kind: TrackKind, message: String },
}

/// Failure of the timed metadata append.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("metadata injector is not attached to a writer")]
    NotAttached,

    #[error("the writing session has not started")]
    SessionNotStarted,

    #[error("the writer rejected the still-image-time sample")]
    Rejected,
}

/// Failure of one remux pass, by stage.
#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("loading tracks failed: {0}")]
    LoadingTracksFailed(#[source] ResolveError),

    #[error("reading the source failed: {0}")]
    ReadingFailed(#[source] lp_media::Error),

    #[error("writing the video failed: {0}")]
    VideoWritingFailed(#[source] lp_media::Error),

    #[error("writing the audio failed: {0}")]
    AudioWritingFailed(#[source] lp_media::Error),

    #[error("setting up the writers failed: {0}")]
    WriterSetupFailed(#[source] lp_media::Error),

    #[error(transparent)]
    Metadata(#[from] InjectError),

    #[error(transparent)]
    Copy(#[from] CopyError),
}

/// Failure to produce a paired key photo.
#[derive(Debug, Error)]
pub enum PairedPhotoError {
    #[error("copying the photo to {} failed: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("reading the photo metadata failed: {source}")]
    MetadataRead {
        #[source]
        source: lp_media::Error,
        cleanup: Option<io::Error>,
    },

    #[error("writing the photo metadata failed: {source}")]
    MetadataWrite {
        #[source]
        source: lp_media::Error,
        cleanup: Option<io::Error>,
    },
}

impl PairedPhotoError {
    /// The error hit while removing the partial copy, if any.
    pub fn cleanup(&self) -> Option<&io::Error> {
        match self {
            PairedPhotoError::Copy { .. } => None,
            PairedPhotoError::MetadataRead { cleanup, .. }
            | PairedPhotoError::MetadataWrite { cleanup, .. } => cleanup.as_ref(),
        }
    }
}

/// Failure to produce a paired key video.
#[derive(Debug, Error)]
pub enum PairedVideoError {
    #[error("constructing the asset writer failed: {0}")]
    AssetWriterConstructionFailed(#[source] lp_media::Error),

    #[error(transparent)]
    Remux(#[from] RemuxError),
}

/// Failure to encode a full pair.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Photo(#[from] PairedPhotoError),

    #[error(transparent)]
    Video(#[from] PairedVideoError),
}

#[derive(Debug, Error)]
pub enum EncoderSetupError {
    #[error("destination is not a directory: {}", .path.display())]
    NotADirectory { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum DecoderSetupError {
    #[error("the asset has no photo resource")]
    MissingPhotoResource,

    #[error("the asset has no paired video resource")]
    MissingPairedVideoResource,

    #[error("destination is not a directory: {}", .path.display())]
    NotADirectory { path: PathBuf },
}

/// Failure to decode one component of a live photo.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("fetching the {kind} resource failed: {source}")]
    Fetch {
        kind: ComponentType,
        #[source]
        source: StoreError,
    },

    #[error("the {kind} carries no shared identifier")]
    MissingSharedIdentifier {
        kind: ComponentType,
        cleanup: Option<io::Error>,
    },

    #[error("the {kind} carries an unusable shared identifier: {source}")]
    InvalidSharedIdentifier {
        kind: ComponentType,
        #[source]
        source: lp_core::Error,
        cleanup: Option<io::Error>,
    },

    #[error("reading the identifier of the {kind} failed: {source}")]
    ReadingIdentifier {
        kind: ComponentType,
        #[source]
        source: io::Error,
        cleanup: Option<io::Error>,
    },

    #[error("writing the {kind} to {} failed: {source}", .path.display())]
    WritingToDisk {
        kind: ComponentType,
        path: PathBuf,
        #[source]
        source: StoreError,
        cleanup: Option<io::Error>,
    },
}

impl DecodeError {
    /// The error hit while removing the staged or partially written file,
    /// if any.
    pub fn cleanup(&self) -> Option<&io::Error> {
        match self {
            DecodeError::Fetch { source, .. } => source.cleanup(),
            DecodeError::MissingSharedIdentifier { cleanup, .. }
            | DecodeError::InvalidSharedIdentifier { cleanup, .. }
            | DecodeError::ReadingIdentifier { cleanup, .. } => cleanup.as_ref(),
            DecodeError::WritingToDisk {
                source, cleanup, ..
            } => cleanup.as_ref().or_else(|| source.cleanup()),
        }
    }
}

/// Failure to fetch a resource's bytes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("network access is not allowed for {url}")]
    NetworkAccessDenied { url: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("destination already exists: {}", .path.display())]
    DestinationExists { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transfer failed after `path` was created.
    #[error("transfer to {} was interrupted: {source}", .path.display())]
    Interrupted {
        path: PathBuf,
        #[source]
        source: Box<StoreError>,
        cleanup: Option<io::Error>,
    },
}

impl StoreError {
    /// The error hit while removing a partially written destination, if any.
    pub fn cleanup(&self) -> Option<&io::Error> {
        match self {
            StoreError::Interrupted { cleanup, .. } => cleanup.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_accessor_reports_removal_failure() {
        let err = PairedPhotoError::MetadataWrite {
            source: lp_media::Error::invalid_jpeg("bad"),
            cleanup: Some(io::Error::new(io::ErrorKind::PermissionDenied, "nope")),
        };
        assert_eq!(
            err.cleanup().map(io::Error::kind),
            Some(io::ErrorKind::PermissionDenied)
        );

        let err = DecodeError::MissingSharedIdentifier {
            kind: ComponentType::Photo,
            cleanup: None,
        };
        assert!(err.cleanup().is_none());
        assert_eq!(err.to_string(), "the photo carries no shared identifier");

        let err = DecodeError::Fetch {
            kind: ComponentType::Video,
            source: StoreError::Interrupted {
                path: PathBuf::from("/tmp/staged.mov"),
                source: Box::new(StoreError::Io(io::Error::new(io::ErrorKind::Other, "reset"))),
                cleanup: Some(io::Error::new(io::ErrorKind::PermissionDenied, "nope")),
            },
        };
        assert_eq!(
            err.cleanup().map(io::Error::kind),
            Some(io::ErrorKind::PermissionDenied)
        );
    }

    #[test]
    fn resolve_errors_keep_their_source() {
        let underlying: SharedError = Arc::new(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = ResolveError::LoadFailed(underlying);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("gone"));
        assert!(std::error::Error::source(&ResolveError::Unknown(None)).is_none());
    }
}

//! Content-addressed naming for paired components.
//!
//! Every component of a pair is stored as `{directory}/{identifier}.{ext}`;
//! the identifier is the sole join key between a photo and its video.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ids::SharedIdentifier;

/// The kind of file a paired component is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// The key photo (JPEG).
    Photo,
    /// The key video (QuickTime movie).
    Video,
    /// Audio extracted from the key video.
    ///
    /// The file is a QuickTime container holding the copied audio track,
    /// not an AIFF stream; only the `.aiff` extension is kept for naming.
    Audio,
}

impl ComponentKind {
    /// File extension used for this kind, without the leading dot.
    pub const fn extension(self) -> &'static str {
        match self {
            ComponentKind::Photo => "jpeg",
            ComponentKind::Video => "mov",
            ComponentKind::Audio => "aiff",
        }
    }
}

/// Build `{directory}/{identifier}.{extension}`.
///
/// Pure; callers are responsible for the directory existing.
pub fn content_addressed_path(
    directory: &Path,
    identifier: &SharedIdentifier,
    kind: ComponentKind,
) -> PathBuf {
    directory.join(format!("{}.{}", identifier, kind.extension()))
}

/// Whether `path` exists and is a directory.
pub fn is_directory(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Names files in one directory after a default shared identifier.
///
/// The default identifier is used whenever a caller does not supply one,
/// which is how the decoder gets a throwaway staging name before the real
/// identifier is known.
#[derive(Debug, Clone)]
pub struct PathNamer {
    directory: PathBuf,
    shared_identifier: SharedIdentifier,
}

impl PathNamer {
    /// Create a namer; `None` generates a fresh default identifier.
    pub fn new(directory: impl Into<PathBuf>, shared_identifier: Option<SharedIdentifier>) -> Self {
        Self {
            directory: directory.into(),
            shared_identifier: shared_identifier.unwrap_or_default(),
        }
    }

    /// The directory every path is placed in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The default identifier.
    pub fn shared_identifier(&self) -> &SharedIdentifier {
        &self.shared_identifier
    }

    /// Path for `kind` named after the default identifier.
    pub fn path(&self, kind: ComponentKind) -> PathBuf {
        self.path_for(None, kind)
    }

    /// Path for `kind` named after `identifier`, or the default one.
    pub fn path_for(&self, identifier: Option<&SharedIdentifier>, kind: ComponentKind) -> PathBuf {
        content_addressed_path(
            &self.directory,
            identifier.unwrap_or(&self.shared_identifier),
            kind,
        )
    }
}

//! Produces paired key photos and key videos under one destination
//! directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lp_core::{is_directory, ComponentKind, KeyPhoto, KeyVideo, PathNamer, SharedIdentifier};
use lp_media::jpeg::set_maker_apple_identifier;

use crate::cleanup::remove_quietly;
use crate::codec::{ImageMetadataCodec, JpegPropertiesCodec};
use crate::error::{EncodeError, EncoderSetupError, PairedPhotoError, PairedVideoError};
use crate::remux::{RemuxOptions, Remuxer};

/// Writes `{directory}/{identifier}.jpeg` and `{directory}/{identifier}.mov`
/// (plus `.aiff` when audio is extracted).
pub struct Encoder {
    directory: PathBuf,
    codec: Arc<dyn ImageMetadataCodec>,
    options: RemuxOptions,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("directory", &self.directory)
            .field("codec", &self.codec.name())
            .field("options", &self.options)
            .finish()
    }
}

impl Encoder {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, EncoderSetupError> {
        let directory = directory.into();
        if !is_directory(&directory) {
            return Err(EncoderSetupError::NotADirectory { path: directory });
        }
        Ok(Self {
            directory,
            codec: Arc::new(JpegPropertiesCodec),
            options: RemuxOptions::default(),
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageMetadataCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_options(mut self, options: RemuxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Copy `source` into place and stamp the identifier into its Apple
    /// maker dictionary. A copy whose metadata cannot be read or written is
    /// removed again.
    pub async fn key_photo(
        &self,
        source: &Path,
        identifier: &SharedIdentifier,
    ) -> Result<KeyPhoto, PairedPhotoError> {
        let destination =
            PathNamer::new(&self.directory, Some(identifier.clone())).path(ComponentKind::Photo);
        tracing::debug!(
            "Writing key photo {} -> {}",
            source.display(),
            destination.display()
        );

        let codec = Arc::clone(&self.codec);
        let source = source.to_path_buf();
        let target = destination.clone();
        let id = identifier.clone();
        tokio::task::spawn_blocking(move || write_key_photo(&*codec, &source, &target, &id))
            .await
            .map_err(|e| PairedPhotoError::Copy {
                path: destination.clone(),
                source: io::Error::other(e),
            })??;

        tracing::info!("Key photo written to {}", destination.display());
        Ok(KeyPhoto::new(identifier.clone(), destination))
    }

    /// Remux `source` into a key video carrying `identifier`.
    pub async fn key_video(
        &self,
        source: &Path,
        identifier: &SharedIdentifier,
    ) -> Result<KeyVideo, PairedVideoError> {
        let namer = PathNamer::new(&self.directory, Some(identifier.clone()));
        let audio_path = self
            .options
            .extract_audio
            .then(|| namer.path(ComponentKind::Audio));
        let remuxer = Remuxer::new(
            source,
            identifier.clone(),
            namer.path(ComponentKind::Video),
            audio_path,
            self.options.clone(),
        )
        .map_err(PairedVideoError::AssetWriterConstructionFailed)?;

        let output = remuxer.run().await?;
        Ok(KeyVideo::new(
            identifier.clone(),
            output.video_path,
            output.audio_path,
        ))
    }

    /// Encode both halves of a pair; a fresh identifier is generated when
    /// none is given.
    pub async fn encode(
        &self,
        photo: &Path,
        video: &Path,
        identifier: Option<SharedIdentifier>,
    ) -> Result<(KeyPhoto, KeyVideo), EncodeError> {
        let identifier = identifier.unwrap_or_else(SharedIdentifier::generate);
        tracing::info!("Encoding live photo {identifier}");
        let key_photo = self.key_photo(photo, &identifier).await?;
        let key_video = self.key_video(video, &identifier).await?;
        Ok((key_photo, key_video))
    }
}

fn write_key_photo(
    codec: &dyn ImageMetadataCodec,
    source: &Path,
    destination: &Path,
    identifier: &SharedIdentifier,
) -> Result<(), PairedPhotoError> {
    std::fs::copy(source, destination).map_err(|source| PairedPhotoError::Copy {
        path: destination.to_path_buf(),
        source,
    })?;

    let mut properties = match codec.read_properties(destination) {
        Ok(properties) => properties,
        Err(source) => {
            return Err(PairedPhotoError::MetadataRead {
                source,
                cleanup: remove_quietly(destination),
            })
        }
    };
    set_maker_apple_identifier(&mut properties, identifier.as_str());
    codec
        .write_properties(destination, &properties)
        .map_err(|source| PairedPhotoError::MetadataWrite {
            source,
            cleanup: remove_quietly(destination),
        })
}

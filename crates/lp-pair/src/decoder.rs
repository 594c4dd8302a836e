//! Recovers the key photo and key video of an existing live photo under
//! names derived from the identifier they carry.
//!
//! Each component is fetched to a staging file named after a throwaway
//! identifier, its shared identifier is read back out of the file, and
//! the staged file is copied to `{directory}/{identifier}.{ext}`. The
//! staged file is left in place after a successful decode.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lp_core::{is_directory, ComponentKind, KeyPhoto, KeyVideo, PathNamer, SharedIdentifier};
use lp_media::jpeg::maker_apple_identifier;
use lp_media::{MovFile, COMMON_KEY_IDENTIFIER};

use crate::cleanup::remove_quietly;
use crate::codec::{ImageMetadataCodec, JpegPropertiesCodec};
use crate::error::{DecodeError, DecoderSetupError};
use crate::store::{copy_to_new_file, AssetResource, AssetStore, LibraryAsset, ResourceKind};

/// Which half of a live photo is being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Photo,
    Video,
}

impl ComponentType {
    pub const fn component_kind(self) -> ComponentKind {
        match self {
            ComponentType::Photo => ComponentKind::Photo,
            ComponentType::Video => ComponentKind::Video,
        }
    }

    pub const fn resource_kind(self) -> ResourceKind {
        match self {
            ComponentType::Photo => ResourceKind::Photo,
            ComponentType::Video => ResourceKind::PairedVideo,
        }
    }

    /// Read the shared identifier stored in the file at `path`.
    ///
    /// Photos keep it under `{MakerApple}` → `"17"`; videos in the first
    /// metadata item, across all formats, whose common key is `identifier`.
    /// An unreadable file has no identifier.
    pub fn extract_identifier(
        self,
        path: &Path,
        codec: &dyn ImageMetadataCodec,
    ) -> Option<String> {
        match self {
            ComponentType::Photo => match codec.read_properties(path) {
                Ok(properties) => maker_apple_identifier(&properties).map(str::to_owned),
                Err(e) => {
                    tracing::debug!("Reading photo properties of {} failed: {e}", path.display());
                    None
                }
            },
            ComponentType::Video => match MovFile::open(path) {
                Ok(movie) => movie
                    .metadata_formats()
                    .into_iter()
                    .flat_map(|format| movie.metadata_for_format(format))
                    .find(|item| item.common_key() == Some(COMMON_KEY_IDENTIFIER))
                    .and_then(|item| item.value.as_str().map(str::to_owned)),
                Err(e) => {
                    tracing::debug!("Reading movie metadata of {} failed: {e}", path.display());
                    None
                }
            },
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentType::Photo => write!(f, "photo"),
            ComponentType::Video => write!(f, "video"),
        }
    }
}

/// Decodes one live-photo asset into a destination directory.
pub struct Decoder {
    photo: AssetResource,
    video: AssetResource,
    namer: PathNamer,
    store: Arc<dyn AssetStore>,
    codec: Arc<dyn ImageMetadataCodec>,
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("photo", &self.photo)
            .field("video", &self.video)
            .field("namer", &self.namer)
            .finish_non_exhaustive()
    }
}

impl Decoder {
    /// Only the first photo and the first paired-video resource are used.
    pub fn new(
        resources: &[AssetResource],
        directory: impl Into<PathBuf>,
        store: Arc<dyn AssetStore>,
    ) -> Result<Self, DecoderSetupError> {
        let first = |kind: ResourceKind| resources.iter().find(|r| r.kind() == kind).cloned();
        let photo = first(ComponentType::Photo.resource_kind())
            .ok_or(DecoderSetupError::MissingPhotoResource)?;
        let video = first(ComponentType::Video.resource_kind())
            .ok_or(DecoderSetupError::MissingPairedVideoResource)?;
        let directory = directory.into();
        if !is_directory(&directory) {
            return Err(DecoderSetupError::NotADirectory { path: directory });
        }
        Ok(Self {
            photo,
            video,
            namer: PathNamer::new(directory, None),
            store,
            codec: Arc::new(JpegPropertiesCodec),
        })
    }

    pub fn from_library_asset(
        asset: &LibraryAsset,
        directory: impl Into<PathBuf>,
        store: Arc<dyn AssetStore>,
    ) -> Result<Self, DecoderSetupError> {
        Self::new(asset.resources(), directory, store)
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageMetadataCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Where `component` is staged before its identifier is known.
    pub fn staging_path(&self, component: ComponentType) -> PathBuf {
        self.namer.path(component.component_kind())
    }

    pub async fn decode_key_photo(
        &self,
        allow_network_access: bool,
    ) -> Result<KeyPhoto, DecodeError> {
        let (identifier, path) = self
            .decode(ComponentType::Photo, allow_network_access)
            .await?;
        Ok(KeyPhoto::new(identifier, path))
    }

    /// The decoded video never reports an audio file.
    pub async fn decode_key_video(
        &self,
        allow_network_access: bool,
    ) -> Result<KeyVideo, DecodeError> {
        let (identifier, path) = self
            .decode(ComponentType::Video, allow_network_access)
            .await?;
        Ok(KeyVideo::new(identifier, path, None))
    }

    async fn decode(
        &self,
        component: ComponentType,
        allow_network_access: bool,
    ) -> Result<(SharedIdentifier, PathBuf), DecodeError> {
        let resource = match component {
            ComponentType::Photo => &self.photo,
            ComponentType::Video => &self.video,
        };
        let staged = self.staging_path(component);
        self.store
            .fetch_resource_bytes(resource, allow_network_access, &staged)
            .await
            .map_err(|source| DecodeError::Fetch {
                kind: component,
                source,
            })?;

        let codec = Arc::clone(&self.codec);
        let path = staged.clone();
        let extracted = match tokio::task::spawn_blocking(move || {
            component.extract_identifier(&path, &*codec)
        })
        .await
        {
            Ok(extracted) => extracted,
            Err(e) => {
                return Err(DecodeError::ReadingIdentifier {
                    kind: component,
                    source: io::Error::from(e),
                    cleanup: remove_quietly(&staged),
                })
            }
        };

        let Some(raw) = extracted else {
            return Err(DecodeError::MissingSharedIdentifier {
                kind: component,
                cleanup: remove_quietly(&staged),
            });
        };
        let identifier = match SharedIdentifier::parse(raw) {
            Ok(identifier) => identifier,
            Err(source) => {
                return Err(DecodeError::InvalidSharedIdentifier {
                    kind: component,
                    source,
                    cleanup: remove_quietly(&staged),
                })
            }
        };

        let destination = self
            .namer
            .path_for(Some(&identifier), component.component_kind());
        if let Err(source) = copy_to_new_file(&staged, &destination).await {
            return Err(DecodeError::WritingToDisk {
                kind: component,
                path: destination,
                source,
                cleanup: remove_quietly(&staged),
            });
        }

        tracing::info!(
            "Decoded {component} {identifier} to {}",
            destination.display()
        );
        Ok((identifier, destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::LocalAssetStore;
    use assert_matches::assert_matches;
    use lp_media::fixtures::{self, FixtureOptions};
    use std::time::Duration;

    fn store() -> Arc<dyn AssetStore> {
        Arc::new(LocalAssetStore::new(Duration::from_secs(5)).unwrap())
    }

    struct Library {
        _dir: tempfile::TempDir,
        resources: Vec<AssetResource>,
        out: PathBuf,
    }

    fn library(photo: Vec<u8>, video: &FixtureOptions) -> Library {
        let dir = tempfile::tempdir().unwrap();
        let photo_path = dir.path().join("IMG_0001.JPG");
        std::fs::write(&photo_path, photo).unwrap();
        let video_path = dir.path().join("IMG_0001.MOV");
        fixtures::write_movie(&video_path, video).unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        Library {
            resources: vec![
                AssetResource::local(ResourceKind::Other, dir.path().join("IMG_0001.AAE")),
                AssetResource::local(ResourceKind::Photo, photo_path),
                AssetResource::local(ResourceKind::PairedVideo, video_path),
            ],
            out,
            _dir: dir,
        }
    }

    fn tagged_video() -> FixtureOptions {
        FixtureOptions {
            content_identifier: Some("ABC-123".into()),
            ..FixtureOptions::silent()
        }
    }

    #[test]
    fn construction_requires_both_resources_and_a_directory() {
        let lib = library(fixtures::jpeg_bytes(8, 8), &tagged_video());
        assert_matches!(
            Decoder::new(&lib.resources[2..], &lib.out, store()),
            Err(DecoderSetupError::MissingPhotoResource)
        );
        assert_matches!(
            Decoder::new(&lib.resources[..2], &lib.out, store()),
            Err(DecoderSetupError::MissingPairedVideoResource)
        );
        assert_matches!(
            Decoder::new(&lib.resources, lib.out.join("missing"), store()),
            Err(DecoderSetupError::NotADirectory { .. })
        );
    }

    #[tokio::test]
    async fn decodes_both_components() {
        let lib = library(fixtures::apple_jpeg_bytes(8, 8, "ABC-123"), &tagged_video());
        let decoder = Decoder::new(&lib.resources, &lib.out, store()).unwrap();

        let photo = decoder.decode_key_photo(false).await.unwrap();
        assert_eq!(photo.shared_identifier().as_str(), "ABC-123");
        assert_eq!(photo.file_location(), lib.out.join("ABC-123.jpeg"));

        let video = decoder.decode_key_video(false).await.unwrap();
        assert_eq!(video.shared_identifier().as_str(), "ABC-123");
        assert_eq!(video.file_location(), lib.out.join("ABC-123.mov"));
        assert!(video.audio_file_location().is_none());

        // Staged copies stay behind.
        assert!(decoder.staging_path(ComponentType::Photo).exists());
        assert!(decoder.staging_path(ComponentType::Video).exists());
    }

    #[tokio::test]
    async fn missing_identifier_removes_staged_file() {
        let lib = library(fixtures::jpeg_bytes(8, 8), &FixtureOptions::silent());
        let decoder = Decoder::new(&lib.resources, &lib.out, store()).unwrap();

        let err = decoder.decode_key_photo(false).await.unwrap_err();
        assert_matches!(
            err,
            DecodeError::MissingSharedIdentifier {
                kind: ComponentType::Photo,
                cleanup: None
            }
        );
        assert!(!decoder.staging_path(ComponentType::Photo).exists());

        let err = decoder.decode_key_video(false).await.unwrap_err();
        assert_matches!(
            err,
            DecodeError::MissingSharedIdentifier {
                kind: ComponentType::Video,
                ..
            }
        );
        assert!(!decoder.staging_path(ComponentType::Video).exists());
    }

    #[tokio::test]
    async fn unusable_identifier_is_rejected() {
        let lib = library(fixtures::apple_jpeg_bytes(8, 8, "../escape"), &tagged_video());
        let decoder = Decoder::new(&lib.resources, &lib.out, store()).unwrap();
        let err = decoder.decode_key_photo(false).await.unwrap_err();
        assert_matches!(err, DecodeError::InvalidSharedIdentifier { .. });
        assert!(!decoder.staging_path(ComponentType::Photo).exists());
    }

    #[tokio::test]
    async fn existing_destination_is_a_write_failure() {
        let lib = library(fixtures::apple_jpeg_bytes(8, 8, "ABC-123"), &tagged_video());
        std::fs::write(lib.out.join("ABC-123.jpeg"), b"taken").unwrap();
        let decoder = Decoder::new(&lib.resources, &lib.out, store()).unwrap();

        let err = decoder.decode_key_photo(false).await.unwrap_err();
        assert_matches!(
            err,
            DecodeError::WritingToDisk {
                source: StoreError::DestinationExists { .. },
                cleanup: None,
                ..
            }
        );
        assert!(!decoder.staging_path(ComponentType::Photo).exists());
        assert_eq!(std::fs::read(lib.out.join("ABC-123.jpeg")).unwrap(), b"taken");
    }

    struct PanickingCodec;

    impl ImageMetadataCodec for PanickingCodec {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn read_properties(&self, _path: &Path) -> lp_media::Result<lp_media::jpeg::Properties> {
            panic!("codec crashed")
        }

        fn write_properties(
            &self,
            _path: &Path,
            _properties: &lp_media::jpeg::Properties,
        ) -> lp_media::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn crashed_extraction_is_a_read_failure() {
        let lib = library(fixtures::apple_jpeg_bytes(8, 8, "ABC-123"), &tagged_video());
        let decoder = Decoder::new(&lib.resources, &lib.out, store())
            .unwrap()
            .with_codec(Arc::new(PanickingCodec));

        let err = decoder.decode_key_photo(false).await.unwrap_err();
        assert_matches!(
            err,
            DecodeError::ReadingIdentifier {
                kind: ComponentType::Photo,
                cleanup: None,
                ..
            }
        );
        assert!(!decoder.staging_path(ComponentType::Photo).exists());
    }

    #[tokio::test]
    async fn missing_resource_is_a_fetch_failure() {
        let lib = library(fixtures::jpeg_bytes(8, 8), &tagged_video());
        let resources = vec![
            AssetResource::local(ResourceKind::Photo, lib.out.join("gone.jpg")),
            lib.resources[2].clone(),
        ];
        let decoder = Decoder::new(&resources, &lib.out, store()).unwrap();
        let err = decoder.decode_key_photo(false).await.unwrap_err();
        assert_matches!(
            err,
            DecodeError::Fetch {
                kind: ComponentType::Photo,
                ..
            }
        );
    }
}

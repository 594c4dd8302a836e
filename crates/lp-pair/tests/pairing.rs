//! Encode/decode integration tests for lp-pair.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use lp_core::config::VideoCodec;
use lp_core::{MediaType, SharedIdentifier};
use lp_media::fixtures::{self, FixtureOptions};
use lp_media::{jpeg, MovFile};
use lp_pair::orientation::{AffineTransform, HomeButton};
use lp_pair::{
    locate_still_image_anchor, AssetResource, Decoder, DirectoryLibrary, EncodeError, Encoder,
    LocalAssetStore, PairedVideoError, RemuxError, RemuxOptions, ResourceKind,
};

fn write_sources(dir: &Path, movie: &FixtureOptions) -> (std::path::PathBuf, std::path::PathBuf) {
    let photo = dir.join("IMG_0001.JPG");
    std::fs::write(&photo, fixtures::jpeg_bytes(64, 48)).unwrap();
    let video = dir.join("IMG_0001.MOV");
    fixtures::write_movie(&video, movie).unwrap();
    (photo, video)
}

fn store() -> Arc<LocalAssetStore> {
    Arc::new(LocalAssetStore::new(Duration::from_secs(5)).unwrap())
}

#[tokio::test]
async fn silent_clip_encodes_and_decodes_to_the_same_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let (photo, video) = write_sources(dir.path(), &FixtureOptions::silent());
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let identifier = SharedIdentifier::parse("abc123").unwrap();
    let (key_photo, key_video) = Encoder::new(&out)
        .unwrap()
        .encode(&photo, &video, Some(identifier))
        .await
        .unwrap();
    assert_eq!(key_photo.file_location(), out.join("abc123.jpeg"));
    assert_eq!(key_video.file_location(), out.join("abc123.mov"));
    assert!(key_video.audio_file_location().is_none());
    assert!(!out.join("abc123.aiff").exists());

    let decoded_dir = dir.path().join("decoded");
    std::fs::create_dir(&decoded_dir).unwrap();
    let resources = [
        AssetResource::local(ResourceKind::Photo, key_photo.file_location()),
        AssetResource::local(ResourceKind::PairedVideo, key_video.file_location()),
    ];
    let decoder = Decoder::new(&resources, &decoded_dir, store()).unwrap();
    let photo = decoder.decode_key_photo(false).await.unwrap();
    let video = decoder.decode_key_video(false).await.unwrap();
    assert_eq!(photo.shared_identifier().as_str(), "abc123");
    assert_eq!(video.shared_identifier().as_str(), "abc123");
    assert_eq!(photo.file_location(), decoded_dir.join("abc123.jpeg"));
    assert_eq!(video.file_location(), decoded_dir.join("abc123.mov"));
}

#[tokio::test]
async fn generated_identifier_joins_both_components() {
    let dir = tempfile::tempdir().unwrap();
    let (photo, video) = write_sources(dir.path(), &FixtureOptions::default());
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let (key_photo, key_video) = Encoder::new(&out)
        .unwrap()
        .encode(&photo, &video, None)
        .await
        .unwrap();
    assert_eq!(key_photo.shared_identifier(), key_video.shared_identifier());
    let id = key_photo.shared_identifier().as_str();

    let props = jpeg::read_properties(key_photo.file_location()).unwrap();
    assert_eq!(jpeg::maker_apple_identifier(&props), Some(id));

    let movie = MovFile::open(key_video.file_location()).unwrap();
    assert_eq!(movie.metadata.len(), 1);
    assert_eq!(movie.metadata[0].value.as_str(), Some(id));
}

#[tokio::test]
async fn audio_is_extracted_alongside_the_movie() {
    let dir = tempfile::tempdir().unwrap();
    let (_, video) = write_sources(dir.path(), &FixtureOptions::default());
    let identifier = SharedIdentifier::parse("with-audio").unwrap();

    let key_video = Encoder::new(dir.path())
        .unwrap()
        .key_video(&video, &identifier)
        .await
        .unwrap();
    let audio = key_video.audio_file_location().unwrap();
    assert_eq!(audio, dir.path().join("with-audio.aiff"));

    let audio_movie = MovFile::open(audio).unwrap();
    assert_eq!(audio_movie.tracks_of(MediaType::Audio).count(), 1);
    assert_eq!(audio_movie.tracks_of(MediaType::Video).count(), 0);

    let movie = MovFile::open(key_video.file_location()).unwrap();
    let source = MovFile::open(&video).unwrap();
    let copied = movie.tracks_of(MediaType::Audio).next().unwrap();
    let original = source.tracks_of(MediaType::Audio).next().unwrap();
    assert_eq!(copied.sample_table.len(), original.sample_table.len());
    assert_eq!(copied.sample_rate, original.sample_rate);
}

#[tokio::test]
async fn audio_extraction_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let (_, video) = write_sources(dir.path(), &FixtureOptions::default());
    let identifier = SharedIdentifier::parse("no-extract").unwrap();

    let key_video = Encoder::new(dir.path())
        .unwrap()
        .with_options(RemuxOptions {
            extract_audio: false,
            ..RemuxOptions::default()
        })
        .key_video(&video, &identifier)
        .await
        .unwrap();
    assert!(key_video.audio_file_location().is_none());
    let movie = MovFile::open(key_video.file_location()).unwrap();
    assert_eq!(movie.tracks_of(MediaType::Audio).count(), 1);
}

#[tokio::test]
async fn still_image_anchor_sits_at_the_midpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (_, video) = write_sources(dir.path(), &FixtureOptions::silent());
    let identifier = SharedIdentifier::parse("anchor").unwrap();

    let key_video = Encoder::new(dir.path())
        .unwrap()
        .key_video(&video, &identifier)
        .await
        .unwrap();
    let anchor = locate_still_image_anchor(key_video.file_location())
        .unwrap()
        .unwrap();
    // One second at 30 fps.
    assert!((anchor.start.seconds() - 0.5).abs() < 1e-9);
    assert!((anchor.duration.seconds() - 1.0 / 30.0).abs() < 1e-9);
}

#[tokio::test]
async fn preferred_transform_survives_the_remux() {
    let dir = tempfile::tempdir().unwrap();
    let portrait = AffineTransform::new(0.0, 1.0, -1.0, 0.0, 48.0, 0.0);
    let (_, video) = write_sources(
        dir.path(),
        &FixtureOptions {
            matrix: portrait.to_matrix(),
            ..FixtureOptions::silent()
        },
    );
    let identifier = SharedIdentifier::parse("portrait").unwrap();

    let key_video = Encoder::new(dir.path())
        .unwrap()
        .key_video(&video, &identifier)
        .await
        .unwrap();
    let movie = MovFile::open(key_video.file_location()).unwrap();
    let track = movie.tracks_of(MediaType::Video).next().unwrap();
    assert_eq!(track.matrix, portrait.to_matrix());
    assert_eq!(
        AffineTransform::from_matrix(&track.matrix).home_button(),
        HomeButton::Down
    );
}

#[tokio::test]
async fn hevc_source_needs_a_matching_codec() {
    let dir = tempfile::tempdir().unwrap();
    let hevc = FixtureOptions {
        codec: *b"hvc1",
        ..FixtureOptions::silent()
    };
    let (photo, video) = write_sources(dir.path(), &hevc);
    let identifier = SharedIdentifier::parse("hevc").unwrap();

    let err = Encoder::new(dir.path())
        .unwrap()
        .encode(&photo, &video, Some(identifier.clone()))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        EncodeError::Video(PairedVideoError::Remux(RemuxError::WriterSetupFailed(_)))
    );
    assert!(!dir.path().join("hevc.mov").exists());

    std::fs::remove_file(dir.path().join("hevc.jpeg")).unwrap();
    let key_video = Encoder::new(dir.path())
        .unwrap()
        .with_options(RemuxOptions {
            video_codec: VideoCodec::Hevc,
            ..RemuxOptions::default()
        })
        .key_video(&video, &identifier)
        .await
        .unwrap();
    let movie = MovFile::open(key_video.file_location()).unwrap();
    let track = movie.tracks_of(MediaType::Video).next().unwrap();
    assert_eq!(track.sample_entry.as_ref().unwrap().fourcc, *b"hvc1");
}

#[tokio::test]
async fn library_scan_feeds_the_decoder() {
    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("library");
    std::fs::create_dir(&library).unwrap();
    std::fs::write(
        library.join("IMG_0042.JPG"),
        fixtures::apple_jpeg_bytes(32, 24, "LIB-42"),
    )
    .unwrap();
    fixtures::write_movie(
        &library.join("IMG_0042.MOV"),
        &FixtureOptions {
            content_identifier: Some("LIB-42".into()),
            ..FixtureOptions::silent()
        },
    )
    .unwrap();
    std::fs::write(library.join("IMG_0043.JPG"), fixtures::jpeg_bytes(8, 8)).unwrap();

    let asset = DirectoryLibrary::new(&library)
        .first_live_photo()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(asset.stem(), "IMG_0042");

    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();
    let decoder = Decoder::from_library_asset(&asset, &out, store()).unwrap();
    let photo = decoder.decode_key_photo(false).await.unwrap();
    let video = decoder.decode_key_video(false).await.unwrap();
    assert_eq!(photo.file_location(), out.join("LIB-42.jpeg"));
    assert_eq!(video.file_location(), out.join("LIB-42.mov"));
}

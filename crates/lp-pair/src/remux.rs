//! One key-video encode pass.
//!
//! The [`Remuxer`] resolves the source's tracks, wires a visual and an
//! audio [`SampleCopier`] plus the [`MetadataInjector`] into the primary
//! writer (and the audio copier into the optional audio-only writer),
//! starts both sessions at zero, injects the anchor, then drives both
//! copies concurrently and finishes the primary movie once they are done.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lp_core::config::{RemuxConfig, VideoCodec};
use lp_core::{MediaTime, MediaType, SharedIdentifier};
use lp_media::mov::writer::MOVIE_TIMESCALE;
use lp_media::{Error as MediaError, Matrix, SampleEntry, TrackSpec};

use crate::asset::MovAsset;
use crate::copier::{CopyStats, SampleCopier, SampleSink, SampleSource, TeeSink, TrackKind};
use crate::demux::MovDemuxer;
use crate::error::{RemuxError, ResolveError};
use crate::injector::{MetadataInjector, StillImageAnchor};
use crate::mux::{AssetWriter, WriterInput, DEFAULT_INTERLEAVE_WINDOW};
use crate::resolver::{ResolvedTrackSet, TrackResolver};
use crate::track::AssetLoader;

/// How many times the driver triggers resolution before giving up.
const MAX_RESOLVE_ATTEMPTS: u32 = 1;

#[derive(Debug, Clone)]
pub struct RemuxOptions {
    pub extract_audio: bool,
    pub video_codec: VideoCodec,
    pub interleave_window: Duration,
    pub poll_interval: Duration,
}

impl Default for RemuxOptions {
    fn default() -> Self {
        Self {
            extract_audio: true,
            video_codec: VideoCodec::default(),
            interleave_window: DEFAULT_INTERLEAVE_WINDOW,
            poll_interval: Duration::from_millis(2),
        }
    }
}

impl From<&RemuxConfig> for RemuxOptions {
    fn from(config: &RemuxConfig) -> Self {
        Self {
            extract_audio: config.extract_audio,
            video_codec: config.video_codec,
            interleave_window: config.interleave_window(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// What a finished pass produced.
#[derive(Debug, Clone)]
pub struct RemuxOutput {
    pub video_path: PathBuf,
    /// Set only when audio was extracted.
    pub audio_path: Option<PathBuf>,
    pub anchor: StillImageAnchor,
    pub visual: CopyStats,
    pub audio: CopyStats,
}

struct Pipeline {
    visual: SampleCopier,
    audio: SampleCopier,
    injector: MetadataInjector,
    audio_only: Option<WriterInput>,
}

/// Remuxes one source clip into a paired key video.
pub struct Remuxer {
    source: PathBuf,
    identifier: SharedIdentifier,
    resolver: TrackResolver,
    writer: AssetWriter,
    audio_writer: Option<AssetWriter>,
    options: RemuxOptions,
}

#[cfg(test)]
impl std::fmt::Debug for Remuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remuxer")
            .field("source", &self.source)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Remuxer {
    /// Prepare the writers. Fails if an output already exists or its
    /// directory is missing; nothing is written yet.
    pub fn new(
        source: impl Into<PathBuf>,
        identifier: SharedIdentifier,
        video_path: impl Into<PathBuf>,
        audio_path: Option<PathBuf>,
        options: RemuxOptions,
    ) -> Result<Self, MediaError> {
        let source = source.into();
        let writer = AssetWriter::create(video_path, options.interleave_window)?;
        let audio_writer = match audio_path.filter(|_| options.extract_audio) {
            Some(path) => Some(AssetWriter::create(path, options.interleave_window)?),
            None => None,
        };
        Ok(Self {
            resolver: TrackResolver::new(Arc::new(MovAsset::new(&source))),
            source,
            identifier,
            writer,
            audio_writer,
            options,
        })
    }

    /// Resolve tracks through `loader` instead of parsing the source.
    pub fn with_loader(mut self, loader: Arc<dyn AssetLoader>) -> Self {
        self.resolver = TrackResolver::new(loader);
        self
    }

    pub fn resolver(&self) -> &TrackResolver {
        &self.resolver
    }

    pub async fn run(self) -> Result<RemuxOutput, RemuxError> {
        let tracks = self.resolve_tracks().await?;
        tracing::info!(
            source = %self.source.display(),
            frames = tracks.estimated_frame_count,
            audio = tracks.audio.is_some(),
            "Remuxing key video"
        );

        let source = self.source.clone();
        let mut demuxer = match tokio::task::spawn_blocking(move || MovDemuxer::open(source)).await {
            Ok(Ok(demuxer)) => demuxer,
            Ok(Err(e)) => return Err(self.abort(RemuxError::ReadingFailed(e))),
            Err(e) => {
                let e = MediaError::Io(io::Error::other(e));
                return Err(self.abort(RemuxError::ReadingFailed(e)));
            }
        };

        let mut pipeline = match self.build_pipeline(&tracks, &mut demuxer) {
            Ok(pipeline) => pipeline,
            Err(e) => return Err(self.abort(e)),
        };

        if let Err(e) = self.start_sessions() {
            return Err(self.abort(RemuxError::WriterSetupFailed(e)));
        }
        if let Err(e) = pipeline.injector.copy() {
            return Err(self.abort(RemuxError::Metadata(e)));
        }
        if let Err(e) = demuxer.start_reading() {
            return Err(self.abort(RemuxError::ReadingFailed(e)));
        }

        let (visual, audio) = tokio::join!(pipeline.visual.copy(), pipeline.audio.copy());
        let visual = visual?;
        let audio = audio?;

        if let Some(e) = demuxer.take_error() {
            return Err(RemuxError::VideoWritingFailed(e));
        }
        self.writer
            .finish_writing()
            .await
            .map_err(RemuxError::VideoWritingFailed)?;

        let audio_path = match (&self.audio_writer, &pipeline.audio_only) {
            (Some(writer), Some(input)) if input.samples_appended() > 0 => {
                writer
                    .finish_writing()
                    .await
                    .map_err(RemuxError::AudioWritingFailed)?;
                Some(writer.path().to_path_buf())
            }
            (Some(writer), _) => {
                tracing::debug!("No audio copied; dropping {}", writer.path().display());
                writer.cancel_writing();
                None
            }
            (None, _) => None,
        };

        tracing::info!(
            video = %self.writer.path().display(),
            frames = visual.appended,
            audio_samples = audio.appended,
            "Key video written"
        );
        Ok(RemuxOutput {
            video_path: self.writer.path().to_path_buf(),
            audio_path,
            anchor: pipeline.injector.anchor(),
            visual,
            audio,
        })
    }

    /// Drive resolution to a terminal state, triggering the load at most
    /// `MAX_RESOLVE_ATTEMPTS` times.
    async fn resolve_tracks(&self) -> Result<ResolvedTrackSet, RemuxError> {
        let mut attempts = 0;
        loop {
            match self.resolver.outcome() {
                Some(Ok(tracks)) => return Ok(tracks.clone()),
                Some(Err(e)) => return Err(RemuxError::LoadingTracksFailed(e.clone())),
                None if attempts < MAX_RESOLVE_ATTEMPTS => {
                    attempts += 1;
                    tracing::debug!(state = ?self.resolver.state(), "Resolving tracks");
                    // The memoized outcome is read back on the next turn.
                    let _ = self.resolver.resolve().await;
                }
                None => return Err(RemuxError::LoadingTracksFailed(ResolveError::LoadBusy)),
            }
        }
    }

    fn build_pipeline(
        &self,
        tracks: &ResolvedTrackSet,
        demuxer: &mut MovDemuxer,
    ) -> Result<Pipeline, RemuxError> {
        let codec = self.options.video_codec;
        let poll = self.options.poll_interval;

        let visual_spec = TrackKind::Visual
            .output_spec(&tracks.visual, codec)
            .map_err(RemuxError::WriterSetupFailed)?;
        let visual_input = self
            .writer
            .add_input(visual_spec)
            .map_err(RemuxError::WriterSetupFailed)?;
        let visual_output = demuxer
            .add_output(tracks.visual.track_id)
            .map_err(RemuxError::ReadingFailed)?;
        let visual = SampleCopier::new(
            TrackKind::Visual,
            Some(Box::new(visual_output)),
            Arc::new(visual_input),
            poll,
        );

        let audio_spec = match &tracks.audio {
            Some(track) => TrackKind::Audio
                .output_spec(track, codec)
                .map_err(RemuxError::WriterSetupFailed)?,
            None => silent_audio_spec(),
        };
        let primary_audio = self
            .writer
            .add_input(audio_spec.clone())
            .map_err(RemuxError::WriterSetupFailed)?;
        let mut sinks: Vec<Arc<dyn SampleSink>> = vec![Arc::new(primary_audio)];
        let audio_only = match &self.audio_writer {
            Some(writer) => {
                let input = writer
                    .add_input(audio_spec)
                    .map_err(RemuxError::WriterSetupFailed)?;
                sinks.push(Arc::new(input.clone()));
                Some(input)
            }
            None => None,
        };
        let audio_source: Option<Box<dyn SampleSource>> = match &tracks.audio {
            Some(track) => Some(Box::new(
                demuxer
                    .add_output(track.track_id)
                    .map_err(RemuxError::ReadingFailed)?,
            )),
            None => None,
        };
        let audio = SampleCopier::new(
            TrackKind::Audio,
            audio_source,
            Arc::new(TeeSink::new(sinks)),
            poll,
        );

        let mut injector = MetadataInjector::new(
            self.identifier.clone(),
            tracks.duration,
            tracks.estimated_frame_count,
        );
        injector
            .attach(&self.writer)
            .map_err(RemuxError::WriterSetupFailed)?;

        Ok(Pipeline {
            visual,
            audio,
            injector,
            audio_only,
        })
    }

    fn start_sessions(&self) -> Result<(), MediaError> {
        if let Some(writer) = &self.audio_writer {
            writer.start_writing()?;
            writer.start_session(MediaTime::ZERO);
        }
        self.writer.start_writing()?;
        self.writer.start_session(MediaTime::ZERO);
        Ok(())
    }

    /// Cancel every writer before reporting `error`.
    fn abort(&self, error: RemuxError) -> RemuxError {
        tracing::debug!("Aborting remux: {error}");
        self.writer.cancel_writing();
        if let Some(writer) = &self.audio_writer {
            writer.cancel_writing();
        }
        error
    }
}

/// Audio input declared for a source without audio. It never receives a
/// sample, so it is left out of the finished movie.
fn silent_audio_spec() -> TrackSpec {
    TrackSpec {
        media_type: MediaType::Audio,
        timescale: MOVIE_TIMESCALE,
        sample_entry: SampleEntry {
            fourcc: *b"sowt",
            raw: Vec::new(),
        },
        width: 0,
        height: 0,
        matrix: Matrix::IDENTITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::LoadStatus;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use lp_media::fixtures::{self, FixtureOptions};
    use lp_media::MovFile;
    use std::path::Path;

    fn identifier() -> SharedIdentifier {
        SharedIdentifier::parse("abc123").unwrap()
    }

    fn remuxer(dir: &Path, opts: &FixtureOptions, options: RemuxOptions) -> Remuxer {
        let source = dir.join("source.mov");
        fixtures::write_movie(&source, opts).unwrap();
        Remuxer::new(
            source,
            identifier(),
            dir.join("abc123.mov"),
            Some(dir.join("abc123.aiff")),
            options,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn remux_copies_tracks_and_injects_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let output = remuxer(dir.path(), &FixtureOptions::default(), RemuxOptions::default())
            .run()
            .await
            .unwrap();
        assert_eq!(output.visual.appended, 30);
        assert_eq!(output.audio.appended, 10);

        let movie = MovFile::open(&output.video_path).unwrap();
        assert_eq!(movie.tracks_of(MediaType::Video).count(), 1);
        assert_eq!(movie.tracks_of(MediaType::Audio).count(), 1);
        assert_eq!(movie.tracks_of(MediaType::Metadata).count(), 1);
        assert_eq!(movie.metadata[0].value.as_str(), Some("abc123"));

        let audio_path = output.audio_path.unwrap();
        let audio = MovFile::open(&audio_path).unwrap();
        assert_eq!(audio.tracks.len(), 1);
        assert_eq!(audio.tracks[0].sample_table.len(), 10);
    }

    #[tokio::test]
    async fn silent_source_reports_no_audio() {
        let dir = tempfile::tempdir().unwrap();
        let output = remuxer(dir.path(), &FixtureOptions::silent(), RemuxOptions::default())
            .run()
            .await
            .unwrap();
        assert!(output.audio_path.is_none());
        assert!(!dir.path().join("abc123.aiff").exists());
        let movie = MovFile::open(&output.video_path).unwrap();
        assert_eq!(movie.tracks_of(MediaType::Audio).count(), 0);
    }

    #[tokio::test]
    async fn codec_mismatch_fails_setup_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let opts = FixtureOptions {
            codec: *b"hvc1",
            ..FixtureOptions::default()
        };
        let err = remuxer(dir.path(), &opts, RemuxOptions::default())
            .run()
            .await
            .unwrap_err();
        assert_matches!(err, RemuxError::WriterSetupFailed(_));
        assert!(!dir.path().join("abc123.mov").exists());
    }

    #[tokio::test]
    async fn unreadable_media_fails_the_start_and_removes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let remuxer = remuxer(dir.path(), &FixtureOptions::default(), RemuxOptions::default());
        fixtures::patch_sample_table(&dir.path().join("source.mov"), 0, b"stco", 3, 0x7FFF_FFF0)
            .unwrap();

        let err = remuxer.run().await.unwrap_err();
        assert_matches!(err, RemuxError::ReadingFailed(MediaError::InvalidMovie(_)));
        assert!(!dir.path().join("abc123.mov").exists());
        assert!(!dir.path().join("abc123.aiff").exists());
    }

    #[tokio::test]
    async fn read_error_during_copy_fails_the_video() {
        let dir = tempfile::tempdir().unwrap();
        let remuxer = remuxer(dir.path(), &FixtureOptions::default(), RemuxOptions::default());
        fixtures::patch_sample_table(&dir.path().join("source.mov"), 0, b"stsz", 12, 0x7FFF_FFFF)
            .unwrap();

        let err = remuxer.run().await.unwrap_err();
        assert_matches!(err, RemuxError::VideoWritingFailed(MediaError::InvalidMovie(_)));
        // Partial outputs are left where they are.
        assert!(dir.path().join("abc123.mov").exists());
        assert!(MovFile::open(dir.path().join("abc123.mov")).is_err());
    }

    struct Busy;

    #[async_trait]
    impl AssetLoader for Busy {
        async fn load(&self) -> LoadStatus {
            LoadStatus::Loading
        }
    }

    #[tokio::test]
    async fn load_failures_surface_as_loading_tracks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let err = remuxer(dir.path(), &FixtureOptions::default(), RemuxOptions::default())
            .with_loader(Arc::new(Busy))
            .run()
            .await
            .unwrap_err();
        assert_matches!(err, RemuxError::LoadingTracksFailed(ResolveError::LoadBusy));
        assert!(!dir.path().join("abc123.mov").exists());
    }

    #[test]
    fn refuses_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc123.mov"), b"taken").unwrap();
        let result = Remuxer::new(
            dir.path().join("source.mov"),
            identifier(),
            dir.path().join("abc123.mov"),
            None,
            RemuxOptions::default(),
        );
        assert_matches!(result, Err(MediaError::OutputExists(_)));
    }
}

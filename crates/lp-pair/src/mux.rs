//! Multi-input movie writer with interleaving backpressure.
//!
//! An [`AssetWriter`] owns one output movie; each track is fed through a
//! [`WriterInput`] handle that copy loops on other threads append to. An
//! input stops being ready while it runs more than the interleave window
//! ahead of the slowest unfinished input of the same writer.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lp_core::{MediaTime, MediaType};
use lp_media::{Error, MetadataItem, MovWriter, Result, Sample, TrackSpec};
use parking_lot::Mutex;

use crate::copier::{Readiness, SampleSink};

/// Default interleave window.
pub const DEFAULT_INTERLEAVE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    /// Inputs can still be added.
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug)]
struct InputState {
    track_id: u32,
    media_type: MediaType,
    finished: bool,
    /// End of the latest appended sample.
    end: MediaTime,
    appended: usize,
}

#[derive(Debug)]
struct Inner {
    movie: MovWriter,
    status: WriterStatus,
    session: Option<MediaTime>,
    inputs: Vec<InputState>,
    window: MediaTime,
    failure: Option<Error>,
}

impl Inner {
    fn readiness(&self, index: usize) -> Readiness {
        match self.status {
            WriterStatus::Writing => {}
            WriterStatus::Unknown => return Readiness::NotReady,
            _ => return Readiness::Closed,
        }
        let input = &self.inputs[index];
        if input.finished {
            return Readiness::Closed;
        }
        if self.session.is_none() {
            return Readiness::NotReady;
        }
        let slowest = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(i, other)| *i != index && !other.finished)
            .map(|(_, other)| other.end)
            .min();
        match slowest {
            Some(slowest) if input.end > slowest.add(self.window) => Readiness::NotReady,
            _ => Readiness::Ready,
        }
    }

    fn append(&mut self, index: usize, sample: &Sample) -> bool {
        if self.status != WriterStatus::Writing || self.inputs[index].finished {
            return false;
        }
        let track_id = self.inputs[index].track_id;
        match self.movie.write_sample(track_id, sample) {
            Ok(()) => {
                let input = &mut self.inputs[index];
                input.appended += 1;
                let end = sample.decode_timestamp().add(sample.duration_time());
                if end > input.end {
                    input.end = end;
                }
                true
            }
            Err(e @ (Error::OutOfOrder { .. } | Error::UnknownTrack(_))) => {
                tracing::debug!(track_id, "Rejected sample: {e}");
                false
            }
            Err(e) => {
                tracing::warn!("Writing {} failed: {e}", self.movie.path().display());
                self.status = WriterStatus::Failed;
                self.failure = Some(e);
                false
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self.status {
            WriterStatus::Writing => {}
            WriterStatus::Failed => {
                return Err(self
                    .failure
                    .take()
                    .unwrap_or_else(|| Error::writer_state("failed", "finish")));
            }
            _ => return Err(Error::writer_state("not writing", "finish")),
        }
        for input in &mut self.inputs {
            input.finished = true;
        }
        match self.movie.finish() {
            Ok(()) => {
                self.status = WriterStatus::Completed;
                Ok(())
            }
            Err(e) => {
                self.status = WriterStatus::Failed;
                Err(e)
            }
        }
    }
}

/// Writes one output movie from several concurrently fed inputs.
#[derive(Debug, Clone)]
pub struct AssetWriter {
    inner: Arc<Mutex<Inner>>,
    path: PathBuf,
}

impl AssetWriter {
    /// Prepare a writer for `path`. Fails if `path` exists or its parent
    /// directory does not.
    pub fn create(path: impl Into<PathBuf>, interleave_window: Duration) -> Result<Self> {
        let path = path.into();
        let movie = MovWriter::create(&path)?;
        let millis = i64::try_from(interleave_window.as_millis()).unwrap_or(i64::MAX);
        let window = MediaTime::new(millis, 1000);
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                movie,
                status: WriterStatus::Unknown,
                session: None,
                inputs: Vec::new(),
                window,
                failure: None,
            })),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> WriterStatus {
        self.inner.lock().status
    }

    /// Add an input for one output track; only before writing starts.
    pub fn add_input(&self, spec: TrackSpec) -> Result<WriterInput> {
        let mut inner = self.inner.lock();
        if inner.status != WriterStatus::Unknown {
            return Err(Error::writer_state("writing", "add inputs"));
        }
        let media_type = spec.media_type;
        let track_id = inner.movie.add_track(spec)?;
        inner.inputs.push(InputState {
            track_id,
            media_type,
            finished: false,
            end: MediaTime::ZERO,
            appended: 0,
        });
        Ok(WriterInput {
            inner: Arc::clone(&self.inner),
            index: inner.inputs.len() - 1,
            media_type,
        })
    }

    /// Movie-level metadata written when the movie is finished.
    pub fn set_metadata(&self, items: Vec<MetadataItem>) -> Result<()> {
        self.inner.lock().movie.set_metadata(items)
    }

    pub fn start_writing(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.status != WriterStatus::Unknown {
            return Err(Error::writer_state("started", "start writing"));
        }
        match inner.movie.start() {
            Ok(()) => {
                inner.status = WriterStatus::Writing;
                Ok(())
            }
            Err(e) => {
                inner.status = WriterStatus::Failed;
                Err(e)
            }
        }
    }

    /// Open the writing session; inputs become ready once it has started.
    pub fn start_session(&self, at: MediaTime) {
        let mut inner = self.inner.lock();
        inner.session = Some(at);
        tracing::debug!("Session for {} started at {at}", self.path.display());
    }

    pub fn session_started(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    /// Finalize the movie on a blocking worker.
    pub async fn finish_writing(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut inner = inner.lock();
            inner.finish()
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
    }

    /// Abandon the movie, deleting whatever was written.
    pub fn cancel_writing(&self) {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.movie.cancel() {
            tracing::warn!("Failed to cancel {}: {e}", self.path.display());
        }
        inner.status = WriterStatus::Cancelled;
    }
}

/// Handle through which samples reach one track of an [`AssetWriter`].
#[derive(Debug, Clone)]
pub struct WriterInput {
    inner: Arc<Mutex<Inner>>,
    index: usize,
    media_type: MediaType,
}

impl WriterInput {
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn session_started(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    pub fn samples_appended(&self) -> usize {
        self.inner.lock().inputs[self.index].appended
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().inputs[self.index].finished
    }
}

impl SampleSink for WriterInput {
    fn readiness(&self) -> Readiness {
        self.inner.lock().readiness(self.index)
    }

    fn append(&self, sample: &Sample) -> bool {
        self.inner.lock().append(self.index, sample)
    }

    fn mark_finished(&self) {
        let mut inner = self.inner.lock();
        let input = &mut inner.inputs[self.index];
        if !input.finished {
            input.finished = true;
            tracing::debug!(
                track_id = input.track_id,
                "{} input finished after {} samples",
                input.media_type,
                input.appended
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_media::fixtures;
    use lp_media::{Matrix, MovFile};

    fn video_spec() -> TrackSpec {
        TrackSpec {
            media_type: MediaType::Video,
            timescale: 600,
            sample_entry: fixtures::video_sample_entry(*b"avc1", 64, 48),
            width: 64,
            height: 48,
            matrix: Matrix::IDENTITY,
        }
    }

    fn audio_spec() -> TrackSpec {
        TrackSpec {
            media_type: MediaType::Audio,
            timescale: 44100,
            sample_entry: fixtures::audio_sample_entry(44100, 2),
            width: 0,
            height: 0,
            matrix: Matrix::IDENTITY,
        }
    }

    fn started(dir: &Path) -> (AssetWriter, WriterInput, WriterInput) {
        let writer = AssetWriter::create(dir.join("out.mov"), DEFAULT_INTERLEAVE_WINDOW).unwrap();
        let video = writer.add_input(video_spec()).unwrap();
        let audio = writer.add_input(audio_spec()).unwrap();
        writer.start_writing().unwrap();
        writer.start_session(MediaTime::ZERO);
        (writer, video, audio)
    }

    #[test]
    fn inputs_wait_for_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AssetWriter::create(dir.path().join("out.mov"), DEFAULT_INTERLEAVE_WINDOW).unwrap();
        let video = writer.add_input(video_spec()).unwrap();
        assert_eq!(video.readiness(), Readiness::NotReady);
        writer.start_writing().unwrap();
        assert_eq!(video.readiness(), Readiness::NotReady);
        assert!(!video.session_started());
        writer.start_session(MediaTime::ZERO);
        assert_eq!(video.readiness(), Readiness::Ready);
        assert!(writer.add_input(audio_spec()).is_err());
    }

    #[test]
    fn leading_input_backs_off_until_others_catch_up() {
        let dir = tempfile::tempdir().unwrap();
        let (_writer, video, audio) = started(dir.path());

        // 0.6 s of video against no audio.
        for i in 0..18 {
            assert!(video.append(&Sample::new(vec![1u8; 8], i * 20, 20, 600)));
        }
        assert_eq!(video.readiness(), Readiness::NotReady);
        assert_eq!(audio.readiness(), Readiness::Ready);

        assert!(audio.append(&Sample::new(vec![2u8; 8], 0, 4410, 44100)));
        assert_eq!(video.readiness(), Readiness::Ready);

        audio.mark_finished();
        assert_eq!(audio.readiness(), Readiness::Closed);
        for i in 18..60 {
            assert!(video.append(&Sample::new(vec![1u8; 8], i * 20, 20, 600)));
        }
        assert_eq!(video.readiness(), Readiness::Ready);
    }

    #[test]
    fn rejected_samples_do_not_fail_the_writer() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, video, _audio) = started(dir.path());
        assert!(video.append(&Sample::new(vec![1u8; 8], 40, 20, 600)));
        assert!(!video.append(&Sample::new(vec![1u8; 8], 20, 20, 600)));
        assert_eq!(writer.status(), WriterStatus::Writing);
        assert_eq!(video.samples_appended(), 1);

        video.mark_finished();
        assert!(!video.append(&Sample::new(vec![1u8; 8], 60, 20, 600)));
    }

    #[tokio::test]
    async fn finish_produces_a_movie_without_empty_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, video, _audio) = started(dir.path());
        for i in 0..3 {
            assert!(video.append(&Sample::new(vec![1u8; 8], i * 20, 20, 600)));
        }
        writer.finish_writing().await.unwrap();
        assert_eq!(writer.status(), WriterStatus::Completed);
        assert_eq!(video.readiness(), Readiness::Closed);

        let movie = MovFile::open(writer.path()).unwrap();
        assert_eq!(movie.tracks.len(), 1);
        assert!(writer.finish_writing().await.is_err());
    }

    #[test]
    fn cancel_closes_inputs_and_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, video, _audio) = started(dir.path());
        assert!(video.append(&Sample::new(vec![1u8; 8], 0, 20, 600)));
        writer.cancel_writing();
        assert_eq!(writer.status(), WriterStatus::Cancelled);
        assert_eq!(video.readiness(), Readiness::Closed);
        assert!(!writer.path().exists());
    }
}

//! Backpressure-aware copy of one track from a demuxer to writer inputs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use lp_core::config::VideoCodec;
use lp_core::MediaType;
use lp_media::{Error as MediaError, Sample, TrackSpec};

use crate::error::CopyError;
use crate::track::MediaTrack;

/// Produces samples in decode order; `None` once exhausted or failed.
pub trait SampleSource: Send {
    fn next_sample(&mut self) -> Option<Sample>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
    /// The sink will never accept another sample.
    Closed,
}

/// Consumes samples for one output track.
pub trait SampleSink: Send + Sync {
    fn readiness(&self) -> Readiness;

    /// Append one sample; `false` if the sink rejected it.
    fn append(&self, sample: &Sample) -> bool;

    fn mark_finished(&self);
}

/// Appends every sample to several sinks.
pub struct TeeSink {
    sinks: Vec<Arc<dyn SampleSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Arc<dyn SampleSink>>) -> Self {
        Self { sinks }
    }
}

impl SampleSink for TeeSink {
    /// Closed if any sink is closed, not ready if any sink is not ready.
    fn readiness(&self) -> Readiness {
        let mut readiness = Readiness::Ready;
        for sink in &self.sinks {
            match sink.readiness() {
                Readiness::Closed => return Readiness::Closed,
                Readiness::NotReady => readiness = Readiness::NotReady,
                Readiness::Ready => {}
            }
        }
        readiness
    }

    /// Accepted only if every sink accepted it.
    fn append(&self, sample: &Sample) -> bool {
        self.sinks
            .iter()
            .fold(true, |accepted, sink| sink.append(sample) && accepted)
    }

    fn mark_finished(&self) {
        for sink in &self.sinks {
            sink.mark_finished();
        }
    }
}

/// The kinds of track a copier moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Visual,
    Audio,
}

impl TrackKind {
    pub fn media_type(self) -> MediaType {
        match self {
            TrackKind::Visual => MediaType::Video,
            TrackKind::Audio => MediaType::Audio,
        }
    }

    /// Output track settings for a stream copy of `track`.
    ///
    /// Visual tracks must already be in the codec family `codec` selects
    /// and keep the source's preferred transform.
    pub fn output_spec(self, track: &MediaTrack, codec: VideoCodec) -> Result<TrackSpec, MediaError> {
        let sample_entry = track.sample_entry.clone().ok_or_else(|| {
            MediaError::invalid_movie(format!("track {} has no sample description", track.track_id))
        })?;
        match self {
            TrackKind::Visual => {
                if let Some(accepted) = codec.fourccs() {
                    if !accepted.contains(&sample_entry.fourcc) {
                        return Err(MediaError::unsupported(format!(
                            "source codec {} cannot be stream-copied as {codec}",
                            sample_entry.fourcc_str()
                        )));
                    }
                }
                Ok(TrackSpec {
                    media_type: MediaType::Video,
                    timescale: track.timescale,
                    sample_entry,
                    width: track.natural_size.width.round() as u32,
                    height: track.natural_size.height.round() as u32,
                    matrix: track.preferred_transform.to_matrix(),
                })
            }
            TrackKind::Audio => Ok(TrackSpec {
                media_type: MediaType::Audio,
                timescale: track.timescale,
                sample_entry,
                width: 0,
                height: 0,
                matrix: lp_media::Matrix::IDENTITY,
            }),
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Visual => f.write_str("visual"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub appended: u64,
    pub skipped: u64,
}

/// Copies one source track into one sink.
pub struct SampleCopier {
    kind: TrackKind,
    source: Option<Box<dyn SampleSource>>,
    sink: Arc<dyn SampleSink>,
    poll_interval: Duration,
}

impl SampleCopier {
    pub fn new(
        kind: TrackKind,
        source: Option<Box<dyn SampleSource>>,
        sink: Arc<dyn SampleSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kind,
            source,
            sink,
            poll_interval,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Run the copy to completion on a dedicated blocking worker.
    ///
    /// Without a source (or once the source has been consumed) the sink is
    /// marked finished and the call returns immediately.
    pub async fn copy(&mut self) -> Result<CopyStats, CopyError> {
        let kind = self.kind;
        let sink = Arc::clone(&self.sink);
        let Some(mut source) = self.source.take() else {
            sink.mark_finished();
            tracing::debug!("No {kind} source; input marked finished");
            return Ok(CopyStats::default());
        };

        let poll_interval = self.poll_interval;
        let stats = tokio::task::spawn_blocking(move || {
            copy_loop(kind, &mut *source, &*sink, poll_interval)
        })
        .await
        .map_err(|e| CopyError::Worker {
            kind,
            message: e.to_string(),
        })??;

        tracing::info!(
            appended = stats.appended,
            skipped = stats.skipped,
            "Copied {kind} track"
        );
        Ok(stats)
    }
}

fn copy_loop(
    kind: TrackKind,
    source: &mut dyn SampleSource,
    sink: &dyn SampleSink,
    poll_interval: Duration,
) -> Result<CopyStats, CopyError> {
    let mut stats = CopyStats::default();
    loop {
        match sink.readiness() {
            Readiness::Ready => {}
            Readiness::NotReady => {
                std::thread::sleep(poll_interval);
                continue;
            }
            Readiness::Closed => return Err(CopyError::SinkClosed { kind }),
        }
        let Some(sample) = source.next_sample() else {
            sink.mark_finished();
            return Ok(stats);
        };
        if sink.append(&sample) {
            stats.appended += 1;
        } else {
            stats.skipped += 1;
            tracing::trace!(decode_time = sample.decode_time, "Skipped rejected {kind} sample");
        }
    }
}

//! Pull-based sample reader over one source movie.
//!
//! Track outputs are registered before reading starts. Each output pulls
//! its own track's samples in decode order; all outputs share one file
//! handle and one terminal error slot, so a read failure on any track
//! stops every track.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lp_media::mov::ResolvedSample;
use lp_media::{Error, MovFile, Result, Sample};
use parking_lot::Mutex;

use crate::copier::SampleSource;

#[derive(Debug, Default)]
struct Shared {
    file: Mutex<Option<File>>,
    /// Length of the file when reading started.
    len: AtomicU64,
    error: Mutex<Option<Error>>,
    failed: AtomicBool,
}

impl Shared {
    fn read_at(&self, offset: u64, size: u32) -> Result<Bytes> {
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| Error::Io(io::Error::other("reading has not started")))?;
        let len = self.len.load(Ordering::Acquire);
        if offset.saturating_add(u64::from(size)) > len {
            return Err(Error::invalid_movie(format!(
                "{size} byte sample at {offset} runs past the end of the {len} byte file"
            )));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn fail(&self, error: Error) {
        tracing::debug!("Demuxer failed: {error}");
        if !self.failed.swap(true, Ordering::AcqRel) {
            *self.error.lock() = Some(error);
        }
    }
}

/// Reads samples out of a QuickTime movie.
#[derive(Debug)]
pub struct MovDemuxer {
    path: PathBuf,
    movie: MovFile,
    outputs: Vec<u32>,
    shared: Arc<Shared>,
    started: bool,
}

impl MovDemuxer {
    /// Parse the movie at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let movie = MovFile::open(&path)?;
        Ok(Self {
            path,
            movie,
            outputs: Vec::new(),
            shared: Arc::new(Shared::default()),
            started: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn movie(&self) -> &MovFile {
        &self.movie
    }

    /// Register an output for `track_id`; only allowed before
    /// [`MovDemuxer::start_reading`].
    pub fn add_output(&mut self, track_id: u32) -> Result<TrackOutput> {
        if self.started {
            return Err(Error::unsupported(
                "track outputs must be added before reading starts",
            ));
        }
        let track = self
            .movie
            .track(track_id)
            .ok_or(Error::UnknownTrack(track_id))?;
        self.outputs.push(track_id);
        Ok(TrackOutput {
            track_id,
            timescale: track.timescale,
            samples: track.sample_table.samples.clone(),
            cursor: 0,
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn start_reading(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::unsupported("reading already started"));
        }
        if self.outputs.is_empty() {
            return Err(Error::unsupported("no track outputs registered"));
        }
        let file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        for &track_id in &self.outputs {
            let misplaced = self
                .movie
                .track(track_id)
                .into_iter()
                .flat_map(|track| &track.sample_table.samples)
                .find(|s| s.size > 0 && s.file_offset >= len);
            if let Some(sample) = misplaced {
                return Err(Error::invalid_movie(format!(
                    "track {track_id} sample {} starts at {} past the end of the {len} byte file",
                    sample.index, sample.file_offset
                )));
            }
        }
        self.shared.len.store(len, Ordering::Release);
        *self.shared.file.lock() = Some(file);
        self.started = true;
        tracing::debug!(
            "Reading {} ({} tracks)",
            self.path.display(),
            self.outputs.len()
        );
        Ok(())
    }

    /// The first read failure, if any; taking it leaves the slot empty.
    pub fn take_error(&self) -> Option<Error> {
        self.shared.error.lock().take()
    }
}

/// Samples of one source track.
#[derive(Debug)]
pub struct TrackOutput {
    track_id: u32,
    timescale: u32,
    samples: Vec<ResolvedSample>,
    cursor: usize,
    shared: Arc<Shared>,
}

impl TrackOutput {
    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.cursor
    }
}

impl SampleSource for TrackOutput {
    fn next_sample(&mut self) -> Option<Sample> {
        if self.shared.has_failed() {
            return None;
        }
        let entry = self.samples.get(self.cursor)?;
        match self.shared.read_at(entry.file_offset, entry.size) {
            Ok(data) => {
                self.cursor += 1;
                Some(Sample::from_resolved(entry, data, self.timescale))
            }
            Err(e) => {
                self.shared.fail(e);
                None
            }
        }
    }
}

//! Stream-copy QuickTime movie writer.
//!
//! Samples are appended to a single `mdat` (one sample per chunk) as they
//! arrive; `finish` patches the `mdat` size and appends the `moov` built
//! from the accumulated sample tables. Tracks that never received a sample
//! are left out of the finished movie.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use lp_core::media::common_timescale;
use lp_core::{MediaTime, MediaType};

use super::boxes::{
    self, write_container, write_dinf, write_edts, write_hdlr, write_mdat_header, write_mdhd,
    write_mvhd, write_nmhd, write_smhd, write_stsd, write_tkhd, write_vmhd, TrackHeader,
    MDAT_HEADER_SIZE,
};
use super::metadata::{self, MetadataItem, MetadataKeySpec};
use super::sample_table::SampleTableBuilder;
use super::{Matrix, SampleEntry};
use crate::error::{Error, Result};
use crate::sample::Sample;

/// Base timescale of the movie header and edit lists. A finished movie uses
/// the smallest multiple of it that also holds every track's timescale.
pub const MOVIE_TIMESCALE: u32 = 600;

/// Description of a track to add to a [`MovWriter`].
#[derive(Debug, Clone)]
pub struct TrackSpec {
    pub media_type: MediaType,
    pub timescale: u32,
    pub sample_entry: SampleEntry,
    pub width: u32,
    pub height: u32,
    pub matrix: Matrix,
}

impl TrackSpec {
    /// A timed metadata track declaring `keys` through an `mebx` entry.
    pub fn metadata(timescale: u32, keys: &[MetadataKeySpec]) -> Self {
        Self {
            media_type: MediaType::Metadata,
            timescale,
            sample_entry: SampleEntry {
                fourcc: *b"mebx",
                raw: metadata::write_mebx_entry(keys),
            },
            width: 0,
            height: 0,
            matrix: Matrix::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Configuring,
    Writing,
    Finished,
    Cancelled,
}

impl WriterState {
    fn name(self) -> &'static str {
        match self {
            WriterState::Configuring => "configuring",
            WriterState::Writing => "writing",
            WriterState::Finished => "finished",
            WriterState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
struct TrackState {
    track_id: u32,
    spec: TrackSpec,
    table: SampleTableBuilder,
    first_decode: Option<i64>,
    last_decode: Option<i64>,
}

/// Writes one QuickTime movie.
#[derive(Debug)]
pub struct MovWriter {
    path: PathBuf,
    state: WriterState,
    tracks: Vec<TrackState>,
    metadata: Vec<MetadataItem>,
    file: Option<BufWriter<File>>,
    mdat_start: u64,
    position: u64,
}

impl MovWriter {
    /// Prepare a writer for `path` without touching the file system.
    ///
    /// Fails when `path` already exists or its parent directory is missing.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Err(Error::OutputExists(path));
        }
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(Error::MissingParent(parent));
        }
        Ok(Self {
            path,
            state: WriterState::Configuring,
            tracks: Vec::new(),
            metadata: Vec::new(),
            file: None,
            mdat_start: 0,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writing(&self) -> bool {
        self.state == WriterState::Writing
    }

    /// Add a track; only allowed before [`MovWriter::start`].
    pub fn add_track(&mut self, spec: TrackSpec) -> Result<u32> {
        self.expect_state(WriterState::Configuring, "add tracks")?;
        let track_id = self.tracks.len() as u32 + 1;
        self.tracks.push(TrackState {
            track_id,
            spec,
            table: SampleTableBuilder::default(),
            first_decode: None,
            last_decode: None,
        });
        Ok(track_id)
    }

    /// Replace the movie-level metadata written by [`MovWriter::finish`].
    pub fn set_metadata(&mut self, items: Vec<MetadataItem>) -> Result<()> {
        if !matches!(self.state, WriterState::Configuring | WriterState::Writing) {
            return Err(Error::writer_state(self.state.name(), "set metadata"));
        }
        self.metadata = items;
        Ok(())
    }

    /// Create the file and open the media data atom.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(WriterState::Configuring, "start writing")?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => Error::OutputExists(self.path.clone()),
                _ => Error::Io(e),
            })?;
        let mut file = BufWriter::new(file);

        let ftyp = boxes::write_ftyp();
        file.write_all(&ftyp)?;
        self.mdat_start = ftyp.len() as u64;
        file.write_all(&write_mdat_header(MDAT_HEADER_SIZE))?;
        self.position = self.mdat_start + MDAT_HEADER_SIZE;

        self.file = Some(file);
        self.state = WriterState::Writing;
        tracing::debug!("Started movie {}", self.path.display());
        Ok(())
    }

    /// Append one sample to `track_id`.
    ///
    /// Decode times must not go backwards within a track.
    pub fn write_sample(&mut self, track_id: u32, sample: &Sample) -> Result<()> {
        self.expect_state(WriterState::Writing, "append samples")?;
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.track_id == track_id)
            .ok_or(Error::UnknownTrack(track_id))?;

        let ts = track.spec.timescale;
        let (decode_time, duration) = if sample.timescale == ts {
            (sample.decode_time, sample.duration)
        } else {
            let dts = sample.decode_timestamp().rescale(ts).value();
            let dur = sample.duration_time().rescale(ts).value();
            (dts, u32::try_from(dur).unwrap_or(u32::MAX))
        };
        if let Some(previous) = track.last_decode {
            if decode_time < previous {
                return Err(Error::OutOfOrder {
                    track_id,
                    decode_time,
                    previous,
                });
            }
            // The previous sample lasts until this one decodes, so a gap left
            // by a skipped sample does not pull later samples earlier.
            if let Ok(span) = u32::try_from(decode_time - previous) {
                if span > 0 {
                    track.table.set_last_duration(span);
                }
            }
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::writer_state("closed", "append samples"))?;
        file.write_all(&sample.data)?;

        let size = u32::try_from(sample.data.len())
            .map_err(|_| Error::unsupported("sample larger than 4 GiB"))?;
        track.table.push(
            self.position,
            size,
            duration,
            sample.composition_offset,
            sample.is_sync,
        );
        self.position += u64::from(size);
        track.first_decode.get_or_insert(decode_time);
        track.last_decode = Some(decode_time);
        tracing::trace!(track_id, decode_time, size, "Wrote sample");
        Ok(())
    }

    /// Number of samples written to `track_id` so far.
    pub fn samples_written(&self, track_id: u32) -> usize {
        self.tracks
            .iter()
            .find(|t| t.track_id == track_id)
            .map_or(0, |t| t.table.len())
    }

    /// Finalize the movie: patch the `mdat` size and append `moov`.
    pub fn finish(&mut self) -> Result<()> {
        self.expect_state(WriterState::Writing, "finish")?;
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::writer_state("closed", "finish"))?;

        let mdat_size = self.position - self.mdat_start;
        file.flush()?;
        file.seek(SeekFrom::Start(self.mdat_start))?;
        file.write_all(&write_mdat_header(mdat_size))?;
        file.seek(SeekFrom::Start(self.position))?;

        let moov = self.build_moov();
        file.write_all(&moov)?;
        file.flush()?;
        file.get_ref().sync_all()?;

        self.state = WriterState::Finished;
        tracing::debug!(
            "Finished movie {} ({} bytes of media)",
            self.path.display(),
            mdat_size - MDAT_HEADER_SIZE
        );
        Ok(())
    }

    /// Abandon the movie and delete whatever was written.
    pub fn cancel(&mut self) -> Result<()> {
        let was_started = self.file.take().is_some();
        let previous = self.state;
        self.state = WriterState::Cancelled;
        if was_started || previous == WriterState::Writing {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        tracing::debug!("Cancelled movie {}", self.path.display());
        Ok(())
    }

    fn expect_state(&self, expected: WriterState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::writer_state(self.state.name(), operation))
        }
    }

    fn build_moov(&self) -> Vec<u8> {
        let mut traks = Vec::new();
        let mut movie_duration = 0u64;
        let mut next_track_id = 1u32;
        let movie_timescale = self
            .tracks
            .iter()
            .filter(|t| t.table.len() > 0)
            .fold(MOVIE_TIMESCALE, |ts, t| common_timescale(ts, t.spec.timescale));

        for track in &self.tracks {
            if track.table.len() == 0 {
                tracing::debug!(
                    "Omitting track {} ({}): no samples",
                    track.track_id,
                    track.spec.media_type
                );
                continue;
            }
            let (trak, end) = build_trak(track, movie_timescale);
            movie_duration = movie_duration.max(end);
            next_track_id = next_track_id.max(track.track_id + 1);
            traks.push(trak);
        }

        let mvhd = write_mvhd(movie_timescale, movie_duration, next_track_id);
        let meta = (!self.metadata.is_empty()).then(|| metadata::write_meta(&self.metadata));

        let mut children: Vec<&[u8]> = vec![mvhd.as_slice()];
        children.extend(traks.iter().map(Vec::as_slice));
        if let Some(meta) = &meta {
            children.push(meta);
        }
        write_container(b"moov", &children)
    }
}

fn to_movie_ticks(ticks: u64, timescale: u32, movie_timescale: u32) -> u64 {
    MediaTime::new(ticks as i64, timescale)
        .rescale(movie_timescale)
        .value()
        .max(0) as u64
}

/// Serialize one track; returns the `trak` and its end on the movie timeline.
fn build_trak(track: &TrackState, movie_timescale: u32) -> (Vec<u8>, u64) {
    let spec = &track.spec;
    let media_duration = track.table.total_duration();
    let first_decode = track.first_decode.unwrap_or(0).max(0) as u64;

    let empty = to_movie_ticks(first_decode, spec.timescale, movie_timescale);
    let presented = to_movie_ticks(media_duration, spec.timescale, movie_timescale).max(1);
    let track_duration = empty + presented;

    let tkhd = write_tkhd(&TrackHeader {
        track_id: track.track_id,
        duration: track_duration,
        volume: if spec.media_type == MediaType::Audio { 0x0100 } else { 0 },
        width: spec.width,
        height: spec.height,
        matrix: &spec.matrix,
    });
    let edts = (empty > 0).then(|| write_edts(empty, presented));

    let (media_header, handler_name) = match spec.media_type {
        MediaType::Video => (write_vmhd(), "Core Media Video"),
        MediaType::Audio => (write_smhd(), "Core Media Audio"),
        MediaType::Metadata => (write_nmhd(), "Core Media Metadata"),
    };
    let stsd = write_stsd(&[&spec.sample_entry.raw]);
    let mut stbl_content = stsd;
    stbl_content.extend_from_slice(&track.table.write_tables());
    let stbl = boxes::write_atom(b"stbl", &stbl_content);
    let dinf = write_dinf();
    let minf = write_container(b"minf", &[&media_header, &dinf, &stbl]);

    let mdhd = write_mdhd(spec.timescale, media_duration);
    let hdlr = write_hdlr(*b"mhlr", &spec.media_type.handler(), handler_name);
    let mdia = write_container(b"mdia", &[&mdhd, &hdlr, &minf]);

    let mut children: Vec<&[u8]> = vec![tkhd.as_slice()];
    if let Some(edts) = &edts {
        children.push(edts);
    }
    children.push(&mdia);
    (write_container(b"trak", &children), track_duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::mov::MovFile;

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

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mov");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(MovWriter::create(&path), Err(Error::OutputExists(_))));
    }

    #[test]
    fn create_requires_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("a.mov");
        assert!(matches!(MovWriter::create(&path), Err(Error::MissingParent(_))));
    }

    #[test]
    fn create_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mov");
        let _writer = MovWriter::create(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn tracks_cannot_be_added_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MovWriter::create(dir.path().join("a.mov")).unwrap();
        writer.start().unwrap();
        assert!(matches!(
            writer.add_track(video_spec()),
            Err(Error::WriterState { .. })
        ));
    }

    #[test]
    fn written_movie_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mov");
        let mut writer = MovWriter::create(&path).unwrap();
        let video = writer.add_track(video_spec()).unwrap();
        let meta = writer
            .add_track(TrackSpec::metadata(600, &[MetadataKeySpec::still_image_time()]))
            .unwrap();
        writer
            .set_metadata(vec![MetadataItem::content_identifier("abc123")])
            .unwrap();
        writer.start().unwrap();
        for i in 0..3 {
            let mut s = Sample::new(vec![i as u8; 10 + i], i as i64 * 20, 20, 600);
            s.is_sync = i == 0;
            writer.write_sample(video, &s).unwrap();
        }
        writer
            .write_sample(meta, &Sample::new(vec![0u8; 9], 30, 20, 600))
            .unwrap();
        writer.finish().unwrap();

        let mov = MovFile::open(&path).unwrap();
        assert_eq!(mov.tracks.len(), 2);
        let v = mov.tracks_of(MediaType::Video).next().unwrap();
        assert_eq!(v.sample_table.len(), 3);
        assert_eq!(v.sample_table.samples[2].size, 12);
        assert!(!v.sample_table.samples[1].is_sync);

        let m = mov.tracks_of(MediaType::Metadata).next().unwrap();
        assert_eq!(m.start_offset, MediaTime::new(30, 600));
        assert_eq!(m.metadata_keys().unwrap()[0].1, MetadataKeySpec::still_image_time());

        assert_eq!(mov.metadata.len(), 1);
        assert_eq!(mov.metadata[0].value.as_str(), Some("abc123"));
        assert_eq!(mov.duration(), MediaTime::new(60, 600));

        let bytes = std::fs::read(&path).unwrap();
        let first = v.sample_table.samples[0].file_offset as usize;
        assert_eq!(&bytes[first..first + 10], &[0u8; 10]);
    }

    #[test]
    fn empty_tracks_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mov");
        let mut writer = MovWriter::create(&path).unwrap();
        let video = writer.add_track(video_spec()).unwrap();
        let _silent = writer.add_track(TrackSpec::metadata(600, &[])).unwrap();
        writer.start().unwrap();
        writer
            .write_sample(video, &Sample::new(vec![1u8; 4], 0, 20, 600))
            .unwrap();
        assert_eq!(writer.samples_written(video), 1);
        writer.finish().unwrap();

        let mov = MovFile::open(&path).unwrap();
        assert_eq!(mov.tracks.len(), 1);
    }

    #[test]
    fn out_of_order_samples_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MovWriter::create(dir.path().join("a.mov")).unwrap();
        let video = writer.add_track(video_spec()).unwrap();
        writer.start().unwrap();
        writer
            .write_sample(video, &Sample::new(vec![1u8], 40, 20, 600))
            .unwrap();
        let err = writer
            .write_sample(video, &Sample::new(vec![1u8], 20, 20, 600))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }));
        assert!(matches!(
            writer.write_sample(99, &Sample::new(vec![1u8], 60, 20, 600)),
            Err(Error::UnknownTrack(99))
        ));
    }

    #[test]
    fn skipped_samples_keep_later_decode_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mov");
        let mut writer = MovWriter::create(&path).unwrap();
        let video = writer.add_track(video_spec()).unwrap();
        writer.start().unwrap();
        for dts in [0, 20, 60, 80] {
            writer
                .write_sample(video, &Sample::new(vec![1u8; 4], dts, 20, 600))
                .unwrap();
        }
        writer.finish().unwrap();

        let mov = MovFile::open(&path).unwrap();
        let dts: Vec<u64> = mov.tracks[0]
            .sample_table
            .samples
            .iter()
            .map(|s| s.decode_timestamp)
            .collect();
        assert_eq!(dts, vec![0, 20, 60, 80]);
        assert_eq!(mov.tracks[0].sample_table.samples[1].duration, 40);
        assert_eq!(mov.tracks[0].duration_time(), MediaTime::new(100, 600));
    }

    #[test]
    fn cancel_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mov");
        let mut writer = MovWriter::create(&path).unwrap();
        let video = writer.add_track(video_spec()).unwrap();
        writer.start().unwrap();
        writer
            .write_sample(video, &Sample::new(vec![1u8; 4], 0, 20, 600))
            .unwrap();
        assert!(path.exists());
        writer.cancel().unwrap();
        assert!(!path.exists());
        assert!(writer.finish().is_err());
    }

    #[test]
    fn rescales_foreign_timescale_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mov");
        let mut writer = MovWriter::create(&path).unwrap();
        let video = writer.add_track(video_spec()).unwrap();
        writer.start().unwrap();
        writer
            .write_sample(video, &Sample::new(vec![1u8; 4], 0, 1001, 30000))
            .unwrap();
        writer.finish().unwrap();
        let mov = MovFile::open(&path).unwrap();
        assert_eq!(mov.tracks[0].sample_table.samples[0].duration, 20);
    }
}

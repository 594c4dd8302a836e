//! QuickTime movie parser.
//!
//! Parses a movie's `moov` atom into per-track sample tables, display
//! matrices and sample descriptions, plus the movie-level metadata. The
//! result is everything needed to stream-copy samples into a new movie.

pub mod atoms;
pub(crate) mod boxes;
pub mod metadata;
pub mod sample_table;
pub mod writer;

use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use lp_core::{MediaTime, MediaType};

use crate::error::{Error, Result};
use atoms::{
    child_atoms, find_child, find_path, read_atom_header, read_content, read_fullbox_header,
    read_i32, read_i64, read_u16, read_u32, read_u64, AtomHeader,
};
use metadata::{MetadataFormat, MetadataItem, MetadataKeySpec};
pub use sample_table::{ResolvedSample, ResolvedSampleTable};

/// A QuickTime 3×3 display matrix as stored in `tkhd`.
///
/// Order is `a b u c d v tx ty w`; `u`, `v` and `w` are 2.30 fixed point,
/// the rest 16.16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Matrix(pub [i32; 9]);

impl Matrix {
    pub const IDENTITY: Matrix = Matrix([0x10000, 0, 0, 0, 0x10000, 0, 0, 0, 0x4000_0000]);

    fn read<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut values = [0i32; 9];
        for v in &mut values {
            *v = read_i32(reader)?;
        }
        Ok(Matrix(values))
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// The first sample description of a track, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    /// Codec fourcc, e.g. `avc1`, `mp4a`, `mebx`.
    pub fourcc: [u8; 4],
    /// The complete sample entry atom, header included.
    pub raw: Vec<u8>,
}

impl SampleEntry {
    pub fn fourcc_str(&self) -> String {
        atoms::fourcc_str(&self.fourcc)
    }
}

/// Information about a single track.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler_type: [u8; 4],
    pub media_type: Option<MediaType>,
    /// Media timescale from `mdhd`.
    pub timescale: u32,
    /// Media duration in `timescale` ticks.
    pub duration: u64,
    pub width: u32,
    pub height: u32,
    pub matrix: Matrix,
    pub sample_entry: Option<SampleEntry>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Length of a leading empty edit, i.e. where the media starts on the
    /// movie timeline.
    pub start_offset: MediaTime,
    pub sample_table: ResolvedSampleTable,
}

impl TrackInfo {
    /// Media duration as a rational time.
    pub fn duration_time(&self) -> MediaTime {
        MediaTime::new(self.duration as i64, self.timescale)
    }

    /// Samples per second over the track's duration; 0 for an empty track.
    pub fn nominal_frame_rate(&self) -> f64 {
        let secs = self.duration_time().seconds();
        if secs <= 0.0 {
            return 0.0;
        }
        self.sample_table.len() as f64 / secs
    }

    /// Key table of a boxed timed metadata track.
    pub fn metadata_keys(&self) -> Result<Vec<(u32, MetadataKeySpec)>> {
        match &self.sample_entry {
            Some(entry) => metadata::parse_mebx_entry(&entry.raw),
            None => Ok(Vec::new()),
        }
    }
}

/// Parsed metadata of a movie file.
#[derive(Debug, Clone)]
pub struct MovFile {
    pub movie_timescale: u32,
    /// Movie duration in `movie_timescale` ticks.
    pub movie_duration: u64,
    pub tracks: Vec<TrackInfo>,
    pub metadata: Vec<MetadataItem>,
}

impl MovFile {
    /// Open and parse a movie file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::parse(&mut BufReader::new(file))
    }

    /// Parse the `moov` atom from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        let moov = child_atoms(reader, 0, file_size)?
            .into_iter()
            .find(|h| &h.atom_type == b"moov")
            .ok_or(Error::MissingAtom("moov"))?;

        let mvhd = find_child(reader, &moov, b"mvhd")?.ok_or(Error::MissingAtom("mvhd"))?;
        reader.seek(SeekFrom::Start(mvhd.content_start))?;
        let (movie_timescale, movie_duration) = parse_media_times(reader)?;

        let mut tracks = Vec::new();
        let mut metadata = Vec::new();
        for child in child_atoms(reader, moov.content_start, moov.end())? {
            match &child.atom_type {
                b"trak" => match parse_trak(reader, &child, movie_timescale)? {
                    Some(track) => tracks.push(track),
                    None => tracing::debug!("Skipping incomplete trak at {}", child.content_start),
                },
                b"meta" => {
                    metadata.extend(metadata::parse_meta(&read_content(reader, &child)?)?);
                }
                b"udta" => {
                    let content = read_content(reader, &child)?;
                    metadata.extend(metadata::parse_udta(&content)?);
                    // meta nested under udta
                    let mut cursor = std::io::Cursor::new(&content);
                    for nested in child_atoms(&mut cursor, 0, content.len() as u64)? {
                        if &nested.atom_type == b"meta" {
                            let start = nested.content_start as usize;
                            metadata.extend(metadata::parse_meta(&content[start..nested.end() as usize])?);
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(MovFile {
            movie_timescale,
            movie_duration,
            tracks,
            metadata,
        })
    }

    /// Movie duration as a rational time.
    pub fn duration(&self) -> MediaTime {
        MediaTime::new(self.movie_duration as i64, self.movie_timescale)
    }

    /// Tracks of the given media type, in file order.
    pub fn tracks_of(&self, media_type: MediaType) -> impl Iterator<Item = &TrackInfo> {
        self.tracks
            .iter()
            .filter(move |t| t.media_type == Some(media_type))
    }

    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    /// Metadata formats present, in first-seen order.
    pub fn metadata_formats(&self) -> Vec<MetadataFormat> {
        let mut formats = Vec::new();
        for item in &self.metadata {
            if !formats.contains(&item.format) {
                formats.push(item.format);
            }
        }
        formats
    }

    /// Items of one metadata format.
    pub fn metadata_for_format(&self, format: MetadataFormat) -> impl Iterator<Item = &MetadataItem> {
        self.metadata.iter().filter(move |m| m.format == format)
    }
}

/// Parse the (timescale, duration) prefix shared by mvhd and mdhd.
fn parse_media_times<R: Read>(reader: &mut R) -> Result<(u32, u64)> {
    let (version, _flags) = read_fullbox_header(reader)?;
    if version == 1 {
        let _creation = read_u64(reader)?;
        let _modification = read_u64(reader)?;
        let timescale = read_u32(reader)?;
        Ok((timescale, read_u64(reader)?))
    } else {
        let _creation = read_u32(reader)?;
        let _modification = read_u32(reader)?;
        let timescale = read_u32(reader)?;
        Ok((timescale, u64::from(read_u32(reader)?)))
    }
}

/// Parse tkhd, returning (track_id, matrix, width, height).
fn parse_tkhd<R: Read>(reader: &mut R) -> Result<(u32, Matrix, u32, u32)> {
    let (version, _flags) = read_fullbox_header(reader)?;
    let track_id = if version == 1 {
        let _creation = read_u64(reader)?;
        let _modification = read_u64(reader)?;
        let id = read_u32(reader)?;
        let _reserved = read_u32(reader)?;
        let _duration = read_u64(reader)?;
        id
    } else {
        let _creation = read_u32(reader)?;
        let _modification = read_u32(reader)?;
        let id = read_u32(reader)?;
        let _reserved = read_u32(reader)?;
        let _duration = read_u32(reader)?;
        id
    };
    // reserved(8) + layer(2) + alternate group(2) + volume(2) + reserved(2)
    let mut skip = [0u8; 16];
    reader.read_exact(&mut skip)?;
    let matrix = Matrix::read(reader)?;
    let width = read_u32(reader)? >> 16;
    let height = read_u32(reader)? >> 16;
    Ok((track_id, matrix, width, height))
}

/// Length of a leading empty edit, in movie ticks.
fn parse_empty_edit<R: Read>(reader: &mut R) -> Result<u64> {
    let (version, _flags) = read_fullbox_header(reader)?;
    let count = read_u32(reader)?;
    let mut empty = 0u64;
    for _ in 0..count {
        let (segment_duration, media_time) = if version == 1 {
            (read_u64(reader)?, read_i64(reader)?)
        } else {
            (u64::from(read_u32(reader)?), i64::from(read_i32(reader)?))
        };
        let _rate = read_u32(reader)?;
        if media_time != -1 {
            break;
        }
        empty += segment_duration;
    }
    Ok(empty)
}

fn parse_trak<R: Read + Seek>(
    reader: &mut R,
    trak: &AtomHeader,
    movie_timescale: u32,
) -> Result<Option<TrackInfo>> {
    let Some(tkhd) = find_child(reader, trak, b"tkhd")? else {
        return Ok(None);
    };
    reader.seek(SeekFrom::Start(tkhd.content_start))?;
    let (track_id, matrix, width, height) = parse_tkhd(reader)?;

    let start_ticks = match find_path(reader, trak, &[b"edts", b"elst"])? {
        Some(elst) => {
            reader.seek(SeekFrom::Start(elst.content_start))?;
            parse_empty_edit(reader)?
        }
        None => 0,
    };

    let Some(mdia) = find_child(reader, trak, b"mdia")? else {
        return Ok(None);
    };
    let Some(mdhd) = find_child(reader, &mdia, b"mdhd")? else {
        return Ok(None);
    };
    reader.seek(SeekFrom::Start(mdhd.content_start))?;
    let (timescale, mut duration) = parse_media_times(reader)?;

    let Some(hdlr) = find_child(reader, &mdia, b"hdlr")? else {
        return Ok(None);
    };
    reader.seek(SeekFrom::Start(hdlr.content_start))?;
    let (_version, _flags) = read_fullbox_header(reader)?;
    let _component_type = read_u32(reader)?;
    let mut handler_type = [0u8; 4];
    reader.read_exact(&mut handler_type)?;

    let Some(stbl) = find_path(reader, &mdia, &[b"minf", b"stbl"])? else {
        return Ok(None);
    };

    let sample_entry = match find_child(reader, &stbl, b"stsd")? {
        Some(stsd) => first_sample_entry(reader, &stsd)?,
        None => None,
    };
    let (channels, sample_rate) = match (&sample_entry, &handler_type) {
        (Some(entry), b"soun") => audio_params(&entry.raw),
        _ => (0, 0),
    };

    let sample_table = sample_table::resolve_sample_table(reader, &stbl, timescale)?;
    if duration == 0 {
        duration = sample_table.total_duration();
    }

    Ok(Some(TrackInfo {
        track_id,
        handler_type,
        media_type: MediaType::from_handler(handler_type),
        timescale,
        duration,
        width,
        height,
        matrix,
        sample_entry,
        sample_rate,
        channels,
        start_offset: MediaTime::new(start_ticks as i64, movie_timescale),
        sample_table,
    }))
}

fn first_sample_entry<R: Read + Seek>(
    reader: &mut R,
    stsd: &AtomHeader,
) -> Result<Option<SampleEntry>> {
    reader.seek(SeekFrom::Start(stsd.content_start))?;
    let (_version, _flags) = read_fullbox_header(reader)?;
    let count = read_u32(reader)?;
    if count == 0 {
        return Ok(None);
    }
    let entry_start = reader.stream_position()?;
    let Some(entry) = read_atom_header(reader, stsd.end())? else {
        return Ok(None);
    };
    reader.seek(SeekFrom::Start(entry_start))?;
    let mut raw = vec![0u8; entry.size as usize];
    reader.read_exact(&mut raw)?;
    Ok(Some(SampleEntry {
        fourcc: entry.atom_type,
        raw,
    }))
}

/// (channels, sample rate) from a sound sample entry.
fn audio_params(raw: &[u8]) -> (u16, u32) {
    // header(8) + reserved(6) + data ref(2) + version/revision/vendor(8)
    let mut cursor = std::io::Cursor::new(raw.get(24..).unwrap_or_default());
    let channels = read_u16(&mut cursor).unwrap_or(0);
    let _sample_size = read_u16(&mut cursor).unwrap_or(0);
    let _compression = read_u16(&mut cursor).unwrap_or(0);
    let _packet_size = read_u16(&mut cursor).unwrap_or(0);
    let sample_rate = read_u32(&mut cursor).unwrap_or(0) >> 16;
    (channels, sample_rate)
}

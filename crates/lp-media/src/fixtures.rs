//! Synthetic movies and JPEGs for tests.
//!
//! Sample payloads are filler bytes: the files are structurally valid
//! containers, not decodable media.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use lp_core::MediaType;

use crate::error::{Error, Result};
use crate::mov::atoms::{child_atoms, find_path};
use crate::mov::metadata::MetadataItem;
use crate::mov::writer::{MovWriter, TrackSpec};
use crate::mov::{Matrix, SampleEntry};
use crate::sample::Sample;

/// Shape of a synthetic movie.
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub width: u32,
    pub height: u32,
    pub codec: [u8; 4],
    pub frames: u32,
    /// Video timescale.
    pub timescale: u32,
    /// Duration of one frame in `timescale` ticks.
    pub frame_duration: u32,
    pub matrix: Matrix,
    pub audio: bool,
    pub content_identifier: Option<String>,
}

impl Default for FixtureOptions {
    /// One second of 64×48 H.264 at 30 fps with stereo audio.
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            codec: *b"avc1",
            frames: 30,
            timescale: 600,
            frame_duration: 20,
            matrix: Matrix::IDENTITY,
            audio: true,
            content_identifier: None,
        }
    }
}

impl FixtureOptions {
    pub fn silent() -> Self {
        Self {
            audio: false,
            ..Self::default()
        }
    }
}

pub const AUDIO_SAMPLE_RATE: u32 = 44100;
const AUDIO_SAMPLE_TICKS: u32 = 4410;

/// Write a synthetic movie to `path`.
pub fn write_movie(path: &Path, opts: &FixtureOptions) -> Result<()> {
    let mut writer = MovWriter::create(path)?;
    let video = writer.add_track(TrackSpec {
        media_type: MediaType::Video,
        timescale: opts.timescale,
        sample_entry: video_sample_entry(opts.codec, opts.width, opts.height),
        width: opts.width,
        height: opts.height,
        matrix: opts.matrix,
    })?;
    let audio = if opts.audio {
        Some(writer.add_track(TrackSpec {
            media_type: MediaType::Audio,
            timescale: AUDIO_SAMPLE_RATE,
            sample_entry: audio_sample_entry(AUDIO_SAMPLE_RATE, 2),
            width: 0,
            height: 0,
            matrix: Matrix::IDENTITY,
        })?)
    } else {
        None
    };
    if let Some(id) = &opts.content_identifier {
        writer.set_metadata(vec![MetadataItem::content_identifier(id)])?;
    }
    writer.start()?;

    let video_end = u64::from(opts.frames) * u64::from(opts.frame_duration);
    let audio_samples = (video_end * u64::from(AUDIO_SAMPLE_RATE))
        .div_ceil(u64::from(opts.timescale) * u64::from(AUDIO_SAMPLE_TICKS));

    // Interleave roughly by time so the fixture resembles a camera file.
    let mut next_audio = 0u64;
    for frame in 0..opts.frames {
        let dts = i64::from(frame) * i64::from(opts.frame_duration);
        let mut sample = Sample::new(
            vec![frame as u8; 32 + (frame as usize % 7)],
            dts,
            opts.frame_duration,
            opts.timescale,
        );
        sample.is_sync = frame % 10 == 0;
        writer.write_sample(video, &sample)?;

        if let Some(audio) = audio {
            let video_secs = (dts + i64::from(opts.frame_duration)) as f64 / f64::from(opts.timescale);
            while next_audio < audio_samples
                && (next_audio * u64::from(AUDIO_SAMPLE_TICKS)) as f64 / f64::from(AUDIO_SAMPLE_RATE)
                    < video_secs
            {
                let dts = (next_audio * u64::from(AUDIO_SAMPLE_TICKS)) as i64;
                writer.write_sample(
                    audio,
                    &Sample::new(vec![0xA5; 16], dts, AUDIO_SAMPLE_TICKS, AUDIO_SAMPLE_RATE),
                )?;
                next_audio += 1;
            }
        }
    }
    writer.finish()
}

/// Overwrite entry `entry` of the `stco` or `stsz` table of the
/// `track`th track (0-based) in place, to produce a damaged movie.
pub fn patch_sample_table(
    path: &Path,
    track: usize,
    table: &[u8; 4],
    entry: u32,
    value: u32,
) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.seek(SeekFrom::End(0))?;
    let moov = child_atoms(&mut file, 0, len)?
        .into_iter()
        .find(|h| &h.atom_type == b"moov")
        .ok_or(Error::MissingAtom("moov"))?;
    let trak = child_atoms(&mut file, moov.content_start, moov.end())?
        .into_iter()
        .filter(|h| &h.atom_type == b"trak")
        .nth(track)
        .ok_or_else(|| Error::invalid_movie(format!("no track at index {track}")))?;
    let atom = find_path(&mut file, &trak, &[b"mdia", b"minf", b"stbl", table])?
        .ok_or(Error::MissingAtom("sample table"))?;
    // Entries follow version/flags and the entry count; stsz also has a
    // uniform sample size first.
    let entries_start = if table == b"stsz" { 12 } else { 8 };
    file.seek(SeekFrom::Start(
        atom.content_start + entries_start + u64::from(entry) * 4,
    ))?;
    file.write_all(&value.to_be_bytes())?;
    Ok(())
}

/// A visual sample entry with a placeholder codec configuration atom.
pub fn video_sample_entry(codec: [u8; 4], width: u32, height: u32) -> SampleEntry {
    let mut content = vec![0u8; 6];
    content.extend_from_slice(&1u16.to_be_bytes()); // data reference index
    content.extend_from_slice(&[0u8; 16]); // pre_defined / reserved
    content.extend_from_slice(&(width as u16).to_be_bytes());
    content.extend_from_slice(&(height as u16).to_be_bytes());
    content.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
    content.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    content.extend_from_slice(&0u32.to_be_bytes());
    content.extend_from_slice(&1u16.to_be_bytes()); // frame count
    content.extend_from_slice(&[0u8; 32]); // compressor name
    content.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
    content.extend_from_slice(&(-1i16).to_be_bytes());

    let config_type = match &codec {
        b"hvc1" | b"hev1" => *b"hvcC",
        _ => *b"avcC",
    };
    content.extend_from_slice(&atom(&config_type, &[1, 0x64, 0, 0x1F, 0xFF]));
    SampleEntry {
        fourcc: codec,
        raw: atom(&codec, &content),
    }
}

/// An `mp4a` sound sample entry with a placeholder `esds`.
pub fn audio_sample_entry(sample_rate: u32, channels: u16) -> SampleEntry {
    let mut content = vec![0u8; 6];
    content.extend_from_slice(&1u16.to_be_bytes());
    content.extend_from_slice(&[0u8; 8]); // version, revision, vendor
    content.extend_from_slice(&channels.to_be_bytes());
    content.extend_from_slice(&16u16.to_be_bytes());
    content.extend_from_slice(&0u16.to_be_bytes());
    content.extend_from_slice(&0u16.to_be_bytes());
    content.extend_from_slice(&(sample_rate << 16).to_be_bytes());
    content.extend_from_slice(&atom(b"esds", &[0, 0, 0, 0, 3, 0x80]));
    SampleEntry {
        fourcc: *b"mp4a",
        raw: atom(b"mp4a", &content),
    }
}

fn atom(kind: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let mut out = ((8 + content.len()) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(content);
    out
}

fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn jpeg_with(width: u16, height: u16, extra: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    out.extend_from_slice(&segment(
        0xE0,
        &[b'J', b'F', b'I', b'F', 0, 1, 1, 0, 0, 1, 0, 1, 0, 0],
    ));
    for seg in extra {
        out.extend_from_slice(seg);
    }
    let mut sof = vec![8];
    sof.extend_from_slice(&height.to_be_bytes());
    sof.extend_from_slice(&width.to_be_bytes());
    sof.extend_from_slice(&[1, 1, 0x11, 0]);
    out.extend_from_slice(&segment(0xC0, &sof));
    out.extend_from_slice(&segment(0xDA, &[1, 1, 0, 0, 63, 0]));
    out.extend_from_slice(&[0x12, 0x34, 0x56]);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// A minimal baseline JPEG header with the given dimensions.
pub fn jpeg_bytes(width: u16, height: u16) -> Vec<u8> {
    jpeg_with(width, height, &[])
}

/// A JPEG whose EXIF carries an Apple MakerNote with `identifier` in tag 0x11.
pub fn apple_jpeg_bytes(width: u16, height: u16, identifier: &str) -> Vec<u8> {
    let mut note = b"Apple iOS\0".to_vec();
    note.extend_from_slice(&[0, 1]);
    note.extend_from_slice(b"MM");
    note.extend_from_slice(&1u16.to_be_bytes());
    note.extend_from_slice(&0x0011u16.to_be_bytes());
    note.extend_from_slice(&2u16.to_be_bytes()); // ASCII
    note.extend_from_slice(&(identifier.len() as u32 + 1).to_be_bytes());
    note.extend_from_slice(&32u32.to_be_bytes()); // value offset within note
    note.extend_from_slice(&0u32.to_be_bytes());
    note.extend_from_slice(identifier.as_bytes());
    note.push(0);

    let mut tiff = b"MM".to_vec();
    tiff.extend_from_slice(&0x002Au16.to_be_bytes());
    tiff.extend_from_slice(&8u32.to_be_bytes());
    // IFD0 at 8: ExifIFD pointer
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x8769u16.to_be_bytes());
    tiff.extend_from_slice(&4u16.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&26u32.to_be_bytes());
    tiff.extend_from_slice(&0u32.to_be_bytes());
    // Exif IFD at 26: MakerNote
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x927Cu16.to_be_bytes());
    tiff.extend_from_slice(&7u16.to_be_bytes());
    tiff.extend_from_slice(&(note.len() as u32).to_be_bytes());
    tiff.extend_from_slice(&44u32.to_be_bytes());
    tiff.extend_from_slice(&0u32.to_be_bytes());
    tiff.extend_from_slice(&note);

    let mut exif = b"Exif\0\0".to_vec();
    exif.extend_from_slice(&tiff);
    jpeg_with(width, height, &[segment(0xE1, &exif)])
}

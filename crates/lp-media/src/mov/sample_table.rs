//! Sample tables: resolving `stbl` into a flat sample list, and building one.
//!
//! The reader side walks stts, ctts, stss, stsz, stsc and stco/co64 and maps
//! every sample to its absolute file offset. The writer side accumulates one
//! sample per chunk and serializes the same tables back.

use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom};

use super::atoms::{child_atoms, read_fullbox_header, read_i32, read_u32, read_u64, AtomHeader};
use super::boxes::{fullbox_header, write_atom};

/// A sample with its absolute file position and timing in media ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSample {
    pub index: u32,
    pub file_offset: u64,
    pub size: u32,
    pub duration: u32,
    pub composition_offset: i32,
    pub is_sync: bool,
    pub decode_timestamp: u64,
}

/// The resolved sample table of one track.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSampleTable {
    pub samples: Vec<ResolvedSample>,
    pub timescale: u32,
}

impl ResolvedSampleTable {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sum of all sample durations, in media ticks.
    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|s| u64::from(s.duration)).sum()
    }
}

fn parse_pairs<R: Read>(reader: &mut R) -> io::Result<Vec<(u32, u32)>> {
    let (_version, _flags) = read_fullbox_header(reader)?;
    let entry_count = read_u32(reader)?;
    let mut entries = Vec::with_capacity(entry_count.min(1 << 16) as usize);
    for _ in 0..entry_count {
        entries.push((read_u32(reader)?, read_u32(reader)?));
    }
    Ok(entries)
}

fn parse_ctts<R: Read>(reader: &mut R) -> io::Result<Vec<(u32, i32)>> {
    let (version, _flags) = read_fullbox_header(reader)?;
    let entry_count = read_u32(reader)?;
    let mut entries = Vec::with_capacity(entry_count.min(1 << 16) as usize);
    for _ in 0..entry_count {
        let count = read_u32(reader)?;
        let offset = if version == 0 {
            read_u32(reader)? as i32
        } else {
            read_i32(reader)?
        };
        entries.push((count, offset));
    }
    Ok(entries)
}

/// 0-based indices of sync samples.
fn parse_stss<R: Read>(reader: &mut R) -> io::Result<HashSet<u32>> {
    let (_version, _flags) = read_fullbox_header(reader)?;
    let entry_count = read_u32(reader)?;
    let mut syncs = HashSet::with_capacity(entry_count.min(1 << 16) as usize);
    for _ in 0..entry_count {
        syncs.insert(read_u32(reader)?.saturating_sub(1));
    }
    Ok(syncs)
}

/// `stream_len` bounds a uniform-size table: its samples must fit in the file.
fn parse_stsz<R: Read>(reader: &mut R, stream_len: u64) -> io::Result<Vec<u32>> {
    let (_version, _flags) = read_fullbox_header(reader)?;
    let sample_size = read_u32(reader)?;
    let sample_count = read_u32(reader)?;
    if sample_size != 0 {
        if u64::from(sample_size) * u64::from(sample_count) > stream_len {
            return Err(invalid(format!(
                "stsz declares {sample_count} samples of {sample_size} bytes in a {stream_len} byte file"
            )));
        }
        return Ok(vec![sample_size; sample_count as usize]);
    }
    let mut sizes = Vec::with_capacity(sample_count.min(1 << 20) as usize);
    for _ in 0..sample_count {
        sizes.push(read_u32(reader)?);
    }
    Ok(sizes)
}

/// (first_chunk, samples_per_chunk), 1-based chunk numbers.
fn parse_stsc<R: Read>(reader: &mut R) -> io::Result<Vec<(u32, u32)>> {
    let (_version, _flags) = read_fullbox_header(reader)?;
    let entry_count = read_u32(reader)?;
    let mut entries = Vec::with_capacity(entry_count.min(1 << 16) as usize);
    for _ in 0..entry_count {
        let first_chunk = read_u32(reader)?;
        let samples_per_chunk = read_u32(reader)?;
        let _description_index = read_u32(reader)?;
        entries.push((first_chunk, samples_per_chunk));
    }
    Ok(entries)
}

fn parse_chunk_offsets<R: Read>(reader: &mut R, wide: bool) -> io::Result<Vec<u64>> {
    let (_version, _flags) = read_fullbox_header(reader)?;
    let entry_count = read_u32(reader)?;
    let mut offsets = Vec::with_capacity(entry_count.min(1 << 20) as usize);
    for _ in 0..entry_count {
        offsets.push(if wide {
            read_u64(reader)?
        } else {
            u64::from(read_u32(reader)?)
        });
    }
    Ok(offsets)
}

fn missing(name: &str) -> io::Error {
    invalid(format!("Missing {name} atom"))
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Resolve the sample table held by the `stbl` atom.
pub fn resolve_sample_table<R: Read + Seek>(
    reader: &mut R,
    stbl: &AtomHeader,
    timescale: u32,
) -> io::Result<ResolvedSampleTable> {
    let children = child_atoms(reader, stbl.content_start, stbl.end())?;
    let find = |kind: &[u8; 4]| children.iter().find(|h| &h.atom_type == kind).copied();

    let stts = find(b"stts").ok_or_else(|| missing("stts"))?;
    reader.seek(SeekFrom::Start(stts.content_start))?;
    let stts_entries = parse_pairs(reader)?;

    let ctts_entries = match find(b"ctts") {
        Some(h) => {
            reader.seek(SeekFrom::Start(h.content_start))?;
            parse_ctts(reader)?
        }
        None => Vec::new(),
    };

    // No stss means every sample is a sync sample.
    let sync_set = match find(b"stss") {
        Some(h) => {
            reader.seek(SeekFrom::Start(h.content_start))?;
            Some(parse_stss(reader)?)
        }
        None => None,
    };

    let stsz = find(b"stsz").ok_or_else(|| missing("stsz"))?;
    let stream_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(stsz.content_start))?;
    let sizes = parse_stsz(reader, stream_len)?;

    let stsc = find(b"stsc").ok_or_else(|| missing("stsc"))?;
    reader.seek(SeekFrom::Start(stsc.content_start))?;
    let stsc_entries = parse_stsc(reader)?;

    let chunk_offsets = if let Some(h) = find(b"stco") {
        reader.seek(SeekFrom::Start(h.content_start))?;
        parse_chunk_offsets(reader, false)?
    } else if let Some(h) = find(b"co64") {
        reader.seek(SeekFrom::Start(h.content_start))?;
        parse_chunk_offsets(reader, true)?
    } else {
        return Err(missing("stco/co64"));
    };

    let sample_count = sizes.len();
    if sample_count > 0 && stsc_entries.is_empty() {
        return Err(invalid("stsc has no entries for a non-empty track"));
    }

    // Walk chunks, assigning file offsets.
    let mut placed = Vec::with_capacity(sample_count);
    let mut entry_idx = 0usize;
    for (chunk_idx, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_idx as u32 + 1;
        while entry_idx + 1 < stsc_entries.len() && stsc_entries[entry_idx + 1].0 <= chunk_number
        {
            entry_idx += 1;
        }
        let per_chunk = stsc_entries.get(entry_idx).map_or(0, |e| e.1);
        let mut offset = chunk_offset;
        for _ in 0..per_chunk {
            let Some(&size) = sizes.get(placed.len()) else {
                break;
            };
            placed.push((offset, size));
            offset += u64::from(size);
        }
    }

    let mut timing = Vec::with_capacity(sample_count);
    let mut dts = 0u64;
    for &(count, delta) in &stts_entries {
        for _ in 0..count {
            if timing.len() == sample_count {
                break;
            }
            timing.push((dts, delta));
            dts += u64::from(delta);
        }
    }

    let mut cts_offsets = Vec::with_capacity(sample_count);
    for &(count, offset) in &ctts_entries {
        if count as usize > sample_count - cts_offsets.len() {
            return Err(invalid(format!(
                "ctts describes more than the track's {sample_count} samples"
            )));
        }
        cts_offsets.extend(std::iter::repeat(offset).take(count as usize));
    }

    let samples = placed
        .into_iter()
        .enumerate()
        .map(|(i, (file_offset, size))| {
            let index = i as u32;
            let (decode_timestamp, duration) = timing.get(i).copied().unwrap_or((dts, 0));
            ResolvedSample {
                index,
                file_offset,
                size,
                duration,
                composition_offset: cts_offsets.get(i).copied().unwrap_or(0),
                is_sync: sync_set.as_ref().map_or(true, |s| s.contains(&index)),
                decode_timestamp,
            }
        })
        .collect();

    Ok(ResolvedSampleTable { samples, timescale })
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates the sample table of a track being written, one sample per chunk.
#[derive(Debug, Default, Clone)]
pub(crate) struct SampleTableBuilder {
    durations: Vec<u32>,
    composition_offsets: Vec<i32>,
    sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    sync: Vec<bool>,
}

impl SampleTableBuilder {
    pub(crate) fn push(
        &mut self,
        file_offset: u64,
        size: u32,
        duration: u32,
        composition_offset: i32,
        is_sync: bool,
    ) {
        self.chunk_offsets.push(file_offset);
        self.sizes.push(size);
        self.durations.push(duration);
        self.composition_offsets.push(composition_offset);
        self.sync.push(is_sync);
    }

    pub(crate) fn len(&self) -> usize {
        self.sizes.len()
    }

    /// Stretch or shorten the most recent sample to `duration` ticks.
    pub(crate) fn set_last_duration(&mut self, duration: u32) {
        if let Some(last) = self.durations.last_mut() {
            *last = duration;
        }
    }

    pub(crate) fn total_duration(&self) -> u64 {
        self.durations.iter().map(|&d| u64::from(d)).sum()
    }

    /// Serialize every table except `stsd`, in canonical order.
    pub(crate) fn write_tables(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.write_stts());
        if self.composition_offsets.iter().any(|&o| o != 0) {
            out.extend_from_slice(&self.write_ctts());
        }
        if self.sync.iter().any(|&s| !s) {
            out.extend_from_slice(&self.write_stss());
        }
        out.extend_from_slice(&self.write_stsc());
        out.extend_from_slice(&self.write_stsz());
        out.extend_from_slice(&self.write_chunk_offsets());
        out
    }

    fn write_stts(&self) -> Vec<u8> {
        let runs = run_length(&self.durations);
        let mut content = Vec::with_capacity(8 + runs.len() * 8);
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&(runs.len() as u32).to_be_bytes());
        for (count, delta) in runs {
            content.extend_from_slice(&count.to_be_bytes());
            content.extend_from_slice(&delta.to_be_bytes());
        }
        write_atom(b"stts", &content)
    }

    fn write_ctts(&self) -> Vec<u8> {
        let runs = run_length(&self.composition_offsets);
        let version = u8::from(self.composition_offsets.iter().any(|&o| o < 0));
        let mut content = Vec::with_capacity(8 + runs.len() * 8);
        content.extend_from_slice(&fullbox_header(version, 0));
        content.extend_from_slice(&(runs.len() as u32).to_be_bytes());
        for (count, offset) in runs {
            content.extend_from_slice(&count.to_be_bytes());
            content.extend_from_slice(&offset.to_be_bytes());
        }
        write_atom(b"ctts", &content)
    }

    fn write_stss(&self) -> Vec<u8> {
        let syncs: Vec<u32> = self
            .sync
            .iter()
            .enumerate()
            .filter(|(_, &s)| s)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        let mut content = Vec::with_capacity(8 + syncs.len() * 4);
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&(syncs.len() as u32).to_be_bytes());
        for n in syncs {
            content.extend_from_slice(&n.to_be_bytes());
        }
        write_atom(b"stss", &content)
    }

    fn write_stsc(&self) -> Vec<u8> {
        let mut content = Vec::with_capacity(20);
        content.extend_from_slice(&fullbox_header(0, 0));
        if self.sizes.is_empty() {
            content.extend_from_slice(&0u32.to_be_bytes());
        } else {
            content.extend_from_slice(&1u32.to_be_bytes());
            content.extend_from_slice(&1u32.to_be_bytes()); // first chunk
            content.extend_from_slice(&1u32.to_be_bytes()); // samples per chunk
            content.extend_from_slice(&1u32.to_be_bytes()); // description index
        }
        write_atom(b"stsc", &content)
    }

    fn write_stsz(&self) -> Vec<u8> {
        let mut content = Vec::with_capacity(12 + self.sizes.len() * 4);
        content.extend_from_slice(&fullbox_header(0, 0));
        let uniform = match self.sizes.first() {
            Some(&first) if self.sizes.iter().all(|&s| s == first) => first,
            _ => 0,
        };
        content.extend_from_slice(&uniform.to_be_bytes());
        content.extend_from_slice(&(self.sizes.len() as u32).to_be_bytes());
        if uniform == 0 {
            for size in &self.sizes {
                content.extend_from_slice(&size.to_be_bytes());
            }
        }
        write_atom(b"stsz", &content)
    }

    fn write_chunk_offsets(&self) -> Vec<u8> {
        let wide = self.chunk_offsets.iter().any(|&o| o > u64::from(u32::MAX));
        let mut content = Vec::with_capacity(8 + self.chunk_offsets.len() * 8);
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&(self.chunk_offsets.len() as u32).to_be_bytes());
        for &offset in &self.chunk_offsets {
            if wide {
                content.extend_from_slice(&offset.to_be_bytes());
            } else {
                content.extend_from_slice(&(offset as u32).to_be_bytes());
            }
        }
        write_atom(if wide { b"co64" } else { b"stco" }, &content)
    }
}

fn run_length<T: Copy + PartialEq>(values: &[T]) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for &v in values {
        match runs.last_mut() {
            Some((count, last)) if *last == v => *count += 1,
            _ => runs.push((1, v)),
        }
    }
    runs
}

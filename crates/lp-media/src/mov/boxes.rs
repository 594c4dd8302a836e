//! Atom serialization primitives for the QuickTime movie writer.
//!
//! Each atom follows the standard layout: 4-byte size (big-endian u32),
//! 4-byte type (ASCII), then atom-specific content.

use super::Matrix;

// ---------------------------------------------------------------------------
// Low-level atom writing helpers
// ---------------------------------------------------------------------------

/// Write a complete atom: size (u32 BE) + type (4 bytes) + content.
pub(crate) fn write_atom(atom_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let size = (8 + content.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(atom_type);
    out.extend_from_slice(content);
    out
}

/// Write a container atom (size + type + children concatenated).
pub(crate) fn write_container(atom_type: &[u8; 4], children: &[&[u8]]) -> Vec<u8> {
    let children_len: usize = children.iter().map(|c| c.len()).sum();
    let size = (8 + children_len) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(atom_type);
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

/// Version + flags word of a full atom.
pub(crate) fn fullbox_header(version: u8, flags: u32) -> [u8; 4] {
    let val = (u32::from(version) << 24) | (flags & 0x00FF_FFFF);
    val.to_be_bytes()
}

// ---------------------------------------------------------------------------
// File-level atoms
// ---------------------------------------------------------------------------

/// `ftyp` for a QuickTime movie: major brand "qt  ", compatible "qt  ".
pub(crate) fn write_ftyp() -> Vec<u8> {
    let mut content = Vec::with_capacity(12);
    content.extend_from_slice(b"qt  ");
    content.extend_from_slice(&0x0000_0200u32.to_be_bytes());
    content.extend_from_slice(b"qt  ");
    write_atom(b"ftyp", &content)
}

/// Size of the `mdat` header produced by [`write_mdat_header`].
pub(crate) const MDAT_HEADER_SIZE: u64 = 16;

/// `mdat` header with a 64-bit size so the payload is never size-limited.
///
/// `total_size` includes the 16 header bytes.
pub(crate) fn write_mdat_header(total_size: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&1u32.to_be_bytes());
    out[4..8].copy_from_slice(b"mdat");
    out[8..16].copy_from_slice(&total_size.to_be_bytes());
    out
}

// ---------------------------------------------------------------------------
// Movie and track headers
// ---------------------------------------------------------------------------

fn write_matrix(content: &mut Vec<u8>, matrix: &Matrix) {
    for value in matrix.0 {
        content.extend_from_slice(&value.to_be_bytes());
    }
}

pub(crate) fn write_mvhd(timescale: u32, duration: u64, next_track_id: u32) -> Vec<u8> {
    let mut content = Vec::with_capacity(112);
    let v1 = duration > u64::from(u32::MAX);
    content.extend_from_slice(&fullbox_header(u8::from(v1), 0));
    if v1 {
        content.extend_from_slice(&0u64.to_be_bytes()); // creation_time
        content.extend_from_slice(&0u64.to_be_bytes()); // modification_time
        content.extend_from_slice(&timescale.to_be_bytes());
        content.extend_from_slice(&duration.to_be_bytes());
    } else {
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&timescale.to_be_bytes());
        content.extend_from_slice(&(duration as u32).to_be_bytes());
    }
    // rate 1.0 (16.16), volume 1.0 (8.8), reserved 10
    content.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    content.extend_from_slice(&0x0100u16.to_be_bytes());
    content.extend_from_slice(&[0u8; 10]);
    write_matrix(&mut content, &Matrix::IDENTITY);
    // preview/poster/selection/current times (QuickTime pre_defined)
    content.extend_from_slice(&[0u8; 24]);
    content.extend_from_slice(&next_track_id.to_be_bytes());
    write_atom(b"mvhd", &content)
}

/// Parameters of a `tkhd` atom.
pub(crate) struct TrackHeader<'a> {
    pub track_id: u32,
    /// In the movie timescale.
    pub duration: u64,
    /// 8.8 fixed; 0x0100 for audio, 0 otherwise.
    pub volume: u16,
    pub width: u32,
    pub height: u32,
    pub matrix: &'a Matrix,
}

pub(crate) fn write_tkhd(header: &TrackHeader<'_>) -> Vec<u8> {
    let mut content = Vec::with_capacity(92);
    let v1 = header.duration > u64::from(u32::MAX);
    // flags 3: enabled | in movie
    content.extend_from_slice(&fullbox_header(u8::from(v1), 3));
    if v1 {
        content.extend_from_slice(&0u64.to_be_bytes());
        content.extend_from_slice(&0u64.to_be_bytes());
        content.extend_from_slice(&header.track_id.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&header.duration.to_be_bytes());
    } else {
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&header.track_id.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&(header.duration as u32).to_be_bytes());
    }
    // reserved 8, layer, alternate group
    content.extend_from_slice(&[0u8; 8]);
    content.extend_from_slice(&0u16.to_be_bytes());
    content.extend_from_slice(&0u16.to_be_bytes());
    content.extend_from_slice(&header.volume.to_be_bytes());
    content.extend_from_slice(&0u16.to_be_bytes());
    write_matrix(&mut content, header.matrix);
    content.extend_from_slice(&(header.width << 16).to_be_bytes());
    content.extend_from_slice(&(header.height << 16).to_be_bytes());
    write_atom(b"tkhd", &content)
}

/// `edts` holding an empty edit of `empty_duration` followed by the media.
///
/// Both durations are in the movie timescale.
pub(crate) fn write_edts(empty_duration: u64, media_duration: u64) -> Vec<u8> {
    let mut content = Vec::with_capacity(32);
    content.extend_from_slice(&fullbox_header(0, 0));
    content.extend_from_slice(&2u32.to_be_bytes());
    // empty edit: media_time -1
    content.extend_from_slice(&(empty_duration.min(u64::from(u32::MAX)) as u32).to_be_bytes());
    content.extend_from_slice(&(-1i32).to_be_bytes());
    content.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    content.extend_from_slice(&(media_duration.min(u64::from(u32::MAX)) as u32).to_be_bytes());
    content.extend_from_slice(&0i32.to_be_bytes());
    content.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    let elst = write_atom(b"elst", &content);
    write_container(b"edts", &[&elst])
}

pub(crate) fn write_mdhd(timescale: u32, duration: u64) -> Vec<u8> {
    let mut content = Vec::with_capacity(32);
    let v1 = duration > u64::from(u32::MAX);
    content.extend_from_slice(&fullbox_header(u8::from(v1), 0));
    if v1 {
        content.extend_from_slice(&0u64.to_be_bytes());
        content.extend_from_slice(&0u64.to_be_bytes());
        content.extend_from_slice(&timescale.to_be_bytes());
        content.extend_from_slice(&duration.to_be_bytes());
    } else {
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&timescale.to_be_bytes());
        content.extend_from_slice(&(duration as u32).to_be_bytes());
    }
    // language: undetermined, quality 0
    content.extend_from_slice(&0x55C4u16.to_be_bytes());
    content.extend_from_slice(&0u16.to_be_bytes());
    write_atom(b"mdhd", &content)
}

/// `hdlr` atom. `component_type` is "mhlr" inside `mdia`, zero in `meta`.
pub(crate) fn write_hdlr(component_type: [u8; 4], handler_type: &[u8; 4], name: &str) -> Vec<u8> {
    let mut content = Vec::with_capacity(25 + name.len());
    content.extend_from_slice(&fullbox_header(0, 0));
    content.extend_from_slice(&component_type);
    content.extend_from_slice(handler_type);
    content.extend_from_slice(&[0u8; 12]);
    content.extend_from_slice(name.as_bytes());
    content.push(0);
    write_atom(b"hdlr", &content)
}

// ---------------------------------------------------------------------------
// Media information
// ---------------------------------------------------------------------------

pub(crate) fn write_dinf() -> Vec<u8> {
    let url = write_atom(b"url ", &fullbox_header(0, 1)); // self-contained
    let dref = {
        let mut c = Vec::with_capacity(8 + url.len());
        c.extend_from_slice(&fullbox_header(0, 0));
        c.extend_from_slice(&1u32.to_be_bytes());
        c.extend_from_slice(&url);
        write_atom(b"dref", &c)
    };
    write_container(b"dinf", &[&dref])
}

pub(crate) fn write_vmhd() -> Vec<u8> {
    let mut content = Vec::with_capacity(12);
    content.extend_from_slice(&fullbox_header(0, 1));
    content.extend_from_slice(&0u16.to_be_bytes()); // graphicsmode
    content.extend_from_slice(&[0u8; 6]); // opcolor
    write_atom(b"vmhd", &content)
}

pub(crate) fn write_smhd() -> Vec<u8> {
    let mut content = Vec::with_capacity(8);
    content.extend_from_slice(&fullbox_header(0, 0));
    content.extend_from_slice(&0u16.to_be_bytes()); // balance
    content.extend_from_slice(&0u16.to_be_bytes());
    write_atom(b"smhd", &content)
}

pub(crate) fn write_nmhd() -> Vec<u8> {
    write_atom(b"nmhd", &fullbox_header(0, 0))
}

/// `stsd` wrapping already-serialized sample entries.
pub(crate) fn write_stsd(entries: &[&[u8]]) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(&fullbox_header(0, 0));
    content.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        content.extend_from_slice(entry);
    }
    write_atom(b"stsd", &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_layout() {
        let atom = write_atom(b"free", &[1, 2, 3]);
        assert_eq!(&atom[0..4], &11u32.to_be_bytes());
        assert_eq!(&atom[4..8], b"free");
        assert_eq!(&atom[8..], &[1, 2, 3]);
    }

    #[test]
    fn container_concatenates_children() {
        let a = write_atom(b"aaaa", &[]);
        let b = write_atom(b"bbbb", &[9]);
        let c = write_container(b"cont", &[&a, &b]);
        assert_eq!(c.len(), 8 + 8 + 9);
        assert_eq!(&c[8..12], &8u32.to_be_bytes());
    }

    #[test]
    fn mdat_header_is_extended() {
        let header = write_mdat_header(1024);
        assert_eq!(&header[0..4], &1u32.to_be_bytes());
        assert_eq!(&header[4..8], b"mdat");
        assert_eq!(u64::from_be_bytes(header[8..16].try_into().unwrap()), 1024);
    }

    #[test]
    fn mvhd_is_version_zero_for_short_movies() {
        let mvhd = write_mvhd(600, 1800, 3);
        assert_eq!(mvhd.len(), 108);
        assert_eq!(mvhd[8], 0);
        assert_eq!(&mvhd[mvhd.len() - 4..], &3u32.to_be_bytes());
    }

    #[test]
    fn tkhd_carries_matrix_and_size() {
        let m = Matrix([0, 0x10000, 0, -0x10000, 0, 0, 1080 << 16, 0, 0x4000_0000]);
        let tkhd = write_tkhd(&TrackHeader {
            track_id: 1,
            duration: 600,
            volume: 0,
            width: 1920,
            height: 1080,
            matrix: &m,
        });
        assert_eq!(tkhd.len(), 92);
        // matrix begins after 8 header + 4 ver + 20 times/ids + 8 + 8
        let b = u32::from_be_bytes(tkhd[52..56].try_into().unwrap());
        assert_eq!(b, 0x10000);
        let w = u32::from_be_bytes(tkhd[84..88].try_into().unwrap());
        assert_eq!(w >> 16, 1920);
    }

    #[test]
    fn edts_has_empty_edit() {
        let edts = write_edts(900, 20);
        assert_eq!(&edts[4..8], b"edts");
        assert_eq!(&edts[12..16], b"elst");
        let media_time = i32::from_be_bytes(edts[28..32].try_into().unwrap());
        assert_eq!(media_time, -1);
    }
}

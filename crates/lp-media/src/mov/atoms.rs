//! Atom header parsing and navigation over a seekable reader.

use std::io::{self, Read, Seek, SeekFrom};

/// A parsed atom header together with where its content starts.
#[derive(Debug, Clone, Copy)]
pub struct AtomHeader {
    /// 4-byte atom type (e.g. `b"moov"`).
    pub atom_type: [u8; 4],
    /// Total size of the atom including the header.
    pub size: u64,
    /// Size of the header itself (8, or 16 for 64-bit sizes).
    pub header_size: u64,
    /// Absolute offset of the first content byte.
    pub content_start: u64,
}

impl AtomHeader {
    /// Size of the atom content (size - header_size).
    pub fn content_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size)
    }

    /// Absolute offset one past the last content byte.
    pub fn end(&self) -> u64 {
        self.content_start + self.content_size()
    }

    /// The atom type as printable text.
    pub fn type_str(&self) -> String {
        fourcc_str(&self.atom_type)
    }
}

/// Render a fourcc for logs and error messages, escaping non-ASCII bytes.
pub fn fourcc_str(code: &[u8; 4]) -> String {
    code.iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                (b as char).to_string()
            } else {
                format!("\\x{b:02x}")
            }
        })
        .collect()
}

/// Read an atom header at the current position, bounded by `limit`.
///
/// Returns `Ok(None)` when fewer than 8 bytes remain before `limit`. A
/// zero size field means the atom runs to `limit`.
pub fn read_atom_header<R: Read + Seek>(
    reader: &mut R,
    limit: u64,
) -> io::Result<Option<AtomHeader>> {
    let start = reader.stream_position()?;
    if start + 8 > limit {
        return Ok(None);
    }
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;

    let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let atom_type = [buf[4], buf[5], buf[6], buf[7]];

    let (size, header_size) = match size32 {
        1 => (read_u64(reader)?, 16u64),
        0 => (limit - start, 8u64),
        n => (u64::from(n), 8u64),
    };

    if size < header_size || start + size > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "atom '{}' at {start} has size {size} beyond its parent",
                fourcc_str(&atom_type)
            ),
        ));
    }

    Ok(Some(AtomHeader {
        atom_type,
        size,
        header_size,
        content_start: start + header_size,
    }))
}

/// List the direct children of the region `[start, end)`.
///
/// Leaves the reader at an unspecified position.
pub fn child_atoms<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
) -> io::Result<Vec<AtomHeader>> {
    let mut children = Vec::new();
    let mut pos = start;
    while pos < end {
        reader.seek(SeekFrom::Start(pos))?;
        let Some(header) = read_atom_header(reader, end)? else {
            break;
        };
        pos = header.content_start + header.content_size();
        children.push(header);
    }
    Ok(children)
}

/// Find the first direct child of `parent` with type `target`.
pub fn find_child<R: Read + Seek>(
    reader: &mut R,
    parent: &AtomHeader,
    target: &[u8; 4],
) -> io::Result<Option<AtomHeader>> {
    Ok(child_atoms(reader, parent.content_start, parent.end())?
        .into_iter()
        .find(|h| &h.atom_type == target))
}

/// Follow a path of atom types from `parent`, e.g. `[b"mdia", b"minf"]`.
pub fn find_path<R: Read + Seek>(
    reader: &mut R,
    parent: &AtomHeader,
    path: &[&[u8; 4]],
) -> io::Result<Option<AtomHeader>> {
    let mut current = *parent;
    for target in path {
        match find_child(reader, &current, target)? {
            Some(h) => current = h,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Read an atom's entire content into memory.
pub fn read_content<R: Read + Seek>(reader: &mut R, header: &AtomHeader) -> io::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(header.content_start))?;
    read_bytes(reader, header.content_size() as usize)
}

/// Read a big-endian u16.
pub fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Read a big-endian u32.
pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Read a big-endian i32.
pub fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

/// Read a big-endian u64.
pub fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Read a big-endian i64.
pub fn read_i64<R: Read>(reader: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

/// Read a fourcc.
pub fn read_fourcc<R: Read>(reader: &mut R) -> io::Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read `n` bytes into a new Vec.
pub fn read_bytes<R: Read>(reader: &mut R, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a full-atom header and return (version, flags).
pub fn read_fullbox_header<R: Read>(reader: &mut R) -> io::Result<(u8, u32)> {
    let val = read_u32(reader)?;
    Ok(((val >> 24) as u8, val & 0x00FF_FFFF))
}

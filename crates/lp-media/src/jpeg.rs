//! JPEG property dictionaries.
//!
//! Properties are exposed as a JSON object keyed like the platform image
//! property dictionaries (`PixelWidth`, `{MakerApple}`, ...). Reading merges
//! three sources: the frame header, the Apple MakerNote inside EXIF, and a
//! private APP11 segment holding a JSON dictionary. Writing replaces the
//! APP11 segment only; the compressed image data is never touched.

use serde_json::{Map, Value};
use std::io::Write;
use std::ops::Range;
use std::path::Path;

use crate::error::{Error, Result};

/// A property dictionary.
pub type Properties = Map<String, Value>;

/// Vendor dictionary holding Apple-specific properties.
pub const MAKER_APPLE_KEY: &str = "{MakerApple}";
/// Key of the pairing identifier inside [`MAKER_APPLE_KEY`].
pub const MAKER_APPLE_IDENTIFIER_KEY: &str = "17";
pub const PIXEL_WIDTH_KEY: &str = "PixelWidth";
pub const PIXEL_HEIGHT_KEY: &str = "PixelHeight";

const APP11_SIGNATURE: &[u8] = b"LIVEPAIR\0";
const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
const APPLE_MAKERNOTE_SIGNATURE: &[u8] = b"Apple iOS\0";

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP1: u8 = 0xE1;
const APP11: u8 = 0xEB;

/// One marker segment; `bytes` spans from the 0xFF prefix to the payload end.
#[derive(Debug, Clone)]
struct Segment {
    marker: u8,
    bytes: Range<usize>,
    payload: Range<usize>,
}

/// Split the header of a JPEG into marker segments, stopping at SOS or EOI.
///
/// The returned offset is where the entropy-coded tail (SOS onwards) starts.
fn segments(data: &[u8]) -> Result<(Vec<Segment>, usize)> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != SOI {
        return Err(Error::invalid_jpeg("missing SOI marker"));
    }
    let mut out = Vec::new();
    let mut pos = 2usize;
    loop {
        let start = pos;
        if data.get(pos) != Some(&0xFF) {
            return Err(Error::invalid_jpeg(format!("expected marker at offset {pos}")));
        }
        while data.get(pos) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *data
            .get(pos)
            .ok_or_else(|| Error::invalid_jpeg("truncated before SOS"))?;
        pos += 1;

        match marker {
            SOS | EOI => return Ok((out, start)),
            0x01 | 0xD0..=0xD7 => continue,
            _ => {}
        }

        let len = data
            .get(pos..pos + 2)
            .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
            .ok_or_else(|| Error::invalid_jpeg("truncated segment length"))?;
        if len < 2 || pos + len > data.len() {
            return Err(Error::invalid_jpeg(format!(
                "segment 0x{marker:02X} length {len} overruns file"
            )));
        }
        out.push(Segment {
            marker,
            bytes: start..pos + len,
            payload: pos + 2..pos + len,
        });
        pos += len;
    }
}

fn is_livepair_segment(data: &[u8], seg: &Segment) -> bool {
    seg.marker == APP11 && data[seg.payload.clone()].starts_with(APP11_SIGNATURE)
}

/// Read the property dictionary of the JPEG at `path`.
pub fn read_properties(path: &Path) -> Result<Properties> {
    let data = std::fs::read(path)?;
    parse_properties(&data)
}

/// Read the property dictionary of an in-memory JPEG.
pub fn parse_properties(data: &[u8]) -> Result<Properties> {
    let (segs, _) = segments(data)?;
    let mut props = Properties::new();

    for seg in &segs {
        let payload = &data[seg.payload.clone()];
        match seg.marker {
            // SOFn, excluding DHT (C4), JPG (C8) and DAC (CC)
            0xC0..=0xCF if !matches!(seg.marker, 0xC4 | 0xC8 | 0xCC) => {
                if payload.len() >= 5 {
                    let height = u16::from_be_bytes([payload[1], payload[2]]);
                    let width = u16::from_be_bytes([payload[3], payload[4]]);
                    props.insert(PIXEL_WIDTH_KEY.into(), Value::from(width));
                    props.insert(PIXEL_HEIGHT_KEY.into(), Value::from(height));
                }
            }
            APP1 if payload.starts_with(EXIF_SIGNATURE) => {
                if let Some(id) = apple_identifier(&payload[EXIF_SIGNATURE.len()..]) {
                    set_maker_apple_identifier(&mut props, &id);
                }
            }
            _ => {}
        }
    }

    // The private dictionary wins over anything derived from EXIF.
    for seg in segs.iter().filter(|s| is_livepair_segment(data, s)) {
        let json = &data[seg.payload.start + APP11_SIGNATURE.len()..seg.payload.end];
        let stored: Properties = serde_json::from_slice(json)
            .map_err(|e| Error::invalid_jpeg(format!("bad property segment: {e}")))?;
        merge(&mut props, stored);
    }

    Ok(props)
}

/// Set `{MakerApple}` → `"17"` to `identifier`, keeping other vendor keys.
pub fn set_maker_apple_identifier(props: &mut Properties, identifier: &str) {
    let value = Value::String(identifier.to_string());
    let entry = props
        .entry(MAKER_APPLE_KEY)
        .or_insert_with(|| Value::Object(Properties::new()));
    if let Value::Object(map) = entry {
        map.insert(MAKER_APPLE_IDENTIFIER_KEY.into(), value);
    } else {
        let mut map = Properties::new();
        map.insert(MAKER_APPLE_IDENTIFIER_KEY.into(), value);
        *entry = Value::Object(map);
    }
}

/// Merge `src` into `dst`, recursing into nested dictionaries.
fn merge(dst: &mut Properties, src: Properties) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
            (Some(slot), value) => *slot = value,
            (None, value) => {
                dst.insert(key, value);
            }
        }
    }
}

/// Replace the stored property dictionary of the JPEG at `path`, in place.
///
/// Derived keys (pixel dimensions) are not stored. The file is rewritten
/// through a temporary sibling and renamed over the original.
pub fn write_properties(path: &Path, props: &Properties) -> Result<()> {
    let data = std::fs::read(path)?;
    let rewritten = embed_properties(&data, props)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&rewritten)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    tracing::debug!("Rewrote JPEG properties of {}", path.display());
    Ok(())
}

/// Return a copy of `data` whose private property segment holds `props`.
pub fn embed_properties(data: &[u8], props: &Properties) -> Result<Vec<u8>> {
    let (segs, tail) = segments(data)?;

    let mut stored = props.clone();
    stored.remove(PIXEL_WIDTH_KEY);
    stored.remove(PIXEL_HEIGHT_KEY);

    let new_segment = if stored.is_empty() {
        None
    } else {
        let json = serde_json::to_vec(&stored)
            .map_err(|e| Error::invalid_jpeg(format!("cannot serialize properties: {e}")))?;
        let len = 2 + APP11_SIGNATURE.len() + json.len();
        let len = u16::try_from(len).map_err(|_| {
            Error::unsupported(format!("property dictionary of {len} bytes exceeds one segment"))
        })?;
        let mut seg = vec![0xFF, APP11];
        seg.extend_from_slice(&len.to_be_bytes());
        seg.extend_from_slice(APP11_SIGNATURE);
        seg.extend_from_slice(&json);
        Some(seg)
    };

    let kept: Vec<&Segment> = segs.iter().filter(|s| !is_livepair_segment(data, s)).collect();
    let insert_at = kept
        .iter()
        .position(|s| !(0xE0..=0xEF).contains(&s.marker))
        .unwrap_or(kept.len());

    let mut out = Vec::with_capacity(data.len() + new_segment.as_ref().map_or(0, Vec::len));
    out.extend_from_slice(&data[..2]);
    for (i, seg) in kept.iter().enumerate() {
        if i == insert_at {
            if let Some(new) = &new_segment {
                out.extend_from_slice(new);
            }
        }
        out.extend_from_slice(&data[seg.bytes.clone()]);
    }
    if insert_at == kept.len() {
        if let Some(new) = &new_segment {
            out.extend_from_slice(new);
        }
    }
    out.extend_from_slice(&data[tail..]);
    Ok(out)
}

// ---------------------------------------------------------------------------
// EXIF / Apple MakerNote
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Tiff<'a> {
    data: &'a [u8],
    little_endian: bool,
}

impl<'a> Tiff<'a> {
    fn u16_at(&self, at: usize) -> Option<u16> {
        let b: [u8; 2] = self.data.get(at..at + 2)?.try_into().ok()?;
        Some(if self.little_endian {
            u16::from_le_bytes(b)
        } else {
            u16::from_be_bytes(b)
        })
    }

    fn u32_at(&self, at: usize) -> Option<u32> {
        let b: [u8; 4] = self.data.get(at..at + 4)?.try_into().ok()?;
        Some(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    /// Find `tag` in the IFD at `ifd`; returns (type, count, value field offset).
    fn find_tag(&self, ifd: usize, tag: u16) -> Option<(u16, u32, usize)> {
        let count = usize::from(self.u16_at(ifd)?);
        (0..count)
            .map(|i| ifd + 2 + i * 12)
            .find(|&entry| self.u16_at(entry) == Some(tag))
            .and_then(|entry| Some((self.u16_at(entry + 2)?, self.u32_at(entry + 4)?, entry + 8)))
    }

    /// Bytes of an entry's value, inline or at an offset.
    fn value_bytes(&self, count: u32, field: usize) -> Option<&'a [u8]> {
        let count = count as usize;
        if count <= 4 {
            self.data.get(field..field + count)
        } else {
            let offset = self.u32_at(field)? as usize;
            self.data.get(offset..offset + count)
        }
    }
}

/// Extract the pairing identifier from the Apple MakerNote of a TIFF block.
fn apple_identifier(tiff_data: &[u8]) -> Option<String> {
    let little_endian = match tiff_data.get(0..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let tiff = Tiff {
        data: tiff_data,
        little_endian,
    };
    let ifd0 = tiff.u32_at(4)? as usize;
    let (_, _, exif_field) = tiff.find_tag(ifd0, 0x8769)?;
    let exif_ifd = tiff.u32_at(exif_field)? as usize;
    let (_, count, field) = tiff.find_tag(exif_ifd, 0x927C)?;
    let note = tiff.value_bytes(count, field)?;

    if !note.starts_with(APPLE_MAKERNOTE_SIGNATURE) {
        return None;
    }
    // The Apple note carries its own byte order at 12 and an IFD at 14, with
    // offsets relative to the start of the note.
    let note_tiff = Tiff {
        data: note,
        little_endian: note.get(12..14)? == b"II",
    };
    let (kind, count, field) = note_tiff.find_tag(14, 0x0011)?;
    if kind != 2 {
        return None;
    }
    let raw = note_tiff.value_bytes(count, field)?;
    let text = String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string();
    (!text.is_empty()).then_some(text)
}

/// The pairing identifier held under `{MakerApple}` → `"17"`, if any.
pub fn maker_apple_identifier(props: &Properties) -> Option<&str> {
    props
        .get(MAKER_APPLE_KEY)?
        .get(MAKER_APPLE_IDENTIFIER_KEY)?
        .as_str()
}

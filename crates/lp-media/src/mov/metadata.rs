//! QuickTime metadata atoms.
//!
//! Two flavours are handled:
//!
//! - movie-level metadata: a `meta` atom holding an `mdta` handler, a `keys`
//!   table and an `ilst` item list whose entries reference keys by 1-based
//!   index and wrap their value in a `data` atom;
//! - boxed timed metadata: an `mebx` sample entry declaring local key ids
//!   (`keyd` namespace + key, `dtyp` data type), and samples made of
//!   `[size][local id][value]` records.
//!
//! Legacy `udta` text items are read so identifier lookup can enumerate
//! every metadata format a movie carries.

use serde::Serialize;
use std::io::Cursor;

use super::atoms::{child_atoms, fourcc_str, read_atom_header, AtomHeader};
use super::boxes::{fullbox_header, write_atom, write_container, write_hdlr};
use crate::error::{Error, Result};

/// Key namespace of QuickTime metadata.
pub const MDTA_NAMESPACE: &str = "mdta";
/// Key carrying the pairing identifier as UTF-8.
pub const CONTENT_IDENTIFIER_KEY: &str = "com.apple.quicktime.content.identifier";
/// Key of the timed still-image anchor, an int8.
pub const STILL_IMAGE_TIME_KEY: &str = "com.apple.quicktime.still-image-time";
/// Common key that [`CONTENT_IDENTIFIER_KEY`] maps to.
pub const COMMON_KEY_IDENTIFIER: &str = "identifier";

/// Well-known data type: UTF-8 text.
pub const DATA_TYPE_UTF8: u32 = 1;
/// Well-known data type: signed 8-bit integer.
pub const DATA_TYPE_INT8: u32 = 65;

/// Where a metadata item was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MetadataFormat {
    /// `meta` / `keys` / `ilst` with `mdta` keys.
    QuickTimeMetadata,
    /// Legacy `udta` text items.
    QuickTimeUserData,
}

impl MetadataFormat {
    /// Identifier string for the format, as reported by `inspect`.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetadataFormat::QuickTimeMetadata => "com.apple.quicktime.mdta",
            MetadataFormat::QuickTimeUserData => "com.apple.quicktime.udta",
        }
    }
}

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Utf8(String),
    Int8(i8),
    /// Any other well-known type, kept raw.
    Data { type_code: u32, bytes: Vec<u8> },
}

impl MetadataValue {
    /// The well-known data type code.
    pub fn data_type(&self) -> u32 {
        match self {
            MetadataValue::Utf8(_) => DATA_TYPE_UTF8,
            MetadataValue::Int8(_) => DATA_TYPE_INT8,
            MetadataValue::Data { type_code, .. } => *type_code,
        }
    }

    /// Raw value bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            MetadataValue::Utf8(s) => s.as_bytes().to_vec(),
            MetadataValue::Int8(v) => vec![*v as u8],
            MetadataValue::Data { bytes, .. } => bytes.clone(),
        }
    }

    /// Interpret raw bytes according to `type_code`.
    pub fn decode(type_code: u32, bytes: &[u8]) -> Self {
        match (type_code, bytes) {
            (DATA_TYPE_UTF8, _) => MetadataValue::Utf8(String::from_utf8_lossy(bytes).into_owned()),
            (DATA_TYPE_INT8, [b]) => MetadataValue::Int8(*b as i8),
            _ => MetadataValue::Data {
                type_code,
                bytes: bytes.to_vec(),
            },
        }
    }

    /// The value as text, for UTF-8 values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Utf8(s) => Some(s),
            _ => None,
        }
    }
}

/// Declares one key of a timed metadata track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataKeySpec {
    pub namespace: String,
    pub key: String,
    pub data_type: u32,
}

impl MetadataKeySpec {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, data_type: u32) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            data_type,
        }
    }

    /// The still-image-time key: `mdta` namespace, int8.
    pub fn still_image_time() -> Self {
        Self::new(MDTA_NAMESPACE, STILL_IMAGE_TIME_KEY, DATA_TYPE_INT8)
    }
}

/// One metadata item of a movie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataItem {
    pub format: MetadataFormat,
    /// Key namespace, e.g. "mdta" or "udta".
    pub key_space: String,
    pub key: String,
    pub value: MetadataValue,
}

impl MetadataItem {
    /// An item in the `mdta` namespace.
    pub fn mdta(key: impl Into<String>, value: MetadataValue) -> Self {
        Self {
            format: MetadataFormat::QuickTimeMetadata,
            key_space: MDTA_NAMESPACE.to_string(),
            key: key.into(),
            value,
        }
    }

    /// The content-identifier item carrying `identifier` as UTF-8.
    pub fn content_identifier(identifier: &str) -> Self {
        Self::mdta(
            CONTENT_IDENTIFIER_KEY,
            MetadataValue::Utf8(identifier.to_string()),
        )
    }

    /// The format-independent key this item maps to, if any.
    pub fn common_key(&self) -> Option<&'static str> {
        let key = self.key.as_str();
        let common = match self.format {
            MetadataFormat::QuickTimeMetadata => match key {
                CONTENT_IDENTIFIER_KEY => COMMON_KEY_IDENTIFIER,
                "com.apple.quicktime.title" => "title",
                "com.apple.quicktime.creationdate" => "creationDate",
                "com.apple.quicktime.make" => "make",
                "com.apple.quicktime.model" => "model",
                "com.apple.quicktime.software" => "software",
                "com.apple.quicktime.location.ISO6709" => "location",
                _ => return None,
            },
            MetadataFormat::QuickTimeUserData => match key {
                "\\xa9nam" => "title",
                "\\xa9day" => "creationDate",
                "\\xa9mak" => "make",
                "\\xa9mod" => "model",
                "\\xa9swr" => "software",
                "\\xa9xyz" => "location",
                _ => return None,
            },
        };
        Some(common)
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::invalid_movie(msg)
}

fn slice<'a>(data: &'a [u8], header: &AtomHeader) -> &'a [u8] {
    &data[header.content_start as usize..header.end() as usize]
}

fn children_of(data: &[u8]) -> Result<Vec<AtomHeader>> {
    let mut cursor = Cursor::new(data);
    Ok(child_atoms(&mut cursor, 0, data.len() as u64)?)
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
}

// ---------------------------------------------------------------------------
// Movie-level metadata
// ---------------------------------------------------------------------------

/// Serialize a QuickTime-style `meta` atom for `moov`.
///
/// Keys are deduplicated in first-seen order.
pub fn write_meta(items: &[MetadataItem]) -> Vec<u8> {
    let hdlr = write_hdlr([0; 4], b"mdta", "");

    let mut keys: Vec<(&str, &str)> = Vec::new();
    let mut indices = Vec::with_capacity(items.len());
    for item in items {
        let entry = (item.key_space.as_str(), item.key.as_str());
        let index = match keys.iter().position(|k| *k == entry) {
            Some(i) => i,
            None => {
                keys.push(entry);
                keys.len() - 1
            }
        };
        indices.push(index as u32 + 1);
    }

    let mut keys_content = fullbox_header(0, 0).to_vec();
    keys_content.extend_from_slice(&(keys.len() as u32).to_be_bytes());
    for (space, key) in &keys {
        keys_content.extend_from_slice(&((8 + key.len()) as u32).to_be_bytes());
        keys_content.extend_from_slice(&namespace_code(space));
        keys_content.extend_from_slice(key.as_bytes());
    }
    let keys_atom = write_atom(b"keys", &keys_content);

    let mut ilst_content = Vec::new();
    for (item, index) in items.iter().zip(indices) {
        let mut data = item.value.data_type().to_be_bytes().to_vec();
        data.extend_from_slice(&0u32.to_be_bytes()); // locale
        data.extend_from_slice(&item.value.encode());
        let data_atom = write_atom(b"data", &data);
        ilst_content.extend_from_slice(&write_atom(&index.to_be_bytes(), &data_atom));
    }
    let ilst = write_atom(b"ilst", &ilst_content);

    write_container(b"meta", &[&hdlr, &keys_atom, &ilst])
}

fn namespace_code(space: &str) -> [u8; 4] {
    let mut code = [b' '; 4];
    for (dst, src) in code.iter_mut().zip(space.bytes()) {
        *dst = src;
    }
    code
}

/// Parse the content of a `meta` atom into `mdta` items.
///
/// Accepts both the QuickTime layout and the ISO full-atom variant. A `meta`
/// whose handler is not `mdta` yields no items.
pub fn parse_meta(content: &[u8]) -> Result<Vec<MetadataItem>> {
    let body = if content.get(4..8) == Some(b"hdlr") {
        content
    } else {
        content.get(4..).unwrap_or_default()
    };
    let children = children_of(body)?;

    let handler = children
        .iter()
        .find(|h| &h.atom_type == b"hdlr")
        .and_then(|h| slice(body, h).get(8..12));
    if handler != Some(b"mdta") {
        return Ok(Vec::new());
    }

    let mut keys: Vec<(String, String)> = Vec::new();
    if let Some(h) = children.iter().find(|h| &h.atom_type == b"keys") {
        let data = slice(body, h);
        let count = be_u32(data, 4).ok_or_else(|| invalid("truncated keys atom"))?;
        let mut pos = 8usize;
        for _ in 0..count {
            let size = be_u32(data, pos).ok_or_else(|| invalid("truncated key entry"))? as usize;
            let entry = data
                .get(pos..pos + size)
                .filter(|_| size >= 8)
                .ok_or_else(|| invalid(format!("key entry of size {size} overruns keys")))?;
            let space = String::from_utf8_lossy(&entry[4..8]).trim_end().to_string();
            let key = String::from_utf8_lossy(&entry[8..]).into_owned();
            keys.push((space, key));
            pos += size;
        }
    }

    let mut items = Vec::new();
    if let Some(h) = children.iter().find(|h| &h.atom_type == b"ilst") {
        let ilst = slice(body, h);
        for item in children_of(ilst)? {
            let index = u32::from_be_bytes(item.atom_type) as usize;
            let Some((space, key)) = index.checked_sub(1).and_then(|i| keys.get(i)) else {
                tracing::debug!("ilst item references unknown key index {index}");
                continue;
            };
            let item_data = slice(ilst, &item);
            for data in children_of(item_data)? {
                if &data.atom_type != b"data" {
                    continue;
                }
                let value = slice(item_data, &data);
                let Some(type_word) = be_u32(value, 0) else {
                    continue;
                };
                items.push(MetadataItem {
                    format: MetadataFormat::QuickTimeMetadata,
                    key_space: space.clone(),
                    key: key.clone(),
                    value: MetadataValue::decode(type_word & 0x00FF_FFFF, value.get(8..).unwrap_or_default()),
                });
            }
        }
    }
    Ok(items)
}

/// Parse the content of a `udta` atom; only `©xxx` text items are read.
pub fn parse_udta(content: &[u8]) -> Result<Vec<MetadataItem>> {
    let mut items = Vec::new();
    for child in children_of(content)? {
        if child.atom_type[0] != 0xA9 {
            continue;
        }
        let data = slice(content, &child);
        let Some(len) = data.get(0..2).map(|b| u16::from_be_bytes([b[0], b[1]]) as usize) else {
            continue;
        };
        let Some(text) = data.get(4..4 + len) else {
            continue;
        };
        items.push(MetadataItem {
            format: MetadataFormat::QuickTimeUserData,
            key_space: "udta".to_string(),
            key: fourcc_str(&child.atom_type),
            value: MetadataValue::Utf8(String::from_utf8_lossy(text).into_owned()),
        });
    }
    Ok(items)
}

// ---------------------------------------------------------------------------
// Boxed timed metadata
// ---------------------------------------------------------------------------

/// Serialize an `mebx` sample entry declaring `specs` with local ids 1..=n.
pub fn write_mebx_entry(specs: &[MetadataKeySpec]) -> Vec<u8> {
    let mut key_atoms = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        let mut keyd = namespace_code(&spec.namespace).to_vec();
        keyd.extend_from_slice(spec.key.as_bytes());
        let keyd = write_atom(b"keyd", &keyd);

        let mut dtyp = 0u32.to_be_bytes().to_vec(); // well-known type namespace
        dtyp.extend_from_slice(&spec.data_type.to_be_bytes());
        let dtyp = write_atom(b"dtyp", &dtyp);

        let local_id = (i as u32 + 1).to_be_bytes();
        key_atoms.extend_from_slice(&write_container(&local_id, &[&keyd, &dtyp]));
    }
    let keys = write_atom(b"keys", &key_atoms);

    let mut content = vec![0u8; 6]; // reserved
    content.extend_from_slice(&1u16.to_be_bytes()); // data reference index
    content.extend_from_slice(&keys);
    write_atom(b"mebx", &content)
}

/// Read the key table of a serialized `mebx` sample entry.
///
/// Returns `(local id, spec)` pairs in declaration order.
pub fn parse_mebx_entry(entry: &[u8]) -> Result<Vec<(u32, MetadataKeySpec)>> {
    let mut cursor = Cursor::new(entry);
    let header = read_atom_header(&mut cursor, entry.len() as u64)?
        .ok_or_else(|| invalid("empty sample entry"))?;
    if &header.atom_type != b"mebx" {
        return Err(Error::unsupported(format!(
            "sample entry '{}' is not boxed metadata",
            header.type_str()
        )));
    }
    let body = slice(entry, &header)
        .get(8..)
        .ok_or_else(|| invalid("truncated mebx entry"))?;

    let mut specs = Vec::new();
    for child in children_of(body)? {
        if &child.atom_type != b"keys" {
            continue;
        }
        let keys = slice(body, &child);
        for key in children_of(keys)? {
            let local_id = u32::from_be_bytes(key.atom_type);
            let key_data = slice(keys, &key);
            let mut namespace = String::new();
            let mut name = String::new();
            let mut data_type = 0u32;
            for part in children_of(key_data)? {
                let part_data = slice(key_data, &part);
                match &part.atom_type {
                    b"keyd" if part_data.len() >= 4 => {
                        namespace = String::from_utf8_lossy(&part_data[..4]).trim_end().to_string();
                        name = String::from_utf8_lossy(&part_data[4..]).into_owned();
                    }
                    b"dtyp" => data_type = be_u32(part_data, 4).unwrap_or(0),
                    _ => {}
                }
            }
            specs.push((local_id, MetadataKeySpec::new(namespace, name, data_type)));
        }
    }
    Ok(specs)
}

/// Serialize one timed metadata sample.
pub fn encode_mebx_sample(values: &[(u32, &MetadataValue)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (local_id, value) in values {
        let bytes = value.encode();
        out.extend_from_slice(&((8 + bytes.len()) as u32).to_be_bytes());
        out.extend_from_slice(&local_id.to_be_bytes());
        out.extend_from_slice(&bytes);
    }
    out
}

/// Split a timed metadata sample into `(local id, raw value)` records.
pub fn decode_mebx_sample(data: &[u8]) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let size = be_u32(data, pos).ok_or_else(|| invalid("truncated metadata sample"))? as usize;
        let local_id = be_u32(data, pos + 4).ok_or_else(|| invalid("truncated metadata sample"))?;
        let value = data
            .get(pos + 8..pos + size)
            .filter(|_| size >= 8)
            .ok_or_else(|| invalid(format!("metadata record of size {size} overruns sample")))?;
        records.push((local_id, value.to_vec()));
        pos += size;
    }
    Ok(records)
}

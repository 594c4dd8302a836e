//! lp-media: QuickTime movie container and JPEG properties for livepair.
//!
//! # Modules
//!
//! - [`mov`] - QuickTime / ISO BMFF parsing, stream-copy writing, and the
//!   `mdta` metadata atoms (`keys`, `ilst`, boxed `mebx` timed metadata)
//! - [`jpeg`] - JPEG property dictionary read/write
//! - [`sample`] - Compressed samples moved between demuxer and muxer

pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod jpeg;
pub mod mov;
pub mod sample;

pub use error::{Error, Result};
pub use mov::metadata::{
    MetadataFormat, MetadataItem, MetadataKeySpec, MetadataValue, COMMON_KEY_IDENTIFIER,
    CONTENT_IDENTIFIER_KEY, MDTA_NAMESPACE, STILL_IMAGE_TIME_KEY,
};
pub use mov::writer::{MovWriter, TrackSpec};
pub use mov::{Matrix, MovFile, SampleEntry, TrackInfo};
pub use sample::Sample;

//! Image metadata codec used by the key-photo paths.

use std::path::Path;

use lp_media::jpeg::{self, Properties};
use lp_media::Result as MediaResult;

/// Reads and rewrites an image's property dictionary in place.
pub trait ImageMetadataCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn read_properties(&self, path: &Path) -> MediaResult<Properties>;

    /// Re-finalize the image at `path` with `properties`.
    fn write_properties(&self, path: &Path, properties: &Properties) -> MediaResult<()>;
}

/// JPEG properties through the lp-media codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegPropertiesCodec;

impl ImageMetadataCodec for JpegPropertiesCodec {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn read_properties(&self, path: &Path) -> MediaResult<Properties> {
        jpeg::read_properties(path)
    }

    fn write_properties(&self, path: &Path, properties: &Properties) -> MediaResult<()> {
        jpeg::write_properties(path, properties)
    }
}

//! Source tracks and the asset loading contract.

use async_trait::async_trait;
use lp_core::{MediaTime, MediaType};
use lp_media::{SampleEntry, TrackInfo};

use crate::error::SharedError;
use crate::orientation::{AffineTransform, Size};

/// A typed stream of a source asset.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub track_id: u32,
    pub media_type: MediaType,
    pub natural_size: Size,
    pub preferred_transform: AffineTransform,
    /// Frames (or samples) per second.
    pub nominal_frame_rate: f64,
    pub duration: MediaTime,
    /// Media timescale.
    pub timescale: u32,
    /// Codec description, copied verbatim into the output.
    pub sample_entry: Option<SampleEntry>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaTrack {
    /// Describe a parsed container track; `None` for unrecognized handlers.
    pub fn from_info(info: &TrackInfo) -> Option<Self> {
        let media_type = info.media_type?;
        Some(Self {
            track_id: info.track_id,
            media_type,
            natural_size: Size::new(f64::from(info.width), f64::from(info.height)),
            preferred_transform: AffineTransform::from_matrix(&info.matrix),
            nominal_frame_rate: info.nominal_frame_rate(),
            duration: info.duration_time(),
            timescale: info.timescale,
            sample_entry: info.sample_entry.clone(),
            sample_rate: info.sample_rate,
            channels: info.channels,
        })
    }

    /// Four-character code of the codec, if the track has a sample entry.
    pub fn codec(&self) -> Option<[u8; 4]> {
        self.sample_entry.as_ref().map(|e| e.fourcc)
    }
}

/// The tracks of a loaded asset.
#[derive(Debug, Clone)]
pub struct LoadedAsset {
    pub tracks: Vec<MediaTrack>,
    pub duration: MediaTime,
}

impl LoadedAsset {
    pub fn tracks_of(&self, media_type: MediaType) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.media_type == media_type)
    }
}

/// Outcome of loading an asset's track list.
#[derive(Debug, Clone)]
pub enum LoadStatus {
    Loaded(LoadedAsset),
    /// The load has not completed yet.
    Loading,
    Cancelled,
    Failed(SharedError),
    /// Any state the loader could not classify.
    Other(Option<SharedError>),
}

/// Loads the track list of one source asset.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self) -> LoadStatus;
}

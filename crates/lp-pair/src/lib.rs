//! # lp-pair
//!
//! The live photo pairing engine.
//!
//! This crate provides:
//!
//! - **[`TrackResolver`]** -- loads a source clip once and picks its visual
//!   and audio tracks.
//! - **[`SampleCopier`]** -- moves compressed samples from a demuxer track
//!   output into one or more writer inputs, honouring backpressure.
//! - **[`MetadataInjector`]** -- the content-identifier item and the
//!   still-image-time anchor of a key video.
//! - **[`Remuxer`]** -- drives one key-video encode from resolution to a
//!   finished movie.
//! - **[`Encoder`] / [`Decoder`]** -- produce a pair under
//!   `{directory}/{identifier}.{jpeg|mov|aiff}` and recover one from an
//!   [`AssetStore`].
//! - **[`orientation`]** -- affine transforms for placing a rotated track in
//!   a render container.

pub mod asset;
mod cleanup;
pub mod codec;
pub mod copier;
pub mod decoder;
pub mod demux;
pub mod encoder;
pub mod error;
pub mod injector;
pub mod mux;
pub mod orientation;
pub mod remux;
pub mod resolver;
pub mod store;
pub mod track;

// Re-export key types at the crate root.
pub use asset::MovAsset;
pub use codec::{ImageMetadataCodec, JpegPropertiesCodec};
pub use copier::{CopyStats, Readiness, SampleCopier, SampleSink, SampleSource, TrackKind};
pub use decoder::{ComponentType, Decoder};
pub use encoder::Encoder;
pub use error::{
    CopyError, DecodeError, DecoderSetupError, EncodeError, EncoderSetupError, InjectError,
    PairedPhotoError, PairedVideoError, RemuxError, ResolveError, StoreError,
};
pub use injector::{locate_still_image_anchor, MetadataInjector, StillImageAnchor};
pub use remux::{RemuxOptions, RemuxOutput, Remuxer};
pub use resolver::{ResolvedTrackSet, TrackResolutionState, TrackResolver};
pub use store::{
    fetch_first_live_photo, AssetResource, AssetStore, DirectoryLibrary, LibraryAsset,
    LocalAssetStore, ResourceKind, ResourceLocation,
};
pub use track::{AssetLoader, LoadStatus, LoadedAsset, MediaTrack};

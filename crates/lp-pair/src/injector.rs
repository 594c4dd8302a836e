//! Content-identifier metadata and the still-image-time anchor.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use lp_core::{MediaTime, MediaType, SharedIdentifier};
use lp_media::mov::metadata::{decode_mebx_sample, encode_mebx_sample};
use lp_media::{
    MetadataItem, MetadataKeySpec, MetadataValue, MovFile, Result as MediaResult, Sample,
    TrackSpec, MDTA_NAMESPACE, STILL_IMAGE_TIME_KEY,
};

use crate::copier::SampleSink;
use crate::error::InjectError;
use crate::mux::{AssetWriter, WriterInput};

/// Local id of the still-image-time key in the timed metadata track.
const STILL_IMAGE_TIME_LOCAL_ID: u32 = 1;

/// Where in a clip the key photo was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StillImageAnchor {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl StillImageAnchor {
    /// The clip's midpoint, spanning one estimated frame.
    pub fn midpoint(duration: MediaTime, estimated_frame_count: u64) -> Self {
        let frames = u32::try_from(estimated_frame_count.max(1)).unwrap_or(u32::MAX);
        Self {
            start: duration.divided_by(2),
            duration: duration.divided_by(frames),
        }
    }

    pub fn end(&self) -> MediaTime {
        self.start.add(self.duration)
    }

    /// Timescale that holds both the start and the span exactly.
    fn timescale(&self) -> u32 {
        self.start.common_timescale(self.duration)
    }
}

/// Builds the identifier metadata item and appends the still-image-time
/// sample to a writer.
#[derive(Debug)]
pub struct MetadataInjector {
    identifier: SharedIdentifier,
    anchor: StillImageAnchor,
    input: Option<WriterInput>,
}

impl MetadataInjector {
    pub fn new(identifier: SharedIdentifier, duration: MediaTime, estimated_frame_count: u64) -> Self {
        Self {
            identifier,
            anchor: StillImageAnchor::midpoint(duration, estimated_frame_count),
            input: None,
        }
    }

    pub fn anchor(&self) -> StillImageAnchor {
        self.anchor
    }

    /// `com.apple.quicktime.content.identifier`, UTF-8, `mdta` namespace.
    pub fn content_identifier_item(&self) -> MetadataItem {
        MetadataItem::content_identifier(self.identifier.as_str())
    }

    /// Set the writer's movie metadata and add the timed metadata input.
    pub fn attach(&mut self, writer: &AssetWriter) -> MediaResult<()> {
        writer.set_metadata(vec![self.content_identifier_item()])?;
        let input = writer.add_input(TrackSpec::metadata(
            self.anchor.timescale(),
            &[MetadataKeySpec::still_image_time()],
        ))?;
        self.input = Some(input);
        Ok(())
    }

    /// Append the anchor sample and finish the metadata input.
    pub fn copy(&self) -> Result<(), InjectError> {
        let input = self.input.as_ref().ok_or(InjectError::NotAttached)?;
        if !input.session_started() {
            return Err(InjectError::SessionNotStarted);
        }
        let accepted = input.append(&self.anchor_sample());
        input.mark_finished();
        if !accepted {
            return Err(InjectError::Rejected);
        }
        tracing::debug!(
            "Still-image-time anchor at {} for {}",
            self.anchor.start,
            self.anchor.duration
        );
        Ok(())
    }

    fn anchor_sample(&self) -> Sample {
        let timescale = self.anchor.timescale();
        let start = self.anchor.start.rescale(timescale).value();
        let span = self.anchor.duration.rescale(timescale).value().max(1);
        let data = encode_mebx_sample(&[(STILL_IMAGE_TIME_LOCAL_ID, &MetadataValue::Int8(0))]);
        Sample::new(
            data,
            start,
            u32::try_from(span).unwrap_or(u32::MAX),
            timescale,
        )
    }
}

/// Find the still-image-time anchor of a paired movie, if it has one.
pub fn locate_still_image_anchor(path: &Path) -> MediaResult<Option<StillImageAnchor>> {
    let movie = MovFile::open(path)?;
    let mut file = File::open(path)?;
    for track in movie.tracks_of(MediaType::Metadata) {
        let keys = track.metadata_keys()?;
        let Some(local_id) = keys.iter().find_map(|(id, spec)| {
            (spec.namespace == MDTA_NAMESPACE && spec.key == STILL_IMAGE_TIME_KEY).then_some(*id)
        }) else {
            continue;
        };
        for entry in &track.sample_table.samples {
            file.seek(SeekFrom::Start(entry.file_offset))?;
            let mut data = vec![0u8; entry.size as usize];
            file.read_exact(&mut data)?;
            if decode_mebx_sample(&data)?.iter().any(|(id, _)| *id == local_id) {
                let start = track
                    .start_offset
                    .add(MediaTime::new(entry.decode_timestamp as i64, track.timescale));
                return Ok(Some(StillImageAnchor {
                    start,
                    duration: MediaTime::new(i64::from(entry.duration), track.timescale),
                }));
            }
        }
    }
    Ok(None)
}

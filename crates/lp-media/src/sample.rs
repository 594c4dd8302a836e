//! Compressed media samples.

use bytes::Bytes;
use lp_core::MediaTime;

use crate::mov::ResolvedSample;

/// One compressed sample, moved between a demuxer and a muxer untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Bytes,
    /// Decode time in `timescale` ticks.
    pub decode_time: i64,
    /// Duration in `timescale` ticks.
    pub duration: u32,
    pub composition_offset: i32,
    pub is_sync: bool,
    pub timescale: u32,
}

impl Sample {
    /// A sync sample with no composition offset.
    pub fn new(data: impl Into<Bytes>, decode_time: i64, duration: u32, timescale: u32) -> Self {
        Self {
            data: data.into(),
            decode_time,
            duration,
            composition_offset: 0,
            is_sync: true,
            timescale,
        }
    }

    /// Attach payload bytes to a resolved sample-table entry.
    pub fn from_resolved(entry: &ResolvedSample, data: Bytes, timescale: u32) -> Self {
        Self {
            data,
            decode_time: entry.decode_timestamp as i64,
            duration: entry.duration,
            composition_offset: entry.composition_offset,
            is_sync: entry.is_sync,
            timescale,
        }
    }

    pub fn decode_timestamp(&self) -> MediaTime {
        MediaTime::new(self.decode_time, self.timescale)
    }

    pub fn presentation_timestamp(&self) -> MediaTime {
        MediaTime::new(
            self.decode_time + i64::from(self.composition_offset),
            self.timescale,
        )
    }

    pub fn duration_time(&self) -> MediaTime {
        MediaTime::new(i64::from(self.duration), self.timescale)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

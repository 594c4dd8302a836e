//! Media value types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::ids::SharedIdentifier;

// ---------------------------------------------------------------------------
// MediaTime
// ---------------------------------------------------------------------------

/// A rational point or span on a media timeline: `value / timescale` seconds.
///
/// Comparison is by the rational value, so `1/2` and `300/600` are equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    value: i64,
    timescale: u32,
}

impl MediaTime {
    /// Time zero on a 600 Hz clock, the movie timescale used by the writer.
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 600,
    };

    /// Create a time of `value` ticks at `timescale` ticks per second.
    ///
    /// A zero timescale is clamped to 1.
    pub const fn new(value: i64, timescale: u32) -> Self {
        Self {
            value,
            timescale: if timescale == 0 { 1 } else { timescale },
        }
    }

    /// Convert floating-point seconds at the given timescale, rounding.
    pub fn from_seconds(seconds: f64, timescale: u32) -> Self {
        let ts = timescale.max(1);
        Self::new((seconds * f64::from(ts)).round() as i64, ts)
    }

    pub const fn value(&self) -> i64 {
        self.value
    }

    pub const fn timescale(&self) -> u32 {
        self.timescale
    }

    /// The time in seconds.
    pub fn seconds(&self) -> f64 {
        self.value as f64 / f64::from(self.timescale)
    }

    pub fn is_positive(&self) -> bool {
        self.value > 0
    }

    /// Express this time in another timescale, rounding to the nearest tick.
    pub fn rescale(&self, timescale: u32) -> MediaTime {
        let ts = timescale.max(1);
        if ts == self.timescale {
            return *self;
        }
        let num = i128::from(self.value) * i128::from(ts);
        let den = i128::from(self.timescale);
        let rounded = if num >= 0 {
            (num + den / 2) / den
        } else {
            (num - den / 2) / den
        };
        MediaTime::new(clamp_i64(rounded), ts)
    }

    /// Divide by a positive integer, exactly where representable.
    ///
    /// An evenly divisible value keeps its timescale; otherwise the timescale
    /// is multiplied by `divisor` when that fits, and only falls back to a
    /// rounded result when it does not. Dividing by zero returns `self`.
    pub fn divided_by(&self, divisor: u32) -> MediaTime {
        if divisor <= 1 {
            return *self;
        }
        if self.value % i64::from(divisor) == 0 {
            return MediaTime::new(self.value / i64::from(divisor), self.timescale);
        }
        match self.timescale.checked_mul(divisor) {
            Some(ts) => MediaTime::new(self.value, ts),
            None => {
                let rounded = (self.value as f64 / f64::from(divisor)).round() as i64;
                MediaTime::new(rounded, self.timescale)
            }
        }
    }

    /// A timescale both times can be expressed in without rounding.
    ///
    /// This is the least common multiple of the two, or the finer of them
    /// when the multiple does not fit in a `u32`.
    pub fn common_timescale(&self, other: MediaTime) -> u32 {
        common_timescale(self.timescale, other.timescale)
    }

    /// Sum of two times, exact whenever a common timescale fits.
    pub fn add(&self, other: MediaTime) -> MediaTime {
        let ts = self.common_timescale(other);
        let a = self.rescale(ts);
        let b = other.rescale(ts);
        MediaTime::new(a.value.saturating_add(b.value), ts)
    }

    fn cross(&self, other: &MediaTime) -> (i128, i128) {
        (
            i128::from(self.value) * i128::from(other.timescale),
            i128::from(other.value) * i128::from(self.timescale),
        )
    }
}

/// Least common multiple of two timescales, falling back to the larger one
/// on overflow.
pub fn common_timescale(a: u32, b: u32) -> u32 {
    let (a, b) = (a.max(1), b.max(1));
    let lcm = u64::from(a / gcd(a, b)) * u64::from(b);
    u32::try_from(lcm).unwrap_or(a.max(b))
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(other);
        a == b
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(other);
        a.cmp(&b)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.3}s)", self.value, self.timescale, self.seconds())
    }
}

// ---------------------------------------------------------------------------
// MediaType
// ---------------------------------------------------------------------------

/// The kind of elementary stream a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Metadata,
}

impl MediaType {
    /// The `hdlr` handler type for this media type.
    pub const fn handler(self) -> [u8; 4] {
        match self {
            MediaType::Video => *b"vide",
            MediaType::Audio => *b"soun",
            MediaType::Metadata => *b"meta",
        }
    }

    /// Map an `hdlr` handler type back to a media type.
    pub fn from_handler(handler: [u8; 4]) -> Option<Self> {
        match &handler {
            b"vide" => Some(MediaType::Video),
            b"soun" => Some(MediaType::Audio),
            b"meta" => Some(MediaType::Metadata),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => write!(f, "video"),
            MediaType::Audio => write!(f, "audio"),
            MediaType::Metadata => write!(f, "metadata"),
        }
    }
}

// ---------------------------------------------------------------------------
// Paired components
// ---------------------------------------------------------------------------

/// The still-image half of a live photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPhoto {
    shared_identifier: SharedIdentifier,
    file_location: PathBuf,
}

impl KeyPhoto {
    pub fn new(shared_identifier: SharedIdentifier, file_location: impl Into<PathBuf>) -> Self {
        Self {
            shared_identifier,
            file_location: file_location.into(),
        }
    }

    pub fn shared_identifier(&self) -> &SharedIdentifier {
        &self.shared_identifier
    }

    pub fn file_location(&self) -> &Path {
        &self.file_location
    }
}

/// The motion half of a live photo, plus audio extracted from it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVideo {
    shared_identifier: SharedIdentifier,
    file_location: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_file_location: Option<PathBuf>,
}

impl KeyVideo {
    pub fn new(
        shared_identifier: SharedIdentifier,
        file_location: impl Into<PathBuf>,
        audio_file_location: Option<PathBuf>,
    ) -> Self {
        Self {
            shared_identifier,
            file_location: file_location.into(),
            audio_file_location,
        }
    }

    pub fn shared_identifier(&self) -> &SharedIdentifier {
        &self.shared_identifier
    }

    pub fn file_location(&self) -> &Path {
        &self.file_location
    }

    pub fn audio_file_location(&self) -> Option<&Path> {
        self.audio_file_location.as_deref()
    }
}

//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! output, remux and decode sections. Every section defaults sensibly so a
//! completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub remux: RemuxConfig,
    pub decode: DecodeConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| Error::Config(format!("parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.output.directory.as_os_str().is_empty() {
            warnings.push("output.directory is empty; the current directory will be used".into());
        }

        if self.remux.interleave_window_ms == 0 {
            warnings.push(
                "remux.interleave_window_ms is 0; tracks will be written in strict lockstep".into(),
            );
        }

        if self.remux.poll_interval_ms == 0 {
            warnings.push("remux.poll_interval_ms is 0; copiers will spin while waiting".into());
        } else if self.remux.poll_interval_ms > 1000 {
            warnings.push(format!(
                "remux.poll_interval_ms is {}; copies will be very slow",
                self.remux.poll_interval_ms
            ));
        }

        if self.decode.allow_network_access && self.decode.request_timeout_secs == 0 {
            warnings.push(
                "decode.allow_network_access is enabled but request_timeout_secs is 0".into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Where paired components are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./live-photos"),
        }
    }
}

/// Codec the primary container's visual track is declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
    /// Keep whatever codec the source track uses.
    Source,
}

const H264_FOURCCS: &[[u8; 4]] = &[*b"avc1", *b"avc3"];
const HEVC_FOURCCS: &[[u8; 4]] = &[*b"hvc1", *b"hev1"];

impl VideoCodec {
    /// Sample-entry fourccs accepted for this target, or `None` for any.
    pub fn fourccs(self) -> Option<&'static [[u8; 4]]> {
        match self {
            VideoCodec::H264 => Some(H264_FOURCCS),
            VideoCodec::Hevc => Some(HEVC_FOURCCS),
            VideoCodec::Source => None,
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
            VideoCodec::Hevc => write!(f, "hevc"),
            VideoCodec::Source => write!(f, "source"),
        }
    }
}

/// Remux pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxConfig {
    /// Also write the audio track to a standalone container.
    pub extract_audio: bool,
    pub video_codec: VideoCodec,
    /// How far one input may run ahead of the slowest one.
    pub interleave_window_ms: u64,
    /// Sleep between polls of a sink that is not ready.
    pub poll_interval_ms: u64,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            extract_audio: true,
            video_codec: VideoCodec::default(),
            interleave_window_ms: 500,
            poll_interval_ms: 2,
        }
    }
}

impl RemuxConfig {
    pub fn interleave_window(&self) -> Duration {
        Duration::from_millis(self.interleave_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Decode-side resource fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub allow_network_access: bool,
    pub request_timeout_secs: u64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            allow_network_access: false,
            request_timeout_secs: 60,
        }
    }
}

impl DecodeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

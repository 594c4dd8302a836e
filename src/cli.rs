use clap::{Args, Parser, Subcommand, ValueEnum};
use lp_core::config::VideoCodec;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "livepair")]
#[command(author, version, about = "Pair photos and clips as live photos")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode a photo and a clip into a paired key photo and key video
    Encode {
        /// Still image (JPEG)
        #[arg(long, required = true)]
        photo: PathBuf,

        /// Motion clip (QuickTime movie)
        #[arg(long, required = true)]
        video: PathBuf,

        /// Shared identifier to stamp into both files (generated if omitted)
        #[arg(long)]
        identifier: Option<String>,

        /// Directory the pair is written to (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not write the standalone audio file
        #[arg(long)]
        no_audio: bool,

        /// Codec the key video's visual track must carry
        #[arg(long, value_enum)]
        codec: Option<CodecArg>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode an existing live photo into identifier-named files
    Decode {
        #[command(flatten)]
        source: DecodeSource,

        /// Directory the components are written to (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Allow downloading remote resources
        #[arg(long)]
        allow_network: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the pairing metadata of a photo or movie
    Inspect {
        /// File to inspect
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

/// Where the live photo being decoded comes from.
#[derive(Args)]
#[group(required = true, multiple = true)]
pub struct DecodeSource {
    /// Photo resource: a local path or an http(s) URL
    #[arg(long, requires = "video", conflicts_with = "library")]
    pub photo: Option<String>,

    /// Paired video resource: a local path or an http(s) URL
    #[arg(long, requires = "photo", conflicts_with = "library")]
    pub video: Option<String>,

    /// Directory of exported photos and clips; its first live photo is used
    #[arg(long)]
    pub library: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CodecArg {
    H264,
    Hevc,
    Source,
}

impl From<CodecArg> for VideoCodec {
    fn from(codec: CodecArg) -> Self {
        match codec {
            CodecArg::H264 => VideoCodec::H264,
            CodecArg::Hevc => VideoCodec::Hevc,
            CodecArg::Source => VideoCodec::Source,
        }
    }
}

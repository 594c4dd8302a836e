mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, DecodeSource};
use lp_core::config::Config;
use lp_core::{MediaType, SharedIdentifier};
use lp_media::MovFile;
use lp_pair::orientation::{AffineTransform, HomeButton};
use lp_pair::{
    locate_still_image_anchor, AssetResource, ComponentType, Decoder, DirectoryLibrary, Encoder,
    JpegPropertiesCodec, LocalAssetStore, RemuxOptions, ResourceKind,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "livepair=trace,lp_pair=debug,lp_media=debug,lp_core=debug".to_string()
        } else {
            "livepair=info,lp_pair=info,lp_media=warn,lp_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Encode {
            photo,
            video,
            identifier,
            output,
            no_audio,
            codec,
            json,
        } => {
            let mut options = RemuxOptions::from(&config.remux);
            if no_audio {
                options.extract_audio = false;
            }
            if let Some(codec) = codec {
                options.video_codec = codec.into();
            }
            let output = output.unwrap_or_else(|| config.output.directory.clone());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(encode(&photo, &video, identifier, &output, options, json))
        }
        Commands::Decode {
            source,
            output,
            allow_network,
            json,
        } => {
            let output = output.unwrap_or_else(|| config.output.directory.clone());
            let allow_network = allow_network || config.decode.allow_network_access;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(decode(source, &output, allow_network, &config, json))
        }
        Commands::Inspect { file, json } => inspect_file(&file, json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("livepair {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Create `path` if needed and make sure it is a directory.
fn ensure_output_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create output directory {}", path.display()))?;
    if !lp_core::is_directory(path) {
        return Err(lp_core::Error::not_a_directory(path).into());
    }
    Ok(())
}

#[derive(Serialize)]
struct PairSummary {
    identifier: String,
    photo: PathBuf,
    video: PathBuf,
    audio: Option<PathBuf>,
}

impl PairSummary {
    fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
        } else {
            println!("Identifier: {}", self.identifier);
            println!("Photo: {}", self.photo.display());
            println!("Video: {}", self.video.display());
            if let Some(ref audio) = self.audio {
                println!("Audio: {}", audio.display());
            }
        }
        Ok(())
    }
}

async fn encode(
    photo: &Path,
    video: &Path,
    identifier: Option<String>,
    output: &Path,
    options: RemuxOptions,
    json: bool,
) -> Result<()> {
    for input in [photo, video] {
        if !input.exists() {
            anyhow::bail!("Input file does not exist: {:?}", input);
        }
    }
    let identifier = identifier
        .map(SharedIdentifier::parse)
        .transpose()
        .context("Unusable --identifier")?;
    ensure_output_dir(output)?;

    let encoder = Encoder::new(output)?.with_options(options);
    let (key_photo, key_video) = encoder
        .encode(photo, video, identifier)
        .await
        .context("Encoding failed")?;

    PairSummary {
        identifier: key_photo.shared_identifier().to_string(),
        photo: key_photo.file_location().to_path_buf(),
        video: key_video.file_location().to_path_buf(),
        audio: key_video.audio_file_location().map(Path::to_path_buf),
    }
    .print(json)
}

fn resource(kind: ResourceKind, location: String) -> AssetResource {
    if location.starts_with("http://") || location.starts_with("https://") {
        AssetResource::remote(kind, location)
    } else {
        AssetResource::local(kind, location)
    }
}

async fn decode(
    source: DecodeSource,
    output: &Path,
    allow_network: bool,
    config: &Config,
    json: bool,
) -> Result<()> {
    ensure_output_dir(output)?;
    let store = Arc::new(LocalAssetStore::from_config(&config.decode)?);

    let decoder = match source {
        DecodeSource {
            library: Some(library),
            ..
        } => {
            let asset = DirectoryLibrary::new(&library)
                .first_live_photo()
                .await
                .with_context(|| format!("Failed to scan {}", library.display()))?
                .with_context(|| format!("No live photo found in {}", library.display()))?;
            tracing::info!("Decoding {} from {}", asset.stem(), library.display());
            Decoder::from_library_asset(&asset, output, store)?
        }
        DecodeSource { photo, video, .. } => {
            let resources: Vec<_> = photo
                .map(|p| resource(ResourceKind::Photo, p))
                .into_iter()
                .chain(video.map(|v| resource(ResourceKind::PairedVideo, v)))
                .collect();
            Decoder::new(&resources, output, store)?
        }
    };

    let key_photo = decoder
        .decode_key_photo(allow_network)
        .await
        .context("Decoding the key photo failed")?;
    let key_video = decoder
        .decode_key_video(allow_network)
        .await
        .context("Decoding the key video failed")?;
    if key_photo.shared_identifier() != key_video.shared_identifier() {
        tracing::warn!(
            "Photo and video carry different identifiers ({} / {})",
            key_photo.shared_identifier(),
            key_video.shared_identifier()
        );
    }

    PairSummary {
        identifier: key_photo.shared_identifier().to_string(),
        photo: key_photo.file_location().to_path_buf(),
        video: key_video.file_location().to_path_buf(),
        audio: None,
    }
    .print(json)
}

#[derive(Serialize)]
struct TrackSummary {
    track_id: u32,
    media_type: Option<MediaType>,
    codec: Option<String>,
    width: u32,
    height: u32,
    samples: usize,
    duration_secs: f64,
    home_button: Option<HomeButton>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Inspection {
    Photo {
        file: PathBuf,
        identifier: Option<String>,
    },
    Movie {
        file: PathBuf,
        identifier: Option<String>,
        duration_secs: f64,
        still_image_time: Option<f64>,
        tracks: Vec<TrackSummary>,
    },
}

fn inspect_file(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let is_photo = file
        .extension()
        .map(|ext| matches!(ext.to_ascii_lowercase().to_str(), Some("jpg" | "jpeg")))
        .unwrap_or(false);
    let inspection = if is_photo {
        Inspection::Photo {
            file: file.to_path_buf(),
            identifier: ComponentType::Photo.extract_identifier(file, &JpegPropertiesCodec),
        }
    } else {
        let movie = MovFile::open(file)
            .with_context(|| format!("Failed to parse movie {}", file.display()))?;
        let anchor = locate_still_image_anchor(file)?;
        let tracks = movie
            .tracks
            .iter()
            .map(|track| TrackSummary {
                track_id: track.track_id,
                media_type: track.media_type,
                codec: track.sample_entry.as_ref().map(|e| e.fourcc_str()),
                width: track.width,
                height: track.height,
                samples: track.sample_table.len(),
                duration_secs: track.duration_time().seconds(),
                home_button: (track.media_type == Some(MediaType::Video))
                    .then(|| AffineTransform::from_matrix(&track.matrix).home_button()),
            })
            .collect();
        Inspection::Movie {
            file: file.to_path_buf(),
            identifier: ComponentType::Video.extract_identifier(file, &JpegPropertiesCodec),
            duration_secs: movie.duration().seconds(),
            still_image_time: anchor.map(|a| a.start.seconds()),
            tracks,
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    match inspection {
        Inspection::Photo { file, identifier } => {
            println!("File: {}", file.display());
            println!("Kind: photo");
            println!("Identifier: {}", identifier.as_deref().unwrap_or("(none)"));
        }
        Inspection::Movie {
            file,
            identifier,
            duration_secs,
            still_image_time,
            tracks,
        } => {
            println!("File: {}", file.display());
            println!("Kind: movie");
            println!("Identifier: {}", identifier.as_deref().unwrap_or("(none)"));
            println!("Duration: {:.3}s", duration_secs);
            if let Some(time) = still_image_time {
                println!("Still image time: {:.3}s", time);
            }
            println!("\nTracks: {}", tracks.len());
            for track in &tracks {
                let kind = track
                    .media_type
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "other".to_string());
                print!(
                    "  [{}] {} {}",
                    track.track_id,
                    kind,
                    track.codec.as_deref().unwrap_or("?")
                );
                if track.width > 0 && track.height > 0 {
                    print!(" {}x{}", track.width, track.height);
                }
                print!(", {} samples", track.samples);
                if let Some(home_button) = track.home_button {
                    print!(", home button {}", home_button);
                }
                println!();
            }
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Output directory: {}", config.output.directory.display());
    println!("  Extract audio: {}", config.remux.extract_audio);
    println!("  Video codec: {}", config.remux.video_codec);
    println!("  Interleave window: {}ms", config.remux.interleave_window_ms);
    println!(
        "  Network access: {}",
        config.decode.allow_network_access
    );

    for warning in config.validate() {
        println!("  warning: {}", warning);
    }

    Ok(())
}

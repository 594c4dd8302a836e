use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lp_media::MovFile;

use crate::track::{AssetLoader, LoadStatus, LoadedAsset, MediaTrack};

/// A QuickTime movie on disk.
#[derive(Debug, Clone)]
pub struct MovAsset {
    path: PathBuf,
}

impl MovAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LoadedAsset {
    pub fn from_movie(movie: &MovFile) -> Self {
        Self {
            tracks: movie.tracks.iter().filter_map(MediaTrack::from_info).collect(),
            duration: movie.duration(),
        }
    }
}

#[async_trait]
impl AssetLoader for MovAsset {
    /// Parses the movie header on a blocking worker.
    async fn load(&self) -> LoadStatus {
        let path = self.path.clone();
        tracing::debug!("Loading tracks of {}", path.display());
        match tokio::task::spawn_blocking(move || MovFile::open(&path)).await {
            Ok(Ok(movie)) => LoadStatus::Loaded(LoadedAsset::from_movie(&movie)),
            Ok(Err(e)) => LoadStatus::Failed(Arc::new(e)),
            Err(e) if e.is_cancelled() => LoadStatus::Cancelled,
            Err(e) => LoadStatus::Other(Some(Arc::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use lp_core::{MediaTime, MediaType};
    use lp_media::fixtures::{self, FixtureOptions};

    #[tokio::test]
    async fn loads_fixture_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mov");
        fixtures::write_movie(&path, &FixtureOptions::default()).unwrap();

        let status = MovAsset::new(&path).load().await;
        let asset = assert_matches!(status, LoadStatus::Loaded(asset) => asset);
        assert_eq!(asset.duration, MediaTime::new(1, 1));
        let video = asset.tracks_of(MediaType::Video).next().unwrap();
        assert_eq!(video.natural_size.width, 64.0);
        assert_eq!(video.codec(), Some(*b"avc1"));
        assert!((video.nominal_frame_rate - 30.0).abs() < 1e-9);
        assert_eq!(asset.tracks_of(MediaType::Audio).count(), 1);
    }

    #[tokio::test]
    async fn parse_errors_are_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.mov");
        std::fs::write(&path, b"definitely not a movie").unwrap();
        assert_matches!(MovAsset::new(&path).load().await, LoadStatus::Failed(_));
        assert_matches!(
            MovAsset::new(dir.path().join("missing.mov")).load().await,
            LoadStatus::Failed(_)
        );
    }
}

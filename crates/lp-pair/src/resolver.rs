//! Cached, classified track resolution for one source asset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lp_core::{MediaTime, MediaType};
use tokio::sync::OnceCell;

use crate::error::ResolveError;
use crate::track::{AssetLoader, LoadStatus, LoadedAsset, MediaTrack};

/// The tracks a remux pass works from.
#[derive(Debug, Clone)]
pub struct ResolvedTrackSet {
    pub visual: MediaTrack,
    pub audio: Option<MediaTrack>,
    /// `floor(duration × nominal frame rate)`, always positive.
    pub estimated_frame_count: u64,
    pub duration: MediaTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackResolutionState {
    Unresolved,
    Resolving,
    Resolved,
    Failed,
}

/// Resolves an asset's tracks at most once.
///
/// Concurrent callers share the single in-flight load; the outcome,
/// success or failure, is memoized for the resolver's lifetime.
pub struct TrackResolver {
    loader: Arc<dyn AssetLoader>,
    outcome: OnceCell<Result<ResolvedTrackSet, ResolveError>>,
    started: AtomicBool,
}

impl TrackResolver {
    pub fn new(loader: Arc<dyn AssetLoader>) -> Self {
        Self {
            loader,
            outcome: OnceCell::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TrackResolutionState {
        match self.outcome.get() {
            Some(Ok(_)) => TrackResolutionState::Resolved,
            Some(Err(_)) => TrackResolutionState::Failed,
            None if self.started.load(Ordering::Acquire) => TrackResolutionState::Resolving,
            None => TrackResolutionState::Unresolved,
        }
    }

    /// The memoized outcome, once resolution has finished.
    pub fn outcome(&self) -> Option<&Result<ResolvedTrackSet, ResolveError>> {
        self.outcome.get()
    }

    pub async fn resolve(&self) -> Result<&ResolvedTrackSet, ResolveError> {
        let outcome = self
            .outcome
            .get_or_init(|| async {
                self.started.store(true, Ordering::Release);
                let outcome = classify(self.loader.load().await);
                match &outcome {
                    Ok(set) => tracing::debug!(
                        frames = set.estimated_frame_count,
                        audio = set.audio.is_some(),
                        "Resolved tracks ({}s)",
                        set.duration.seconds()
                    ),
                    Err(e) => tracing::debug!("Track resolution failed: {e}"),
                }
                outcome
            })
            .await;
        outcome.as_ref().map_err(Clone::clone)
    }
}

fn classify(status: LoadStatus) -> Result<ResolvedTrackSet, ResolveError> {
    let asset: LoadedAsset = match status {
        LoadStatus::Loaded(asset) => asset,
        LoadStatus::Loading => return Err(ResolveError::LoadBusy),
        LoadStatus::Cancelled => return Err(ResolveError::LoadCancelled),
        LoadStatus::Failed(e) => return Err(ResolveError::LoadFailed(e)),
        LoadStatus::Other(e) => return Err(ResolveError::Unknown(e)),
    };

    let visual = asset
        .tracks_of(MediaType::Video)
        .next()
        .cloned()
        .ok_or(ResolveError::NoVisualTrack)?;

    let estimate = (asset.duration.seconds() * visual.nominal_frame_rate).floor();
    if estimate.is_nan() || estimate < 1.0 {
        return Err(ResolveError::EmptyTrack);
    }

    let audio = asset.tracks_of(MediaType::Audio).next().cloned();
    Ok(ResolvedTrackSet {
        audio,
        visual,
        estimated_frame_count: estimate as u64,
        duration: asset.duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::{AffineTransform, Size};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    struct CountingLoader {
        status: LoadStatus,
        loads: AtomicUsize,
    }

    impl CountingLoader {
        fn new(status: LoadStatus) -> Arc<Self> {
            Arc::new(Self {
                status,
                loads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AssetLoader for CountingLoader {
        async fn load(&self) -> LoadStatus {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.status.clone()
        }
    }

    fn track(media_type: MediaType, rate: f64) -> MediaTrack {
        MediaTrack {
            track_id: 1,
            media_type,
            natural_size: Size::new(64.0, 48.0),
            preferred_transform: AffineTransform::IDENTITY,
            nominal_frame_rate: rate,
            duration: MediaTime::new(600, 600),
            timescale: 600,
            sample_entry: None,
            sample_rate: 0,
            channels: 0,
        }
    }

    fn loaded(tracks: Vec<MediaTrack>) -> LoadStatus {
        LoadStatus::Loaded(LoadedAsset {
            tracks,
            duration: MediaTime::new(600, 600),
        })
    }

    #[tokio::test]
    async fn resolves_once() {
        let loader = CountingLoader::new(loaded(vec![track(MediaType::Video, 30.0)]));
        let resolver = TrackResolver::new(loader.clone());
        assert_eq!(resolver.state(), TrackResolutionState::Unresolved);

        let (a, b) = tokio::join!(resolver.resolve(), resolver.resolve());
        assert_eq!(a.unwrap().estimated_frame_count, 30);
        assert!(b.is_ok());
        let again = resolver.resolve().await.unwrap();
        assert!(again.audio.is_none());

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.state(), TrackResolutionState::Resolved);
    }

    #[tokio::test]
    async fn failures_are_memoized() {
        let loader = CountingLoader::new(LoadStatus::Cancelled);
        let resolver = TrackResolver::new(loader.clone());
        assert_matches!(resolver.resolve().await, Err(ResolveError::LoadCancelled));
        assert_matches!(resolver.resolve().await, Err(ResolveError::LoadCancelled));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.state(), TrackResolutionState::Failed);
    }

    async fn resolve_err(status: LoadStatus) -> ResolveError {
        let resolver = TrackResolver::new(CountingLoader::new(status));
        resolver.resolve().await.unwrap_err()
    }

    #[tokio::test]
    async fn classifies_load_outcomes() {
        assert_matches!(resolve_err(LoadStatus::Loading).await, ResolveError::LoadBusy);
        let underlying = Arc::new(io::Error::new(io::ErrorKind::Other, "x"));
        assert_matches!(
            resolve_err(LoadStatus::Failed(underlying)).await,
            ResolveError::LoadFailed(_)
        );
        assert_matches!(
            resolve_err(LoadStatus::Other(None)).await,
            ResolveError::Unknown(None)
        );
        assert_matches!(
            resolve_err(loaded(vec![track(MediaType::Audio, 0.0)])).await,
            ResolveError::NoVisualTrack
        );
        assert_matches!(
            resolve_err(loaded(vec![track(MediaType::Video, 0.0)])).await,
            ResolveError::EmptyTrack
        );
        assert_matches!(
            resolve_err(loaded(vec![track(MediaType::Video, 0.5)])).await,
            ResolveError::EmptyTrack
        );
    }

    #[tokio::test]
    async fn audio_is_optional_but_picked_up() {
        let loader = CountingLoader::new(loaded(vec![
            track(MediaType::Audio, 0.0),
            track(MediaType::Video, 24.0),
        ]));
        let resolver = TrackResolver::new(loader);
        let set = resolver.resolve().await.unwrap();
        assert!(set.audio.is_some());
        assert_eq!(set.estimated_frame_count, 24);
    }
}

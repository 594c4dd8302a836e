//! Where paired resources come from.
//!
//! An [`AssetStore`] writes the raw bytes of one [`AssetResource`] to a
//! file. Local resources are copied; remote ones are downloaded when the
//! caller allows network access. [`DirectoryLibrary`] groups the files of a
//! directory into live-photo assets by file stem.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use lp_core::config::DecodeConfig;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

use crate::cleanup::remove_quietly;
use crate::error::StoreError;

/// Role of a resource within an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Photo,
    PairedVideo,
    Other,
}

impl ResourceKind {
    /// Classify a file by extension.
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => ResourceKind::Photo,
            "mov" => ResourceKind::PairedVideo,
            _ => ResourceKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocation {
    Local(PathBuf),
    /// An `http(s)` URL.
    Remote(String),
}

/// One file belonging to an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResource {
    kind: ResourceKind,
    location: ResourceLocation,
    filename: String,
}

impl AssetResource {
    pub fn local(kind: ResourceKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            kind,
            location: ResourceLocation::Local(path),
            filename,
        }
    }

    pub fn remote(kind: ResourceKind, url: impl Into<String>) -> Self {
        let url = url.into();
        let filename = url
            .rsplit('/')
            .next()
            .and_then(|last| last.split(['?', '#']).next())
            .unwrap_or_default()
            .to_string();
        Self {
            kind,
            location: ResourceLocation::Remote(url),
            filename,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn location(&self) -> &ResourceLocation {
        &self.location
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

/// Writes resource bytes to disk.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Write `resource` to `destination`, which must not exist yet.
    /// Returns the number of bytes written.
    async fn fetch_resource_bytes(
        &self,
        resource: &AssetResource,
        allow_network_access: bool,
        destination: &Path,
    ) -> Result<u64, StoreError>;
}

/// Filesystem copies plus HTTP downloads.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    client: reqwest::Client,
}

impl LocalAssetStore {
    pub fn new(request_timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &DecodeConfig) -> Result<Self, StoreError> {
        Self::new(config.request_timeout())
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<u64, StoreError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                url: url.to_string(),
                status,
            });
        }

        let mut file = create_new(destination).await?;
        let mut written = 0u64;
        let result: Result<(), StoreError> = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            drop(file);
            return Err(interrupted(destination, e));
        }
        Ok(written)
    }
}

async fn create_new(path: &Path) -> Result<tokio::fs::File, StoreError> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => StoreError::DestinationExists {
                path: path.to_path_buf(),
            },
            _ => StoreError::Io(e),
        })
}

/// Remove the partially written `path` and wrap the error that stopped it.
fn interrupted(path: &Path, source: StoreError) -> StoreError {
    StoreError::Interrupted {
        path: path.to_path_buf(),
        source: Box::new(source),
        cleanup: remove_quietly(path),
    }
}

/// Copy `from` into a new file at `to`; an existing `to` is never replaced.
pub(crate) async fn copy_to_new_file(from: &Path, to: &Path) -> Result<u64, StoreError> {
    let mut source = tokio::fs::File::open(from).await?;
    let mut target = create_new(to).await?;
    let result = async {
        let copied = tokio::io::copy(&mut source, &mut target).await?;
        target.flush().await?;
        Ok::<_, io::Error>(copied)
    }
    .await;

    match result {
        Ok(copied) => Ok(copied),
        Err(e) => {
            drop(target);
            Err(interrupted(to, e.into()))
        }
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn fetch_resource_bytes(
        &self,
        resource: &AssetResource,
        allow_network_access: bool,
        destination: &Path,
    ) -> Result<u64, StoreError> {
        if tokio::fs::try_exists(destination).await? {
            return Err(StoreError::DestinationExists {
                path: destination.to_path_buf(),
            });
        }

        let written = match resource.location() {
            ResourceLocation::Local(path) => copy_to_new_file(path, destination).await?,
            ResourceLocation::Remote(url) => {
                if !allow_network_access {
                    return Err(StoreError::NetworkAccessDenied { url: url.clone() });
                }
                tracing::debug!("Downloading {url}");
                self.download(url, destination).await?
            }
        };
        tracing::debug!(
            "Fetched {} ({written} bytes) to {}",
            resource.filename(),
            destination.display()
        );
        Ok(written)
    }
}

/// Resources sharing one file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryAsset {
    stem: String,
    resources: Vec<AssetResource>,
}

impl LibraryAsset {
    pub fn new(stem: impl Into<String>, resources: Vec<AssetResource>) -> Self {
        Self {
            stem: stem.into(),
            resources,
        }
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn resources(&self) -> &[AssetResource] {
        &self.resources
    }

    /// A photo and a paired video.
    pub fn is_live_photo(&self) -> bool {
        self.has(ResourceKind::Photo) && self.has(ResourceKind::PairedVideo)
    }

    fn has(&self, kind: ResourceKind) -> bool {
        self.resources.iter().any(|r| r.kind == kind)
    }
}

/// A flat directory of exported photos and clips.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Group the directory's files by stem, sorted by stem. Stems with
    /// neither a photo nor a video are skipped.
    pub async fn scan(&self) -> io::Result<Vec<LibraryAsset>> {
        let mut groups: BTreeMap<String, Vec<AssetResource>> = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let (Some(stem), Some(extension)) = (path.file_stem(), path.extension()) else {
                continue;
            };
            let kind = ResourceKind::from_extension(&extension.to_string_lossy());
            groups
                .entry(stem.to_string_lossy().into_owned())
                .or_default()
                .push(AssetResource::local(kind, path));
        }

        let assets: Vec<_> = groups
            .into_iter()
            .map(|(stem, mut resources)| {
                resources.sort_by(|a, b| a.filename.cmp(&b.filename));
                LibraryAsset::new(stem, resources)
            })
            .filter(|asset| asset.has(ResourceKind::Photo) || asset.has(ResourceKind::PairedVideo))
            .collect();
        tracing::debug!("Scanned {} assets in {}", assets.len(), self.root.display());
        Ok(assets)
    }

    /// The first live photo whose resources are all present and non-empty.
    pub async fn first_live_photo(&self) -> io::Result<Option<LibraryAsset>> {
        let candidates = self.scan().await?.into_iter().map(|asset| async move {
            if !asset.is_live_photo() {
                return None;
            }
            for resource in &asset.resources {
                let ResourceLocation::Local(path) = &resource.location else {
                    continue;
                };
                match tokio::fs::metadata(path).await {
                    Ok(meta) if meta.len() > 0 => {}
                    _ => return None,
                }
            }
            Some(asset)
        });
        Ok(fetch_first_live_photo(candidates).await)
    }
}

/// Evaluate `candidates` concurrently and keep the first live photo to
/// arrive. Later matches are dropped.
pub async fn fetch_first_live_photo<I, F>(candidates: I) -> Option<LibraryAsset>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Option<LibraryAsset>>,
{
    let slot = OnceCell::new();
    let mut pending: FuturesUnordered<F> = candidates.into_iter().collect();
    while let Some(candidate) = pending.next().await {
        let Some(asset) = candidate.filter(LibraryAsset::is_live_photo) else {
            continue;
        };
        if let Err(e) = slot.set(asset) {
            let late = match e {
                tokio::sync::SetError::AlreadyInitializedError(asset)
                | tokio::sync::SetError::InitializingError(asset) => asset,
            };
            tracing::trace!("Ignoring later live photo {}", late.stem());
        }
    }
    slot.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store() -> LocalAssetStore {
        LocalAssetStore::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn copies_local_resources() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("IMG_0001.JPG");
        std::fs::write(&source, b"jpeg bytes").unwrap();
        let resource = AssetResource::local(ResourceKind::Photo, &source);
        assert_eq!(resource.filename(), "IMG_0001.JPG");

        let destination = dir.path().join("staged.jpeg");
        let written = store()
            .fetch_resource_bytes(&resource, false, &destination)
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&destination).unwrap(), b"jpeg bytes");

        let err = store()
            .fetch_resource_bytes(&resource, false, &destination)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::DestinationExists { .. });
    }

    #[tokio::test]
    async fn remote_resources_need_network_access() {
        let dir = tempfile::tempdir().unwrap();
        let resource = AssetResource::remote(
            ResourceKind::PairedVideo,
            "https://example.invalid/clips/IMG_0001.MOV?sig=1",
        );
        assert_eq!(resource.filename(), "IMG_0001.MOV");
        let destination = dir.path().join("staged.mov");
        let err = store()
            .fetch_resource_bytes(&resource, false, &destination)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::NetworkAccessDenied { .. });
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn interrupted_local_copy_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // Opening a directory succeeds but reading it does not.
        let resource = AssetResource::local(ResourceKind::Photo, dir.path());
        let destination = dir.path().join("staged.jpeg");
        let err = store()
            .fetch_resource_bytes(&resource, false, &destination)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Interrupted { cleanup: None, .. });
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn interrupted_download_removes_the_partial_file() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\npartial")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let resource = AssetResource::remote(
            ResourceKind::PairedVideo,
            format!("http://{addr}/IMG_0001.MOV"),
        );
        let destination = dir.path().join("staged.mov");
        let err = store()
            .fetch_resource_bytes(&resource, true, &destination)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Interrupted { cleanup: None, .. });
        assert!(err.cleanup().is_none());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn scan_groups_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["IMG_1.jpg", "IMG_1.mov", "IMG_2.jpeg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let assets = DirectoryLibrary::new(dir.path()).scan().await.unwrap();
        let stems: Vec<_> = assets.iter().map(LibraryAsset::stem).collect();
        assert_eq!(stems, ["IMG_1", "IMG_2"]);
        assert!(assets[0].is_live_photo());
        assert!(!assets[1].is_live_photo());
    }

    #[tokio::test]
    async fn first_live_photo_skips_empty_resources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"").unwrap();
        std::fs::write(dir.path().join("a.mov"), b"x").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.mov"), b"x").unwrap();

        let asset = DirectoryLibrary::new(dir.path())
            .first_live_photo()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(asset.stem(), "b");
    }

    fn live(stem: &str) -> LibraryAsset {
        LibraryAsset::new(
            stem,
            vec![
                AssetResource::local(ResourceKind::Photo, format!("{stem}.jpg")),
                AssetResource::local(ResourceKind::PairedVideo, format!("{stem}.mov")),
            ],
        )
    }

    #[tokio::test]
    async fn first_arrival_wins() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some(live("slow"))
        };
        let fast = async { Some(live("fast")) };
        let still = async { Some(LibraryAsset::new("still", vec![])) };

        let candidates: Vec<std::pin::Pin<Box<dyn Future<Output = _> + Send>>> =
            vec![Box::pin(slow), Box::pin(still), Box::pin(fast)];
        let first = fetch_first_live_photo(candidates).await.unwrap();
        assert_eq!(first.stem(), "fast");
        assert!(fetch_first_live_photo(Vec::<std::future::Ready<_>>::new())
            .await
            .is_none());
    }
}

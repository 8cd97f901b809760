//! Asset stager: downloads a job's inputs into its scratch workspace.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt, TryStreamExt};
use reel_media::ClipInput;
use reel_models::RenderContext;
use reel_storage::{AssetLocation, ObjectStore, StorageError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::StageError;
use crate::metrics;
use crate::retry::{retry_async, RetryConfig, RetryResult};
use crate::workspace::ScratchWorkspace;

pub const DEFAULT_CLIP_EXTENSION: &str = "mp4";
pub const DEFAULT_TRACK_EXTENSION: &str = "m4a";
pub const DEFAULT_FANOUT: usize = 4;

/// Local copies of a job's inputs, in composition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAssets {
    pub track: PathBuf,
    pub clips: Vec<ClipInput>,
}

#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error("{0}")]
    Permanent(String),
    #[error("{0}")]
    Transient(String),
}

impl DownloadError {
    fn is_transient(&self) -> bool {
        matches!(self, DownloadError::Transient(_))
    }

    fn from_status(status: u16) -> Self {
        match status {
            408 | 429 | 500..=599 => Self::Transient(format!("HTTP {}", status)),
            _ => Self::Permanent(format!("HTTP {}", status)),
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Permanent(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }

    fn io(err: std::io::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<StorageError> for DownloadError {
    fn from(err: StorageError) -> Self {
        if err.is_retryable() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

struct AssetRequest<'a> {
    name: String,
    url: &'a str,
    default_extension: &'static str,
}

/// Resolves asset references to files in a scratch workspace.
///
/// Object-storage URIs are read through the `ObjectStore`; anything else is
/// fetched over HTTP. Each file is written to `<name>.part` and renamed once
/// complete.
pub struct AssetStager {
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    fanout: usize,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl AssetStager {
    pub fn new(store: Arc<dyn ObjectStore>, http: reqwest::Client) -> Self {
        Self {
            store,
            http,
            fanout: DEFAULT_FANOUT,
            retry: RetryConfig::new("asset_download"),
            request_timeout: Duration::from_secs(300),
        }
    }

    /// Maximum concurrent downloads for one job.
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Download the track and every clip of `ctx` into `workspace`.
    ///
    /// Fails on the first asset that cannot be staged.
    pub async fn stage(
        &self,
        ctx: &RenderContext,
        workspace: &ScratchWorkspace,
    ) -> Result<StagedAssets, StageError> {
        let mut requests = Vec::with_capacity(ctx.clips.len() + 1);
        requests.push(AssetRequest {
            name: "track".to_string(),
            url: &ctx.track.url,
            default_extension: DEFAULT_TRACK_EXTENSION,
        });
        for (i, clip) in ctx.clips.iter().enumerate() {
            requests.push(AssetRequest {
                name: format!("clip{}", i),
                url: &clip.url,
                default_extension: DEFAULT_CLIP_EXTENSION,
            });
        }

        // Collected up front so the stream's future stays `Send`.
        let fetches: Vec<_> = requests.iter().map(|r| self.fetch(r, workspace)).collect();
        let paths: Vec<PathBuf> = stream::iter(fetches)
            .buffered(self.fanout)
            .try_collect()
            .await?;

        let mut paths = paths.into_iter();
        let track = paths
            .next()
            .ok_or_else(|| StageError::workspace("track was not staged"))?;
        let clips = paths
            .zip(&ctx.clips)
            .map(|(path, clip)| ClipInput::new(path).with_trim(clip.start_ms, clip.end_ms))
            .collect();

        info!(clips = ctx.clips.len(), "Assets staged");
        Ok(StagedAssets { track, clips })
    }

    async fn fetch(
        &self,
        request: &AssetRequest<'_>,
        workspace: &ScratchWorkspace,
    ) -> Result<PathBuf, StageError> {
        let location = AssetLocation::parse(request.url).map_err(|e| StageError::AssetUnavailable {
            asset: request.name.clone(),
            message: e.to_string(),
        })?;

        let extension = location
            .extension()
            .unwrap_or_else(|| request.default_extension.to_string());
        let dest = workspace.asset_path(&request.name, &extension);
        let part = part_path(&dest);

        let calls = AtomicU32::new(0);
        let result = retry_async(&self.retry, DownloadError::is_transient, || {
            if calls.fetch_add(1, Ordering::Relaxed) > 0 {
                metrics::record_download_retry();
            }
            self.download(&location, &part)
        })
        .await;

        match result {
            RetryResult::Success(bytes) => {
                tokio::fs::rename(&part, &dest).await?;
                debug!(asset = %request.name, bytes, path = %dest.display(), "Asset downloaded");
                Ok(dest)
            }
            RetryResult::Failed { error, attempts } => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(match error {
                    DownloadError::Permanent(message) => StageError::AssetUnavailable {
                        asset: request.name.clone(),
                        message,
                    },
                    DownloadError::Transient(message) => StageError::AssetTransient {
                        asset: request.name.clone(),
                        attempts,
                        message,
                    },
                })
            }
        }
    }

    async fn download(&self, location: &AssetLocation, part: &Path) -> Result<u64, DownloadError> {
        let written = match location {
            AssetLocation::Object(uri) => self.store.download_to(&uri.bucket, &uri.key, part).await?,
            AssetLocation::Http(url) => self.download_http(url, part).await?,
        };

        if written == 0 {
            return Err(DownloadError::Permanent("empty body".to_string()));
        }
        Ok(written)
    }

    async fn download_http(&self, url: &reqwest::Url, part: &Path) -> Result<u64, DownloadError> {
        let response = self
            .http
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(DownloadError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::from_status(status.as_u16()));
        }

        let mut file = tokio::fs::File::create(part).await.map_err(DownloadError::io)?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(DownloadError::from_reqwest)?;
            file.write_all(&chunk).await.map_err(DownloadError::io)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(DownloadError::io)?;

        Ok(written)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

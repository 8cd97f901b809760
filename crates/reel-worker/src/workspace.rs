//! Per-job scratch directories.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use reel_models::ReelId;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Every scratch directory name starts with this.
pub const SCRATCH_PREFIX: &str = "reel-";

pub const OUTPUT_FILE: &str = "out.mp4";
pub const POSTER_FILE: &str = "poster.jpg";

/// Directory owned by exactly one job attempt.
///
/// Removed by `cleanup`, or on drop if the job unwinds. Directories left
/// behind by a crashed process are removed by `sweep_stale` at startup.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    /// Create a fresh directory under `root` for `reel_id`.
    pub fn create(root: &Path, reel_id: &ReelId) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", SCRATCH_PREFIX, reel_id))
            .tempdir_in(root)?;
        debug!(reel_id = %reel_id, path = %dir.path().display(), "Created scratch workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Local path for a staged asset.
    pub fn asset_path(&self, name: &str, extension: &str) -> PathBuf {
        self.path().join(format!("{}.{}", name, extension))
    }

    pub fn output_path(&self) -> PathBuf {
        self.path().join(OUTPUT_FILE)
    }

    pub fn poster_path(&self) -> PathBuf {
        self.path().join(POSTER_FILE)
    }

    /// Delete the directory and everything in it.
    pub fn cleanup(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Remove scratch directories under `root` older than `max_age`.
///
/// Returns how many were removed. A missing root is not an error.
pub async fn sweep_stale(root: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }

        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_dir() => meta,
            _ => continue,
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), "Failed to remove stale scratch dir: {}", e),
        }
    }

    if removed > 0 {
        info!(removed, root = %root.display(), "Swept stale scratch workspaces");
    }
    Ok(removed)
}

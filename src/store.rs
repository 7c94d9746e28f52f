//! Artifact store: one JSON file per item
//!
//! Artifacts live at `{output_dir}/{item_id}.json`. Every write goes to a
//! hidden `*.partial` file first and is then renamed into place, so an
//! artifact is either absent, the previous complete version, or the new
//! complete version.
//!
//! Partial names carry the writing process id and a per-process sequence
//! number (`.{item_id}.json.{pid}-{seq}.partial`), so concurrent writers of
//! the same item never share a temp file. Writes in progress are tracked in a
//! process-wide registry that [`ArtifactStore::cleanup_partials`] consults.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Suffix of in-progress artifact files
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Default age after which a foreign partial file counts as abandoned
pub const DEFAULT_STALE_PARTIAL_AGE: Duration = Duration::from_secs(3600);

/// Sequence making every partial name unique within this process
static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// File names of partials currently being written by this process
static IN_FLIGHT: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Default::default);

/// Registration of a partial file in [`IN_FLIGHT`], released on drop
struct InFlightPartial {
    name: String,
}

impl InFlightPartial {
    fn register(name: String) -> Self {
        IN_FLIGHT
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone());
        Self { name }
    }
}

impl Drop for InFlightPartial {
    fn drop(&mut self) {
        IN_FLIGHT
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

fn is_in_flight(name: &str) -> bool {
    IN_FLIGHT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(name)
}

/// Unique partial file name for `stem`
fn partial_name(stem: &str) -> String {
    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(".{stem}.{}-{seq}{PARTIAL_SUFFIX}", std::process::id())
}

/// Process id encoded in a partial file name, if any
fn partial_pid(name: &str) -> Option<u32> {
    let (_, tag) = name.strip_suffix(PARTIAL_SUFFIX)?.rsplit_once('.')?;
    tag.split('-').next()?.parse().ok()
}

/// Destination for fetched records
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Atomically write the artifact for `item_id`, returning its final path
    async fn write(&self, item_id: &str, body: &[u8]) -> Result<PathBuf>;

    /// Whether a complete artifact for `item_id` exists
    async fn exists(&self, item_id: &str) -> bool;

    /// Final path of the artifact for `item_id`
    fn artifact_path(&self, item_id: &str) -> PathBuf;

    /// Remove abandoned partial files, returning how many were removed
    ///
    /// Partials of writes still in progress are never touched.
    async fn cleanup_partials(&self) -> Result<usize>;
}

/// Filesystem-backed [`ArtifactStore`]
#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    dir: PathBuf,
    stale_partial_age: Duration,
}

impl FsArtifactStore {
    /// Create the directory if absent and check that it is writable
    ///
    /// This is the run's pre-flight check: failing here is fatal, while
    /// failures of individual writes later are recorded per item.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let unavailable = |source: std::io::Error| Error::StoreUnavailable {
            path: dir.clone(),
            source,
        };

        tokio::fs::create_dir_all(&dir).await.map_err(unavailable)?;

        let probe_name = partial_name("write-probe");
        let _registered = InFlightPartial::register(probe_name.clone());
        let probe = dir.join(&probe_name);
        tokio::fs::write(&probe, b"").await.map_err(unavailable)?;
        tokio::fs::remove_file(&probe).await.map_err(unavailable)?;

        tracing::debug!(output_dir = %dir.display(), "Artifact store ready");
        Ok(Self {
            dir,
            stale_partial_age: DEFAULT_STALE_PARTIAL_AGE,
        })
    }

    /// Age after which partials written by other processes are removed
    ///
    /// Partials written by this process are removed as soon as their write
    /// is no longer in progress.
    pub fn with_stale_partial_age(mut self, age: Duration) -> Self {
        self.stale_partial_age = age;
        self
    }

    /// Directory managed by this store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the partial file `name` was abandoned by its writer
    async fn is_abandoned(&self, name: &str, path: &Path) -> bool {
        if is_in_flight(name) {
            return false;
        }
        if partial_pid(name) == Some(std::process::id()) || self.stale_partial_age.is_zero() {
            return true;
        }

        // Another process may still be writing; only old files are abandoned
        tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= self.stale_partial_age)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, item_id: &str, body: &[u8]) -> Result<PathBuf> {
        let final_path = self.artifact_path(item_id);
        let name = partial_name(&format!("{item_id}.json"));
        let _registered = InFlightPartial::register(name.clone());
        let partial = self.dir.join(&name);

        let result: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            file.write_all(body).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&partial, &final_path).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(
                    item_id,
                    path = %partial.display(),
                    error = %cleanup,
                    "Failed to remove partial artifact"
                );
            }
            return Err(Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write artifact '{}': {}", final_path.display(), e),
            )));
        }

        Ok(final_path)
    }

    async fn exists(&self, item_id: &str) -> bool {
        tokio::fs::metadata(self.artifact_path(item_id))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    fn artifact_path(&self, item_id: &str) -> PathBuf {
        self.dir.join(format!("{item_id}.json"))
    }

    async fn cleanup_partials(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }

            let path = entry.path();
            if !self.is_abandoned(name, &path).await {
                tracing::debug!(file = name, "Keeping partial artifact of a live write");
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(file = name, "Removed partial artifact");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(file = name, error = %e, "Failed to remove partial artifact");
                }
            }
        }

        Ok(removed)
    }
}

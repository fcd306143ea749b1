//! Asset store (C2): the durable filesystem area holding generated audio
//! and video artifacts. Grounded on the write-then-fsync discipline used
//! for baseline reports in the host latency harness, generalized from a
//! single report file to a registry of per-turn artifacts.

use crate::config::AssetStoreConfig;
use crate::error::{GatewayError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

/// The two kinds of artifact the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Audio,
    Video,
}

impl ArtifactKind {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Audio => "wav",
            Self::Video => "mp4",
        }
    }
}

/// An immutable artifact once published. Never modified after `put`
/// returns; may later be evicted.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: Uuid,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub byte_size: u64,
    pub mtime: SystemTime,
    pub fsync_completed: bool,
}

/// Durable artifact store backed by a directory tree, with an in-process
/// registry mirroring what is on disk so `evict` can run a predicate over
/// artifact metadata without re-reading the filesystem.
pub struct AssetStore {
    root_dir: PathBuf,
    poll_interval: Duration,
    stable_budget: Duration,
    read_stable_budget: Duration,
    registry: Arc<Mutex<HashMap<Uuid, Artifact>>>,
}

impl AssetStore {
    /// Creates a store rooted at `config.root_dir`, creating the directory
    /// tree if it does not already exist.
    pub fn new(config: &AssetStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root_dir)?;
        Ok(Self {
            root_dir: config.root_dir.clone(),
            poll_interval: Duration::from_millis(config.stable_size_poll_ms),
            stable_budget: Duration::from_millis(config.stable_size_budget_ms),
            read_stable_budget: Duration::from_millis(config.stable_size_read_budget_ms),
            registry: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Writes `bytes` to a unique path, flushes, fsyncs, and registers the
    /// resulting artifact. IDs are process-unique (`Uuid::new_v4`), so two
    /// writers never collide on a path.
    pub async fn put(&self, bytes: &[u8], kind: ArtifactKind) -> Result<Artifact> {
        let id = Uuid::new_v4();
        let dir = self.root_dir.join(kind.dir_name());
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{id}.{}", kind.extension()));

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| GatewayError::Storage(format!("create {}: {e}", path.display())))?;
        file.write_all(bytes)
            .await
            .map_err(|e| GatewayError::Storage(format!("write {}: {e}", path.display())))?;
        file.flush().await?;
        file.sync_all()
            .await
            .map_err(|e| GatewayError::Storage(format!("fsync {}: {e}", path.display())))?;

        let metadata = file.metadata().await?;
        let artifact = Artifact {
            id,
            kind,
            path,
            byte_size: metadata.len(),
            mtime: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
            fsync_completed: true,
        };

        self.registry.lock().insert(id, artifact.clone());
        tracing::info!(
            artifact_id = %id,
            kind = ?kind,
            byte_size = artifact.byte_size,
            "artifact published"
        );
        Ok(artifact)
    }

    /// Looks up a previously published artifact by ID.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Artifact> {
        self.registry.lock().get(&id).cloned()
    }

    /// Polls file size at `poll_interval` until two consecutive samples
    /// agree and the artifact's fsync has completed, or until the
    /// write-path `stable_budget` elapses. Called right after `put`.
    pub async fn confirm_stable(&self, artifact: &Artifact) -> Result<()> {
        self.confirm_stable_with_budget(artifact, self.stable_budget).await
    }

    /// Same check as [`confirm_stable`](Self::confirm_stable), bounded by
    /// the short read-path budget (`stable_size_read_budget_ms`) instead of
    /// the write-path one. Used by the video range server's pre-send
    /// freshness check (§4.6), where a racing request must fail fast into
    /// a retryable 503 rather than blocking for seconds.
    pub async fn confirm_stable_for_read(&self, artifact: &Artifact) -> Result<()> {
        self.confirm_stable_with_budget(artifact, self.read_stable_budget).await
    }

    async fn confirm_stable_with_budget(&self, artifact: &Artifact, budget: Duration) -> Result<()> {
        if !artifact.fsync_completed {
            return Err(GatewayError::ArtifactNotReady(artifact.id.to_string()));
        }

        let deadline = Instant::now() + budget;
        let mut previous: Option<u64> = None;
        loop {
            let size = tokio::fs::metadata(&artifact.path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            if previous == Some(size) {
                return Ok(());
            }
            previous = Some(size);

            if Instant::now() >= deadline {
                return Err(GatewayError::ArtifactNotReady(format!(
                    "{} did not stabilize within budget",
                    artifact.id
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Validates a byte range against the artifact's authoritative
    /// at-write-time size, returning the response length.
    pub fn range_length(&self, artifact: &Artifact, start: u64, end: Option<u64>) -> Result<u64> {
        let total = artifact.byte_size;
        let end = end.unwrap_or(total.saturating_sub(1));
        if start > end || end >= total {
            return Err(GatewayError::InvalidInput(format!(
                "range {start}-{end} out of bounds for artifact of size {total}"
            )));
        }
        Ok(end - start + 1)
    }

    /// Opens a read handle to `artifact` positioned at `start`, paired with
    /// the number of bytes the caller should read (`range_length`).
    pub async fn open_range(
        &self,
        artifact: &Artifact,
        start: u64,
        end: Option<u64>,
    ) -> Result<(tokio::fs::File, u64)> {
        let length = self.range_length(artifact, start, end)?;
        let mut file = tokio::fs::File::open(&artifact.path)
            .await
            .map_err(|e| GatewayError::Storage(format!("open {}: {e}", artifact.path.display())))?;
        file.seek(std::io::SeekFrom::Start(start)).await?;
        Ok((file, length))
    }

    /// Removes every registered artifact matching `predicate`, deleting the
    /// backing file. Returns the number of artifacts removed.
    pub fn evict<F: Fn(&Artifact) -> bool>(&self, predicate: F) -> usize {
        let mut registry = self.registry.lock();
        let matching: Vec<Uuid> = registry
            .iter()
            .filter(|(_, artifact)| predicate(artifact))
            .map(|(id, _)| *id)
            .collect();
        for id in &matching {
            if let Some(artifact) = registry.remove(id) {
                if let Err(e) = std::fs::remove_file(&artifact.path) {
                    tracing::warn!(artifact_id = %id, error = %e, "evict: failed to remove file");
                }
            }
        }
        matching.len()
    }
}

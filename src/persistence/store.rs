use crate::dataset::types::{DatasetId, DatasetState};

use anyhow::{Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Durable store for dataset states. Survives entity restarts and ownership moves.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// `None` when the dataset was never indexed.
    async fn load(&self, id: &DatasetId) -> Result<Option<DatasetState>>;
    async fn save(&self, state: &DatasetState) -> Result<()>;
    async fn list(&self) -> Result<Vec<DatasetId>>;
}

/// One JSON document per dataset under `<root>/datasets/<id>.json`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join("datasets"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &DatasetId) -> Result<PathBuf> {
        let raw = id.as_str();
        let safe = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !raw.starts_with('.');
        if !safe {
            bail!("Dataset id {:?} is not a valid file name", raw);
        }
        Ok(self.dir.join(format!("{}.json", raw)))
    }
}

#[async_trait]
impl Persistence for FileStore {
    async fn load(&self, id: &DatasetId) -> Result<Option<DatasetState>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &DatasetState) -> Result<()> {
        let path = self.path_for(&state.dataset)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so a crash never leaves a truncated document.
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Saved dataset {} to {}", state.dataset, path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DatasetId>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(DatasetId::new(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-process store, shared between nodes in tests.
#[derive(Default)]
pub struct MemoryStore {
    states: DashMap<DatasetId, DatasetState>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save` fail until switched off again.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn load(&self, id: &DatasetId) -> Result<Option<DatasetState>> {
        Ok(self.states.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, state: &DatasetState) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("Store rejected write for {}", state.dataset);
        }
        self.states.insert(state.dataset.clone(), state.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DatasetId>> {
        let mut ids: Vec<DatasetId> = self.states.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

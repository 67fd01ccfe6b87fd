use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

use super::StorageResult;

pub async fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

/// Load json or default to an empty value. A missing or empty file is not an error.
pub async fn load_or_default<T>(path: &Path) -> StorageResult<T>
where
    T: DeserializeOwned + Default,
{
    match fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(T::default()),
        Ok(bytes) => serde_json::from_slice::<T>(&bytes)
            .with_context(|| format!("corrupt json store at {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Atomically write json to disk using a temp file + rename.
///
/// The write is fsync'd before the rename so a crash leaves either the old or
/// the new snapshot, never a torn file.
pub async fn write_json_file<T>(path: &Path, value: &T) -> StorageResult<()>
where
    T: Serialize,
{
    ensure_parent_dir(path).await?;

    let tmp_path = temp_path(path);
    let json = serde_json::to_vec_pretty(value)?;

    let mut file = fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    file.write_all(&json).await?;
    file.sync_all().await?;

    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|name| format!("{}.tmp", name.to_string_lossy()))
        .unwrap_or_else(|| "tmp.json".to_string());
    tmp.set_file_name(file_name);
    tmp
}

/// Location of one namespaced json store: `<working_dir>[/<workspace>]/kv_store_<namespace>.json`.
#[derive(Clone, Debug)]
pub struct JsonStoreConfig {
    pub working_dir: PathBuf,
    pub namespace: String,
    pub workspace: Option<String>,
}

impl JsonStoreConfig {
    fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref().filter(|ws| !ws.is_empty())
    }

    pub fn file_path(&self) -> PathBuf {
        let dir = match self.workspace() {
            Some(ws) => self.working_dir.join(ws),
            None => self.working_dir.clone(),
        };
        dir.join(format!("kv_store_{}.json", self.namespace))
    }

    /// Namespace qualified by workspace, used in logs and error context.
    pub fn qualified_namespace(&self) -> String {
        format!("{}_{}", self.workspace().unwrap_or("_"), self.namespace)
    }
}

/// String-keyed map mirrored to a json file.
///
/// Mutations only mark the snapshot dirty; [`JsonSnapshot::flush`] writes it out. A failed
/// write leaves it dirty so the next flush retries.
pub struct JsonSnapshot<V> {
    namespace: String,
    qualified: String,
    path: PathBuf,
    data: RwLock<HashMap<String, V>>,
    dirty: AtomicBool,
}

impl<V> JsonSnapshot<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(config: &JsonStoreConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            qualified: config.qualified_namespace(),
            path: config.file_path(),
            data: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory map with the file contents.
    pub async fn load(&self) -> StorageResult<()> {
        ensure_parent_dir(&self.path).await?;
        let data: HashMap<String, V> = load_or_default(&self.path).await?;
        *self.data.write().await = data;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, HashMap<String, V>> {
        self.data.read().await
    }

    /// Applies `mutate` and marks the snapshot dirty when it reports a change.
    pub async fn update<R>(&self, mutate: impl FnOnce(&mut HashMap<String, V>) -> (R, bool)) -> R {
        let (result, changed) = mutate(&mut *self.data.write().await);
        if changed {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Keys from `keys` that are not stored.
    pub async fn missing(&self, keys: &HashSet<String>) -> HashSet<String> {
        let data = self.data.read().await;
        keys.iter()
            .filter(|key| !data.contains_key(*key))
            .cloned()
            .collect()
    }

    pub async fn flush(&self) -> StorageResult<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let snapshot = self.data.read().await.clone();
        if let Err(err) = write_json_file(&self.path, &snapshot).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(err).with_context(|| format!("failed to write store {}", self.qualified));
        }
        debug!(namespace = %self.qualified, entries = snapshot.len(), "store flushed");
        Ok(())
    }

    /// Empties the store on disk as well as in memory.
    pub async fn clear(&self) -> StorageResult<()> {
        self.update(|data| {
            data.clear();
            ((), true)
        })
        .await;
        self.flush().await
    }
}

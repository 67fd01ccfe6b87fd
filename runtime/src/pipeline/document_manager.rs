use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::warn;
use walkdir::WalkDir;

use super::registry::TEMP_PREFIX;
use crate::extract::ContentExtractor;

#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> Result<()>;
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;
    async fn remove(&self, path: &Path) -> Result<()>;
    /// Every regular file below `root`, recursively.
    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>>;
    fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct FsFileRepository;

#[async_trait]
impl FileRepository for FsFileRepository {
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("failed to create directory {}", path.display()))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read file {}", path.display()))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("failed to write file {}", path.display()))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("failed to delete file {}", path.display()))
    }

    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut files = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = entry.with_context(|| format!("failed to list {}", root.display()))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
            Ok(files)
        })
        .await
        .context("file listing task panicked")?
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Upload copy living in the temp directory.
///
/// [`TempFile::remove`] deletes it through the repository that wrote it. A copy that is
/// dropped without being removed is deleted by a background task on the current runtime.
pub struct TempFile {
    path: PathBuf,
    repo: Arc<dyn FileRepository>,
    removed: bool,
}

impl TempFile {
    fn new(path: PathBuf, repo: Arc<dyn FileRepository>) -> Self {
        Self {
            path,
            repo,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) -> Result<()> {
        self.removed = true;
        self.repo.remove(&self.path).await
    }
}

impl std::fmt::Debug for TempFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempFile").field("path", &self.path).finish()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let repo = Arc::clone(&self.repo);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = repo.remove(&path).await {
                        warn!(error = %err, file = %path.display(), "failed to remove temporary file");
                    }
                });
            }
            Err(_) => {
                warn!(file = %path.display(), "temporary file left behind outside a runtime");
            }
        }
    }
}

/// Owns the input directory layout and the extension rules applied to it.
#[derive(Clone)]
pub struct DocumentManager {
    input_dir: PathBuf,
    extractor: Arc<ContentExtractor>,
    file_repo: Arc<dyn FileRepository>,
}

impl DocumentManager {
    pub async fn new<P>(
        input_dir: P,
        workspace: Option<&str>,
        extractor: Arc<ContentExtractor>,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Self::with_repository(input_dir, workspace, extractor, Arc::new(FsFileRepository)).await
    }

    pub async fn with_repository<P>(
        input_dir: P,
        workspace: Option<&str>,
        extractor: Arc<ContentExtractor>,
        file_repo: Arc<dyn FileRepository>,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let base = input_dir.as_ref().to_path_buf();
        let input_dir = match workspace {
            Some(ws) if !ws.is_empty() => base.join(ws),
            _ => base,
        };

        file_repo.create_dir_all(&input_dir).await.with_context(|| {
            format!("failed to create input directory at {}", input_dir.display())
        })?;

        Ok(Self {
            input_dir,
            extractor,
            file_repo,
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.input_dir.join("temp")
    }

    pub fn extractor(&self) -> Arc<ContentExtractor> {
        Arc::clone(&self.extractor)
    }

    pub fn is_supported_file(&self, filename: &str) -> bool {
        self.extractor.is_supported(filename)
    }

    pub fn sanitize_filename(&self, raw: &str) -> Result<String> {
        let cleaned: String = raw.trim().chars().filter(|c| !c.is_control()).collect();
        if cleaned.is_empty() {
            return Err(anyhow!("filename cannot be empty"));
        }

        if cleaned.contains("..") || cleaned.contains('/') || cleaned.contains('\\') {
            return Err(anyhow!("invalid filename: {cleaned}"));
        }

        Ok(cleaned)
    }

    pub fn path_is_duplicate(&self, filename: &str) -> bool {
        self.file_repo.exists(&self.input_dir.join(filename))
    }

    pub async fn save_upload(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.input_dir.join(filename);
        self.file_repo.write(&target, bytes).await?;
        Ok(target)
    }

    pub async fn save_temp(&self, filename: &str, bytes: &[u8]) -> Result<TempFile> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%f");
        let target = self
            .temp_dir()
            .join(format!("{TEMP_PREFIX}{timestamp}_{filename}"));
        self.file_repo.write(&target, bytes).await?;
        Ok(TempFile::new(target, Arc::clone(&self.file_repo)))
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.file_repo.read(path).await
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        self.file_repo.remove(path).await
    }

    pub async fn list_input_files(&self) -> Result<Vec<PathBuf>> {
        self.file_repo.list_files(&self.input_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager(root: &Path) -> DocumentManager {
        DocumentManager::new(
            root.join("inputs"),
            None,
            Arc::new(ContentExtractor::with_all_formats()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn rejects_path_like_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let docs = manager(dir.path()).await;
        assert!(docs.sanitize_filename("../etc/passwd").is_err());
        assert!(docs.sanitize_filename("a/b.txt").is_err());
        assert!(docs.sanitize_filename("   ").is_err());
        assert_eq!(docs.sanitize_filename(" notes.txt ").unwrap(), "notes.txt");
    }

    #[tokio::test]
    async fn temp_file_is_removed_explicitly() {
        let dir = tempfile::tempdir().unwrap();
        let docs = manager(dir.path()).await;
        let temp = docs.save_temp("a.txt", b"hello").await.unwrap();
        let path = temp.path().to_path_buf();
        assert!(path.exists());
        assert!(
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap()
                .starts_with(TEMP_PREFIX)
        );
        temp.remove().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropped_temp_file_is_cleaned_up_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let docs = manager(dir.path()).await;
        let temp = docs.save_temp("b.txt", b"hello").await.unwrap();
        let path = temp.path().to_path_buf();
        drop(temp);
        for _ in 0..50 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn workspace_nests_input_dir() {
        let dir = tempfile::tempdir().unwrap();
        let docs = DocumentManager::new(
            dir.path().join("inputs"),
            Some("tenant"),
            Arc::new(ContentExtractor::with_all_formats()),
        )
        .await
        .unwrap();
        assert_eq!(docs.input_dir(), dir.path().join("inputs/tenant"));
        assert!(docs.input_dir().is_dir());
    }
}

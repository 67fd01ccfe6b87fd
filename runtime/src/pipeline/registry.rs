use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::extract::extension_of;

/// Name prefix of upload copies that live only until their content is extracted.
pub const TEMP_PREFIX: &str = "__tmp__";

/// Paths already queued during this process lifetime. Not persisted.
#[derive(Debug, Default)]
pub struct FileRegistry {
    indexed: Mutex<HashSet<PathBuf>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files under `root` with one of `extensions` that are not indexed yet.
    pub fn scan(&self, root: &Path, extensions: &HashSet<String>) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        if !root.exists() {
            return Ok(found);
        }

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.with_context(|| format!("failed to scan {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            if !extension_of(name).is_some_and(|ext| extensions.contains(&ext)) {
                continue;
            }
            found.push(entry.into_path());
        }

        let indexed = self.indexed.lock();
        found.retain(|path| !indexed.contains(path));
        Ok(found)
    }

    /// Returns false if the path was already marked.
    pub fn mark_indexed(&self, path: &Path) -> bool {
        self.indexed.lock().insert(path.to_path_buf())
    }

    pub fn is_indexed(&self, path: &Path) -> bool {
        self.indexed.lock().contains(path)
    }

    pub fn reset(&self) {
        self.indexed.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.indexed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

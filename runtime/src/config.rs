use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

use crate::engine::ChunkConfig;
use crate::extract::default_extensions;

const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub working_dir: PathBuf,
    pub input_dir: PathBuf,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default = "default_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_history_messages: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_parallel_insert: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 100,
            max_parallel_insert: 2,
        }
    }
}

impl EngineConfig {
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_tokens: self.chunk_size,
            overlap_tokens: self.chunk_overlap,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub data_file: PathBuf,
    pub batch_size: usize,
    pub workers: usize,
    /// Empty means every authority is accepted.
    pub allowed_authorities: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/rules-data.json"),
            batch_size: 5,
            workers: 1,
            allowed_authorities: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Config rooted at `working_dir`, used by tests and as a fallback.
    pub fn for_dir(root: &Path) -> Self {
        Self {
            working_dir: root.join("rag_storage"),
            input_dir: root.join("inputs"),
            workspace: None,
            supported_extensions: default_extensions(),
            pipeline: PipelineConfig::default(),
            engine: EngineConfig::default(),
            import: ImportConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.chunk_overlap >= self.engine.chunk_size {
            bail!(
                "engine.chunk_overlap ({}) must be smaller than engine.chunk_size ({})",
                self.engine.chunk_overlap,
                self.engine.chunk_size
            );
        }
        if self.import.batch_size == 0 {
            bail!("import.batch_size must be positive");
        }
        if self.import.workers == 0 {
            bail!("import.workers must be positive");
        }
        Ok(())
    }
}

pub async fn load_config() -> Result<AppConfig> {
    let path = config_path();
    let contents = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let mut config: AppConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

    if let Some(workspace) = env::var("WORKSPACE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        config.workspace = Some(workspace);
    }

    config.validate()?;
    info!(path = %path.display(), "Configuration loaded from disk");
    Ok(config)
}

fn config_path() -> PathBuf {
    env::var("APP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

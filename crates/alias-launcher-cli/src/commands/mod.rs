//! CLI command handlers.

pub mod apps;
pub mod query;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

/// Resolved locations of everything the commands touch.
pub struct Paths {
    /// The application registry file.
    pub apps_file: PathBuf,
    /// The embedding cache file.
    pub cache_file: PathBuf,
    /// The model directory, when one was given.
    pub model_dir: Option<PathBuf>,
}

impl Paths {
    /// Apply defaults: the platform config directory unless overridden.
    pub fn resolve(config_dir: Option<PathBuf>, model_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .context("no platform config directory; pass --config-dir")?
                .join("alias-launcher"),
        };
        Ok(Self {
            apps_file: config_dir.join("apps.json"),
            cache_file: config_dir.join("app_embeddings.bin"),
            model_dir,
        })
    }

    /// The model directory, required by model-backed commands.
    pub fn model_dir(&self) -> Result<&PathBuf> {
        match &self.model_dir {
            Some(dir) => Ok(dir),
            None => bail!("this command needs the frozen model; pass --model-dir"),
        }
    }
}

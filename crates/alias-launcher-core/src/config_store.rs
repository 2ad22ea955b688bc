//! JSON-backed registry of applications.
//!
//! The on-disk shape is a single object `{ "apps": [...] }`. All mutations
//! are index-based, mirroring how a list-backed front end addresses rows.
//! Records are normalized once at load; see [`AppRecord::normalize`].
//!
//! A missing file loads as an empty registry. A malformed file also loads as
//! empty (logged at warn) — the registry is user-editable and a typo must not
//! take the process down.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::AppRecord;

/// File-level shape of the registry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    apps: Vec<AppRecord>,
}

/// Registry of applications, persisted as pretty JSON.
#[derive(Debug)]
pub struct AppConfigStore {
    path: PathBuf,
    apps: Vec<AppRecord>,
}

impl AppConfigStore {
    /// Open (or create in memory) the registry at `path` and load it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            path: path.into(),
            apps: Vec::new(),
        };
        store.load();
        store
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only snapshot of all records.
    pub fn apps(&self) -> &[AppRecord] {
        &self.apps
    }

    /// Reload from disk, replacing the in-memory list.
    pub fn load(&mut self) {
        self.apps = match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<ConfigFile>(&raw) {
                Ok(file) => file.apps,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "apps file malformed, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        for app in &mut self.apps {
            app.normalize();
        }
    }

    /// Write the registry back to disk, creating parent directories.
    pub fn save(&self) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::ConfigIo {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let file = ConfigFile {
            apps: self.apps.clone(),
        };
        let raw = serde_json::to_string_pretty(&file)
            .map_err(|e| CoreError::ConfigSerialize { source: e })?;
        fs::write(&self.path, raw).map_err(|e| CoreError::ConfigIo {
            path: self.path.display().to_string(),
            source: e,
        })
    }

    /// Append a new record whose only alias is its display name.
    pub fn add_app(&mut self, id: &str, exe_path: &str, display_name: &str) {
        self.apps.push(AppRecord::new(id, exe_path, display_name));
    }

    /// Delete the record at `index`.
    pub fn delete_app(&mut self, index: usize) -> CoreResult<()> {
        self.check_index(index)?;
        self.apps.remove(index);
        Ok(())
    }

    /// Update display name and executable path, keeping custom aliases.
    pub fn update_app(&mut self, index: usize, display_name: &str, exe_path: &str) -> CoreResult<()> {
        self.check_index(index)?;
        let app = &mut self.apps[index];
        app.exe_path = exe_path.to_string();
        app.rename(display_name);
        Ok(())
    }

    /// Add a custom alias to the record at `index`.
    pub fn add_alias(&mut self, index: usize, alias: &str) -> CoreResult<bool> {
        self.check_index(index)?;
        Ok(self.apps[index].add_alias(alias))
    }

    /// Remove an alias from the record at `index`. The display name is kept.
    pub fn remove_alias(&mut self, index: usize, alias: &str) -> CoreResult<bool> {
        self.check_index(index)?;
        Ok(self.apps[index].remove_alias(alias))
    }

    fn check_index(&self, index: usize) -> CoreResult<()> {
        if index >= self.apps.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: self.apps.len(),
            });
        }
        Ok(())
    }
}

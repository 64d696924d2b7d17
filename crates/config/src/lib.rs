//! Configuration directory handling for mailsync
//!
//! Resolves the per-user config directory (~/.config/mailsync/) and reads
//! and writes JSON files inside it. A [`ConfigDir`] can also be rooted at an
//! arbitrary path, which is how tests and embedding applications keep their
//! state apart from the user's.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Directory name under the platform config directory
const APP_DIR: &str = "mailsync";

/// A directory holding mailsync JSON files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// The per-user config directory (~/.config/mailsync/)
    pub fn user() -> Option<Self> {
        dirs::config_dir().map(|p| Self::at(p.join(APP_DIR)))
    }

    /// A config directory rooted at `root`
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a file within this directory
    pub fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.path(filename).exists()
    }

    /// Create the directory if it does not exist yet
    pub fn ensure(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create config directory: {}", self.root.display())
        })?;
        Ok(&self.root)
    }

    /// Load and parse a JSON file from this directory
    pub fn load_json<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        load_json_file(&self.path(filename))
    }

    /// Load a JSON file if present, `None` if it does not exist
    pub fn load_json_opt<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        if !self.exists(filename) {
            return Ok(None);
        }
        self.load_json(filename).map(Some)
    }

    /// Write `value` as pretty JSON, replacing any previous content atomically
    pub fn save_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf> {
        self.ensure()?;
        let path = self.path(filename);
        save_json_file(&path, value)?;
        Ok(path)
    }

    /// Remove a file; missing files are not an error
    pub fn remove(&self, filename: &str) -> Result<()> {
        let path = self.path(filename);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove config file: {}", path.display()))
            }
        }
    }
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Serialize `value` to `path` through a sibling temp file and a rename
pub fn save_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write config file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace config file: {}", path.display()))?;
    Ok(())
}

//! Sync engine configuration
//!
//! Loaded from (in order of priority):
//! 1. An explicit JSON file
//! 2. `mailsync.json` in the mailsync config directory
//! 3. Built-in defaults
//!
//! `MAILSYNC_*` environment variables then override individual fields.

use anyhow::{Context, Result, ensure};
use config::ConfigDir;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::LabelId;
use crate::remote::HistoryType;
use crate::sync::LimitPolicy;

/// Config filename in the mailsync config directory
const CONFIG_FILE: &str = "mailsync.json";

/// Tunables for paging, batching and history reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Mailbox owner; "me" is the authorized user
    pub user_id: String,
    /// Server-side cap on list page size
    pub max_page_size: usize,
    /// Requests per grouped batch call
    pub batch_chunk_size: usize,
    /// Batch chunks in flight at once; 1 is sequential
    pub batch_workers: usize,
    /// How list/search treats the item limit
    pub limit_policy: LimitPolicy,
    /// Label the history feed is restricted to
    pub history_label: Option<LabelId>,
    pub history_types: Vec<HistoryType>,
    /// Labels a watch subscribes to
    pub watch_label_ids: Vec<LabelId>,
    /// Renew a watch once it is this close to expiry
    pub watch_renewal_margin_secs: u64,
    /// Messages listed when a stale cursor forces a full resync
    pub resync_limit: usize,
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_id: "me".to_string(),
            max_page_size: 500,
            batch_chunk_size: 1000,
            batch_workers: 1,
            limit_policy: LimitPolicy::default(),
            history_label: Some(LabelId::unread()),
            history_types: vec![HistoryType::MessageAdded, HistoryType::LabelAdded],
            watch_label_ids: vec![LabelId::unread()],
            watch_renewal_margin_secs: 3600,
            resync_limit: 1000,
            http_timeout_secs: 60,
        }
    }
}

impl SyncConfig {
    /// Load from `dir`, falling back to defaults, then apply the environment
    pub fn load(dir: &ConfigDir) -> Result<Self> {
        let mut cfg = dir.load_json_opt::<Self>(CONFIG_FILE)?.unwrap_or_default();
        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from the per-user config directory
    pub fn load_default() -> Result<Self> {
        match ConfigDir::user() {
            Some(dir) => Self::load(&dir),
            None => {
                let mut cfg = Self::default();
                cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    /// Load from a specific JSON file, then apply `MAILSYNC_*` overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_with(path, |key| std::env::var(key).ok())
    }

    /// `from_file` with overrides looked up through `lookup`
    pub fn from_file_with<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg: Self = config::load_json_file(path)?;
        cfg.apply_env_overrides(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse from a JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json).context("Failed to parse sync config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Override fields from `MAILSYNC_*` variables found by `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = lookup("MAILSYNC_USER_ID") {
            self.user_id = user;
        }
        if let Some(v) = lookup("MAILSYNC_MAX_PAGE_SIZE") {
            self.max_page_size = parse_env("MAILSYNC_MAX_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAILSYNC_BATCH_CHUNK_SIZE") {
            self.batch_chunk_size = parse_env("MAILSYNC_BATCH_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAILSYNC_BATCH_WORKERS") {
            self.batch_workers = parse_env("MAILSYNC_BATCH_WORKERS", &v)?;
        }
        if let Some(v) = lookup("MAILSYNC_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_env("MAILSYNC_HTTP_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.user_id.is_empty(), "user_id must not be empty");
        ensure!(self.max_page_size > 0, "max_page_size must be positive");
        ensure!(self.batch_chunk_size > 0, "batch_chunk_size must be positive");
        ensure!(self.batch_workers > 0, "batch_workers must be at least 1");
        Ok(())
    }

    /// Save to `dir` so later runs pick it up
    pub fn save(&self, dir: &ConfigDir) -> Result<()> {
        dir.save_json(CONFIG_FILE, self)?;
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .ok()
        .with_context(|| format!("{key} has an invalid value: {value:?}"))
}
